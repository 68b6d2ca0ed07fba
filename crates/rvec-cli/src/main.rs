use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use rvec::sharing::{assign, pass_arguments, CallArgument};
use rvec::{Frame, NativeConfig, NativeContext, Vector};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Keep a data-address index for reverse lookups
    #[arg(long, global = true)]
    address_index: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the sharing and promotion scenarios")]
    Scenarios,
    #[command(about = "Promote and drop vectors, then print the inspector snapshot")]
    Churn {
        #[arg(long, default_value_t = 100_000)]
        count: usize,
        #[arg(long, default_value_t = 8)]
        len: usize,
        /// Seconds to wait for the reclamation worker
        #[arg(long, default_value_t = 60)]
        wait: u64,
    },
    #[command(about = "Print the inspector snapshot of the global context")]
    Inspect,
}

fn scenarios(ctx: &NativeContext) -> Result<()> {
    // A: assignment moves a vector from temporary to shared
    let mut frame = Frame::new();
    let v = Vector::double(ctx, vec![1.0, 2.0, 3.0]);
    let initial = v.sharing_state();
    assign(&mut frame, "x", v.clone().into());
    let after_x = v.sharing_state();
    if let Some(x) = frame.get("x").cloned() {
        assign(&mut frame, "y", x);
    }
    println!(
        "A: {} -> x: {} -> y: {}",
        initial,
        after_x,
        v.sharing_state()
    );

    // B: reads are stable across promotion
    let v = Vector::int(ctx, vec![10, 20, 30, 40, 50]);
    let before = v.to_vec_as::<i32>()?;
    let handle = v.promote()?;
    let after = v.to_vec_as::<i32>()?;
    println!(
        "B: {:?} -> {:?} (handle {}, address {:#x})",
        before,
        after,
        handle,
        v.data_address()
    );

    // C: passing an owned vector shares it
    let mut frame = Frame::new();
    let v = Vector::int(ctx, vec![1, 2, 3]);
    assign(&mut frame, "x", v.clone().into());
    let owned = v.sharing_state();
    if let Some(x) = frame.get("x").cloned() {
        pass_arguments(&[CallArgument::new(x)]);
    }
    println!("C: {} -> call -> {}", owned, v.sharing_state());
    Ok(())
}

fn churn(ctx: &NativeContext, count: usize, len: usize, wait: u64) -> Result<()> {
    for i in 0..count {
        let v = Vector::double(ctx, vec![i as f64; len]);
        v.materialize()?;
    }
    if !ctx.wait_idle(Duration::from_secs(wait)) {
        tracing::warn!(
            pending = ctx.reclaim_stats().pending(),
            "reclamation did not finish in time"
        );
    }
    print_snapshot(ctx)
}

fn print_snapshot(ctx: &NativeContext) -> Result<()> {
    let snapshot = ctx.inspector().snapshot();
    let json = serde_json::to_string_pretty(&snapshot).into_diagnostic()?;
    println!("{}", json);
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = NativeConfig::from_env();
    if cli.address_index {
        config = config.with_address_index(true);
    }

    match cli.command {
        Some(Commands::Churn { count, len, wait }) => {
            let ctx = NativeContext::new(config);
            churn(&ctx, count, len, wait)?;
        }
        Some(Commands::Inspect) => {
            print_snapshot(&NativeContext::global())?;
        }
        Some(Commands::Scenarios) | None => {
            let ctx = NativeContext::new(config);
            scenarios(&ctx)?;
        }
    }

    Ok(())
}
