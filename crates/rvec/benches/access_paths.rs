// Criterion benchmark for element reads on the three access paths:
// - fast: the type was never promoted, reads go straight to managed memory
// - dual-check managed: the type was promoted elsewhere, this vector was not
// - native: the vector itself lives in native memory

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rvec::{NativeContext, Vector};

const LEN: usize = 1024;

fn sum(v: &Vector) -> i64 {
    (0..LEN)
        .map(|i| v.get_as::<i32>(i).map(i64::from).unwrap_or(0))
        .sum()
}

fn bench_reads(c: &mut Criterion) {
    let values: Vec<i32> = (0..LEN as i32).collect();

    let fresh = NativeContext::default();
    let fast = Vector::int(&fresh, values.clone());

    let promoted = NativeContext::default();
    let elsewhere = Vector::int(&promoted, vec![0]);
    elsewhere.materialize().expect("promote");
    let dual = Vector::int(&promoted, values.clone());
    let native = Vector::int(&promoted, values);
    native.materialize().expect("promote");

    let mut group = c.benchmark_group("int_reads");
    group.bench_function("fast_path", |b| b.iter(|| sum(black_box(&fast))));
    group.bench_function("dual_check_managed", |b| b.iter(|| sum(black_box(&dual))));
    group.bench_function("dual_check_native", |b| b.iter(|| sum(black_box(&native))));
    group.finish();
}

fn bench_promotion(c: &mut Criterion) {
    let ctx = NativeContext::default();
    c.bench_function("promote_and_drop", |b| {
        b.iter(|| {
            let v = Vector::double(&ctx, vec![1.0; 64]);
            black_box(v.materialize().expect("promote"));
        })
    });
}

criterion_group!(benches, bench_reads, bench_promotion);
criterion_main!(benches);
