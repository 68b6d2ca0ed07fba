//! Reclamation of dead vectors and their elements

use crate::{CharSxp, Elem, NativeConfig, NativeContext, NativeError, VecError, Vector};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(10);

#[test]
fn test_dropped_vector_is_released() {
    let ctx = NativeContext::new(NativeConfig::default().with_address_index(true));
    let v = Vector::double(&ctx, vec![1.0; 4]);
    let handle = v.materialize().unwrap();
    let address = v.data_address();
    assert_eq!(ctx.registry().handle_from_address(address), Some(handle));

    drop(v);
    assert!(ctx.wait_idle(WAIT));
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.registry().live_bytes(), 0);
    assert_eq!(ctx.registry().handle_from_address(address), None);
    assert!(ctx.lookup(handle).is_err());
    assert_eq!(ctx.reclaim_stats().released(), 1);
}

#[test]
fn test_handle_only_mirror_is_released() {
    let ctx = NativeContext::default();
    let v = Vector::int(&ctx, vec![1]);
    v.ensure_mirror().unwrap();
    drop(v);
    assert!(ctx.wait_idle(WAIT));
    assert!(ctx.registry().is_empty());
}

#[test]
fn test_unmirrored_vector_enqueues_nothing() {
    let ctx = NativeContext::default();
    drop(Vector::int(&ctx, vec![1, 2]));
    assert_eq!(ctx.reclaim_stats().pending(), 0);
    assert_eq!(ctx.reclaim_stats().released(), 0);
}

#[test]
fn test_string_elements_follow_parent() {
    let ctx = NativeContext::default();
    let v = Vector::strings(&ctx, ["a", "b", "c"]);
    v.materialize().unwrap();
    assert_eq!(ctx.registry().len(), 4);
    drop(v);
    assert!(ctx.wait_idle(WAIT));
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.registry().live_bytes(), 0);
}

#[test]
fn test_element_outlives_parent() {
    let ctx = NativeContext::default();
    let keep = CharSxp::new(&ctx, "kept");
    let v = Vector::strings(&ctx, ["x"]);
    v.set(0, Elem::Str(keep.clone())).unwrap();
    v.materialize().unwrap();
    let handle = keep.handle();
    drop(v);
    assert!(ctx.wait_idle(WAIT));
    assert!(ctx.lookup(handle).is_ok());
    assert_eq!(ctx.registry().len(), 1);
}

#[test]
fn test_release_after_shutdown_is_inline() {
    let ctx = NativeContext::default();
    let v = Vector::int(&ctx, vec![1, 2, 3]);
    v.materialize().unwrap();
    ctx.shutdown();
    drop(v);
    assert_eq!(ctx.reclaim_stats().pending(), 0);
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.registry().live_bytes(), 0);
}

#[test]
fn test_overwritten_list_element_is_released() {
    let ctx = NativeContext::default();
    let list = Vector::list(&ctx, vec![Vector::int(&ctx, vec![1])]);
    list.materialize().unwrap();
    assert_eq!(ctx.registry().len(), 2);
    list.set(0, Elem::List(Vector::null(&ctx))).unwrap();
    assert!(ctx.wait_idle(WAIT));
    assert_eq!(ctx.registry().len(), 2);
}

#[test]
fn test_drop_from_other_threads() {
    let ctx = NativeContext::default();
    std::thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for i in 0..250 {
                    let v = Vector::int(&ctx, vec![i; 16]);
                    v.materialize().unwrap();
                }
            });
        }
    });
    assert!(ctx.wait_idle(WAIT));
    assert!(ctx.registry().is_empty());
    assert_eq!(ctx.reclaim_stats().released(), 1000);
    assert_eq!(ctx.registry().registered(), 1000);
}

#[test]
fn test_lookups_during_release() {
    let ctx = NativeContext::default();
    let live: Vec<Vector> = (0..32).map(|i| Vector::int(&ctx, vec![i; 8])).collect();
    let handles: Vec<_> = live.iter().map(|v| v.materialize().unwrap()).collect();
    let done = AtomicBool::new(false);
    let invalid = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for i in 0..5_000 {
                let v = Vector::double(&ctx, vec![i as f64; 4]);
                v.materialize().unwrap();
            }
            done.store(true, Ordering::Release);
        });
        for _ in 0..2 {
            scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    for (handle, vector) in handles.iter().zip(&live) {
                        match ctx.lookup_vector(*handle) {
                            Ok(found) => assert!(found.ptr_eq(vector)),
                            Err(VecError::Native(NativeError::InvalidHandle { .. })) => {
                                invalid.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(other) => panic!("unexpected lookup error: {}", other),
                        }
                    }
                }
            });
        }
    });

    assert!(ctx.wait_idle(WAIT));
    assert_eq!(invalid.load(Ordering::Relaxed), 0);
    assert_eq!(ctx.registry().len(), live.len());
}
