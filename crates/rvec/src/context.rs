//! The native context: everything vectors share when they cross into native
//! memory.
//!
//! A context owns the mirror registry (and with it the handle counter), the
//! per-type promotion switches, the empty-buffer sentinel, the NA string and
//! the reclamation worker. Vectors keep their context alive; the process-wide
//! instance returned by [`NativeContext::global`] is never dropped.

use crate::alloc;
use crate::charsxp::CharSxp;
use crate::config::NativeConfig;
use crate::error::{AccessError, VecResult};
use crate::inspector::NativeDataInspector;
use crate::mirror::Handle;
use crate::reclaim::{ReclaimStats, Reclaimer};
use crate::registry::MirrorRegistry;
use crate::switch::{PromotionSwitch, PromotionSwitches};
use crate::vector::{Sexp, Vector};
use rvec_val::ElemType;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Size of the empty-buffer sentinel
const EMPTY_SENTINEL_BYTES: usize = 8;

lazy_static::lazy_static! {
    static ref GLOBAL_CONTEXT: NativeContext = NativeContext::new(NativeConfig::from_env());
}

pub(crate) struct ContextInner {
    pub(crate) config: NativeConfig,
    pub(crate) registry: Arc<MirrorRegistry>,
    pub(crate) reclaimer: Reclaimer,
    pub(crate) switches: PromotionSwitches,
    empty: AtomicUsize,
    na_string: OnceLock<CharSxp>,
}

impl ContextInner {
    pub(crate) fn empty_data_address(&self) -> VecResult<usize> {
        let current = self.empty.load(Ordering::Acquire);
        if current != 0 {
            return Ok(current);
        }
        let fresh = alloc::allocate(EMPTY_SENTINEL_BYTES)?.as_ptr() as usize;
        match self
            .empty
            .compare_exchange(0, fresh, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(fresh),
            Err(winner) => {
                // SAFETY: `fresh` was never published
                unsafe { alloc::free(fresh, EMPTY_SENTINEL_BYTES) };
                Ok(winner)
            }
        }
    }

    /// Site description for a new mirror, when site tracing is on
    pub(crate) fn allocation_site(&self, what: impl FnOnce() -> String) -> Option<String> {
        self.config.trace_allocation_sites.then(|| {
            format!(
                "{}\n{}",
                what(),
                std::backtrace::Backtrace::force_capture()
            )
        })
    }
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        self.reclaimer.shutdown();
        let empty = *self.empty.get_mut();
        if empty != 0 {
            // SAFETY: allocated in `empty_data_address`; no vector outlives the context
            unsafe { alloc::free(empty, EMPTY_SENTINEL_BYTES) };
        }
    }
}

#[derive(Clone)]
pub struct NativeContext(Arc<ContextInner>);

impl NativeContext {
    pub fn new(config: NativeConfig) -> Self {
        let registry = Arc::new(MirrorRegistry::new(&config));
        let reclaimer = Reclaimer::new(registry.clone(), config.worker_name.clone());
        tracing::debug!(?config, "created native context");
        Self(Arc::new(ContextInner {
            config,
            registry,
            reclaimer,
            switches: PromotionSwitches::new(),
            empty: AtomicUsize::new(0),
            na_string: OnceLock::new(),
        }))
    }

    /// The process-wide context, configured from the environment on first use
    pub fn global() -> NativeContext {
        GLOBAL_CONTEXT.clone()
    }

    pub(crate) fn from_inner(inner: Arc<ContextInner>) -> Self {
        Self(inner)
    }

    pub(crate) fn inner(&self) -> &Arc<ContextInner> {
        &self.0
    }

    pub fn config(&self) -> &NativeConfig {
        &self.0.config
    }

    pub fn registry(&self) -> &MirrorRegistry {
        &self.0.registry
    }

    pub fn reclaim_stats(&self) -> &ReclaimStats {
        self.0.reclaimer.stats()
    }

    pub fn ptr_eq(&self, other: &NativeContext) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Resolve a handle received from native code
    pub fn lookup(&self, handle: Handle) -> VecResult<Sexp> {
        self.0.registry.lookup(handle)
    }

    /// Resolve a handle that must name a vector
    pub fn lookup_vector(&self, handle: Handle) -> VecResult<Vector> {
        match self.lookup(handle)? {
            Sexp::Vector(vector) => Ok(vector),
            Sexp::Char(_) => Err(AccessError::mismatch(ElemType::List, ElemType::Str)),
        }
    }

    pub fn switch(&self, ty: ElemType) -> PromotionSwitch {
        self.0.switches.get(ty)
    }

    pub fn switches(&self) -> &PromotionSwitches {
        &self.0.switches
    }

    /// Shared address handed out for every zero-length native vector
    pub fn empty_data_address(&self) -> VecResult<usize> {
        self.0.empty_data_address()
    }

    /// The NA string of this context
    pub fn na_string(&self) -> CharSxp {
        self.0
            .na_string
            .get_or_init(|| CharSxp::new_na(&self.0))
            .clone()
    }

    /// Wait for the reclamation worker to drain its queue
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.0.reclaimer.wait_idle(timeout)
    }

    /// Stop the reclamation worker. Mirrors dying afterwards are released on
    /// the dropping thread.
    pub fn shutdown(&self) {
        self.0.reclaimer.shutdown();
    }

    pub fn inspector(&self) -> NativeDataInspector {
        NativeDataInspector::new(self.clone())
    }
}

impl Default for NativeContext {
    fn default() -> Self {
        Self::new(NativeConfig::default())
    }
}

impl std::fmt::Debug for NativeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeContext")
            .field("mirrors", &self.0.registry.len())
            .field("reclaimer", &self.0.reclaimer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_sentinel_is_stable() {
        let ctx = NativeContext::default();
        let a = ctx.empty_data_address().unwrap();
        let b = ctx.empty_data_address().unwrap();
        assert_ne!(a, 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_sentinel_race() {
        let ctx = NativeContext::default();
        let addresses: Vec<usize> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| ctx.empty_data_address().unwrap()))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });
        assert!(addresses.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_switches_start_unpromoted() {
        let ctx = NativeContext::default();
        for ty in ElemType::all() {
            assert_eq!(ctx.switch(ty), PromotionSwitch::NeverPromoted);
        }
    }

    #[test]
    fn test_na_string_singleton() {
        let ctx = NativeContext::default();
        let a = ctx.na_string();
        let b = ctx.na_string();
        assert!(a.is_na());
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn test_lookup_unknown() {
        let ctx = NativeContext::default();
        assert!(ctx.lookup(Handle::from_raw(7)).is_err());
        assert!(ctx.lookup_vector(Handle::NONE).is_err());
    }

    #[test]
    fn test_global_is_shared() {
        assert!(NativeContext::global().ptr_eq(&NativeContext::global()));
    }
}
