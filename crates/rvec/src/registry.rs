// =============================================================================
// Mirror registry: handle -> mirror table shared by all threads
// =============================================================================
//
// Native code only ever sees handles. Every handle that has been handed out
// and not yet released maps to exactly one mirror here. The optional tables
// are debugging aids switched on through `NativeConfig`:
// - address index: data address -> handle, for inspecting raw pointers
// - allocation sites: handle -> where the mirror was created

use crate::config::{handle_sequence, NativeConfig};
use crate::error::{NativeError, VecResult};
use crate::mirror::{Handle, NativeMirror};
use crate::vector::Sexp;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

pub struct MirrorRegistry {
    mirrors: DashMap<u64, Arc<NativeMirror>>,
    by_address: Option<DashMap<usize, Handle>>,
    sites: Option<DashMap<u64, String>>,
    counter: AtomicU64,
    stride: u64,
    registered: AtomicU64,
    live_bytes: AtomicUsize,
}

impl MirrorRegistry {
    pub fn new(config: &NativeConfig) -> Self {
        let (base, stride) = handle_sequence(config.handle_base, config.handle_stride);
        Self {
            mirrors: DashMap::new(),
            by_address: config.address_index.then(DashMap::new),
            sites: config.trace_allocation_sites.then(DashMap::new),
            counter: AtomicU64::new(base),
            stride,
            registered: AtomicU64::new(0),
            live_bytes: AtomicUsize::new(0),
        }
    }

    /// Allocate a fresh handle. The counter only wraps after 2^63 handles,
    /// and every value it yields is odd, so never `Handle::NONE`.
    pub(crate) fn next_handle(&self) -> Handle {
        Handle::new(self.counter.fetch_add(self.stride, Ordering::Relaxed))
    }

    /// Next value the counter will hand out
    pub fn counter(&self) -> u64 {
        self.counter.load(Ordering::Relaxed)
    }

    pub(crate) fn register(&self, mirror: Arc<NativeMirror>, site: Option<String>) {
        let handle = mirror.handle();
        if let Some(sites) = &self.sites {
            if let Some(site) = site {
                sites.insert(handle.as_u64(), site);
            }
        }
        let previous = self.mirrors.insert(handle.as_u64(), mirror);
        if previous.is_some() {
            tracing::error!(%handle, "handle registered twice");
            debug_assert!(false, "handle {} registered twice", handle);
        }
        self.registered.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%handle, "registered native mirror");
    }

    /// The mirror registered under `handle`, whether or not its owner is alive
    pub fn get(&self, handle: Handle) -> Option<Arc<NativeMirror>> {
        // clone out so the shard lock is not held by the caller
        self.mirrors.get(&handle.as_u64()).map(|entry| entry.value().clone())
    }

    /// Resolve a handle received from native code to its live object
    pub fn lookup(&self, handle: Handle) -> VecResult<Sexp> {
        match self.get(handle).and_then(|mirror| mirror.owner()) {
            Some(object) => Ok(object),
            None => {
                let site = self.allocation_site(handle);
                tracing::error!(
                    %handle,
                    counter = self.counter(),
                    site = site.as_deref().unwrap_or("unknown"),
                    "unknown native reference"
                );
                Err(NativeError::InvalidHandle {
                    handle: handle.as_u64(),
                    counter: self.counter(),
                    site,
                }
                .into())
            }
        }
    }

    /// Remove the entry for `handle` if it still belongs to `mirror`
    pub(crate) fn remove(&self, handle: Handle, mirror: &NativeMirror) {
        let removed = self
            .mirrors
            .remove_if(&handle.as_u64(), |_, current| std::ptr::eq(current.as_ref(), mirror));
        if removed.is_some() {
            if let Some(sites) = &self.sites {
                sites.remove(&handle.as_u64());
            }
        }
    }

    pub(crate) fn index_address(&self, address: usize, handle: Handle) {
        if let Some(index) = &self.by_address {
            index.insert(address, handle);
        }
    }

    pub(crate) fn unindex_address(&self, address: usize) {
        if let Some(index) = &self.by_address {
            index.remove(&address);
        }
    }

    /// Reverse lookup; always `None` unless the address index is enabled
    pub fn handle_from_address(&self, address: usize) -> Option<Handle> {
        self.by_address
            .as_ref()
            .and_then(|index| index.get(&address).map(|entry| *entry.value()))
    }

    pub fn allocation_site(&self, handle: Handle) -> Option<String> {
        self.sites
            .as_ref()
            .and_then(|sites| sites.get(&handle.as_u64()).map(|entry| entry.value().clone()))
    }

    pub fn has_address_index(&self) -> bool {
        self.by_address.is_some()
    }

    pub(crate) fn note_allocated(&self, bytes: usize) {
        self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn note_freed(&self, bytes: usize) {
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Bytes currently held by owned native buffers
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Handles registered over the registry's lifetime
    pub fn registered(&self) -> u64 {
        self.registered.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::OwnerRef;
    use std::sync::Weak;

    fn orphan(registry: &MirrorRegistry) -> Arc<NativeMirror> {
        Arc::new(NativeMirror::new(
            registry.next_handle(),
            OwnerRef::Vector(Weak::new()),
        ))
    }

    #[test]
    fn test_handles_are_odd_and_increasing() {
        let registry = MirrorRegistry::new(&NativeConfig::default());
        let a = registry.next_handle();
        let b = registry.next_handle();
        assert_eq!(a.as_u64(), crate::config::DEFAULT_HANDLE_BASE);
        assert_eq!(b.as_u64(), a.as_u64() + 2);
        assert_eq!(b.as_u64() % 2, 1);
    }

    #[test]
    fn test_counter_wrap_never_yields_none() {
        let config = NativeConfig {
            handle_base: u64::MAX - 1,
            handle_stride: 0,
            ..NativeConfig::default()
        };
        let registry = MirrorRegistry::new(&config);
        let last = registry.next_handle();
        let wrapped = registry.next_handle();
        assert_eq!(last.as_u64(), u64::MAX);
        assert_eq!(wrapped.as_u64(), 1);
        assert!(wrapped.is_materialized());
    }

    #[test]
    fn test_lookup_dead_owner_is_invalid() {
        let registry = MirrorRegistry::new(&NativeConfig::default());
        let mirror = orphan(&registry);
        registry.register(mirror.clone(), None);
        assert_eq!(registry.len(), 1);
        let err = registry.lookup(mirror.handle()).unwrap_err();
        assert!(err.is_internal());
    }

    #[test]
    fn test_lookup_unknown_handle() {
        let registry = MirrorRegistry::new(&NativeConfig::default());
        let err = registry.lookup(Handle::from_raw(0x42)).unwrap_err();
        assert!(err.to_string().contains("0x42"));
    }

    #[test]
    fn test_remove_only_matching_mirror() {
        let registry = MirrorRegistry::new(&NativeConfig::default());
        let mirror = orphan(&registry);
        let impostor = NativeMirror::new(mirror.handle(), OwnerRef::Vector(Weak::new()));
        registry.register(mirror.clone(), None);
        registry.remove(mirror.handle(), &impostor);
        assert_eq!(registry.len(), 1);
        registry.remove(mirror.handle(), &mirror);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_address_index_disabled_by_default() {
        let registry = MirrorRegistry::new(&NativeConfig::default());
        registry.index_address(0x1000, Handle::from_raw(3));
        assert_eq!(registry.handle_from_address(0x1000), None);

        let registry = MirrorRegistry::new(&NativeConfig::default().with_address_index(true));
        registry.index_address(0x1000, Handle::from_raw(3));
        assert_eq!(registry.handle_from_address(0x1000), Some(Handle::from_raw(3)));
        registry.unindex_address(0x1000);
        assert_eq!(registry.handle_from_address(0x1000), None);
    }

    #[test]
    fn test_allocation_sites() {
        let config = NativeConfig::default().with_trace_allocation_sites(true);
        let registry = MirrorRegistry::new(&config);
        let mirror = orphan(&registry);
        registry.register(mirror.clone(), Some("test site".to_string()));
        assert_eq!(
            registry.allocation_site(mirror.handle()).as_deref(),
            Some("test site")
        );
        let err = registry.lookup(mirror.handle()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::VecError::Native(NativeError::InvalidHandle { site: Some(_), .. })
        ));
    }
}
