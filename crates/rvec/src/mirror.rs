//! Native mirrors
//!
//! A mirror bridges one vector (or string element) to native code: it owns
//! the opaque handle native code uses to refer to the object and, once the
//! contents are materialized, the native buffer holding them. The mirror
//! only references its owner weakly; when the owner dies the mirror is handed
//! to the reclamation worker, which releases it exactly once.

use crate::alloc;
use crate::charsxp::CharCell;
use crate::element::NativeElement;
use crate::error::VecResult;
use crate::registry::MirrorRegistry;
use crate::vector::{Sexp, VectorCell};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};

/// Opaque identifier of a mirror. Zero means "not materialized".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub struct Handle(u64);

impl Handle {
    pub const NONE: Handle = Handle(0);

    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Rebuild a handle received back from native code
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    pub const fn is_materialized(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Where a mirror's contents live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Backing {
    /// Handle assigned, no contents yet
    Unallocated,
    /// Zero-length contents, pointing at the context-wide sentinel
    Empty { address: usize },
    /// Buffer allocated here and freed on release
    Owned { address: usize, bytes: usize },
    /// Buffer owned by foreign code, never freed here
    External { address: usize },
}

impl Backing {
    pub(crate) fn address(&self) -> usize {
        match self {
            Backing::Unallocated => 0,
            Backing::Empty { address }
            | Backing::Owned { address, .. }
            | Backing::External { address } => *address,
        }
    }
}

/// Mutable part of a mirror
#[derive(Debug)]
pub(crate) struct MirrorBlock {
    pub(crate) backing: Backing,
    pub(crate) length: usize,
    pub(crate) true_length: usize,
    /// Indirect elements referenced by handle from the native buffer.
    /// Holding them here keeps the handles resolvable.
    pub(crate) pins: Vec<Sexp>,
}

impl MirrorBlock {
    /// Address of element `index` for elements `width` bytes wide
    fn slot(&self, index: usize, width: usize) -> *mut u8 {
        let address = self.backing.address();
        debug_assert!(address != 0, "native contents not allocated");
        debug_assert!(index < self.true_length.max(self.length));
        (address + index * width) as *mut u8
    }
}

#[derive(Debug)]
pub(crate) enum OwnerRef {
    Vector(Weak<VectorCell>),
    Char(Weak<CharCell>),
}

pub struct NativeMirror {
    handle: Handle,
    owner: OwnerRef,
    block: Mutex<MirrorBlock>,
    released: AtomicBool,
}

impl NativeMirror {
    pub(crate) fn new(handle: Handle, owner: OwnerRef) -> Self {
        Self {
            handle,
            owner,
            block: Mutex::new(MirrorBlock {
                backing: Backing::Unallocated,
                length: 0,
                true_length: 0,
                pins: Vec::new(),
            }),
            released: AtomicBool::new(false),
        }
    }

    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub(crate) fn block(&self) -> MutexGuard<'_, MirrorBlock> {
        self.block.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The owning object, if it is still alive
    pub fn owner(&self) -> Option<Sexp> {
        match &self.owner {
            OwnerRef::Vector(weak) => weak.upgrade().map(|cell| Sexp::Vector(cell.into())),
            OwnerRef::Char(weak) => weak.upgrade().map(|cell| Sexp::Char(cell.into())),
        }
    }

    /// Zero until contents are allocated
    pub fn data_address(&self) -> usize {
        self.block().backing.address()
    }

    pub fn is_allocated(&self) -> bool {
        !matches!(self.block().backing, Backing::Unallocated)
    }

    pub fn length(&self) -> usize {
        self.block().length
    }

    pub fn true_length(&self) -> usize {
        self.block().true_length
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Install contents. Used once per mirror, when its owner is promoted or
    /// adopts a foreign buffer.
    pub(crate) fn install(
        &self,
        registry: &MirrorRegistry,
        backing: Backing,
        length: usize,
        true_length: usize,
        pins: Vec<Sexp>,
    ) {
        let mut block = self.block();
        debug_assert!(matches!(block.backing, Backing::Unallocated));
        block.backing = backing;
        block.length = length;
        block.true_length = true_length;
        block.pins = pins;
        if let Backing::Owned { address, bytes } = backing {
            registry.note_allocated(bytes);
            registry.index_address(address, self.handle);
        }
    }

    /// Move the contents into a new owned buffer of `new_true_length` slots
    /// of `width` bytes, preserving the common prefix. External buffers are
    /// copied, never resized in place.
    pub(crate) fn reallocate(
        &self,
        registry: &MirrorRegistry,
        width: usize,
        new_true_length: usize,
        empty_address: usize,
    ) -> VecResult<()> {
        let new_bytes = width * new_true_length;
        let mut block = self.block();
        let new_backing = match block.backing {
            _ if new_bytes == 0 => Backing::Empty {
                address: empty_address,
            },
            Backing::Owned { address, bytes } => {
                // SAFETY: the block was allocated with `bytes` bytes and is live
                let ptr = unsafe { alloc::reallocate(address, bytes, new_bytes)? };
                registry.unindex_address(address);
                registry.note_freed(bytes);
                Backing::Owned {
                    address: ptr.as_ptr() as usize,
                    bytes: new_bytes,
                }
            }
            Backing::External { address } => {
                let ptr = alloc::allocate(new_bytes)?;
                let keep = (block.true_length * width).min(new_bytes);
                // SAFETY: the foreign buffer holds at least `keep` bytes of live contents
                unsafe { std::ptr::copy_nonoverlapping(address as *const u8, ptr.as_ptr(), keep) };
                Backing::Owned {
                    address: ptr.as_ptr() as usize,
                    bytes: new_bytes,
                }
            }
            Backing::Empty { .. } | Backing::Unallocated => Backing::Owned {
                address: alloc::allocate(new_bytes)?.as_ptr() as usize,
                bytes: new_bytes,
            },
        };
        if let Backing::Owned { address, bytes } = block.backing {
            if new_bytes == 0 {
                // SAFETY: released exactly here, the backing is replaced below
                unsafe { alloc::free(address, bytes) };
                registry.unindex_address(address);
                registry.note_freed(bytes);
            }
        }
        if let Backing::Owned { address, bytes } = new_backing {
            registry.note_allocated(bytes);
            registry.index_address(address, self.handle);
        }
        block.backing = new_backing;
        block.true_length = new_true_length;
        Ok(())
    }

    pub(crate) fn set_length(&self, length: usize) {
        self.block().length = length;
    }

    pub(crate) fn load<T: NativeElement>(&self, index: usize) -> T {
        let block = self.block();
        // SAFETY: the slot lies inside the allocated buffer (checked by the caller)
        unsafe { T::load(block.slot(index, T::TYPE.element_size())) }
    }

    pub(crate) fn store<T: NativeElement>(&self, index: usize, value: T) {
        let block = self.block();
        // SAFETY: as in `load`
        unsafe { T::store(block.slot(index, T::TYPE.element_size()), value) }
    }

    pub(crate) fn load_handle(&self, index: usize) -> Handle {
        let block = self.block();
        // SAFETY: indirect buffers hold one u64 handle per slot
        Handle(unsafe { (block.slot(index, 8) as *const u64).read_unaligned() })
    }

    /// Store a handle and pin the element it refers to. Returns the element
    /// previously pinned at that slot so it is dropped outside the lock.
    pub(crate) fn store_handle(&self, index: usize, handle: Handle, element: Sexp) -> Option<Sexp> {
        let mut block = self.block();
        // SAFETY: as in `load_handle`
        unsafe { (block.slot(index, 8) as *mut u64).write_unaligned(handle.as_u64()) };
        if index < block.pins.len() {
            Some(std::mem::replace(&mut block.pins[index], element))
        } else {
            block.pins.push(element);
            None
        }
    }

    /// Drop the pins past `len`, handing them back to be dropped unlocked
    pub(crate) fn truncate_pins(&self, len: usize) -> Vec<Sexp> {
        let mut block = self.block();
        if block.pins.len() <= len {
            return Vec::new();
        }
        block.pins.split_off(len)
    }

    /// Free the native buffer (unless foreign-owned or the shared empty
    /// sentinel) and drop every registry entry for this handle.
    ///
    /// Runs at most once; later calls return false. Never panics, so it is
    /// safe on the reclamation thread.
    pub fn release(&self, registry: &MirrorRegistry) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }
        if self.handle.is_materialized() {
            registry.remove(self.handle, self);
        }
        let pins = {
            let mut block = self.block();
            if let Backing::Owned { address, bytes } = block.backing {
                // SAFETY: owned buffers are freed only here, guarded by `released`
                unsafe { alloc::free(address, bytes) };
                registry.unindex_address(address);
                registry.note_freed(bytes);
            }
            block.backing = Backing::Unallocated;
            std::mem::take(&mut block.pins)
        };
        // pinned elements may cascade into further releases
        drop(pins);
        true
    }
}

impl fmt::Debug for NativeMirror {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let block = self.block();
        write!(
            f,
            "mirror: address={:#x}, id={}",
            block.backing.address(),
            self.handle
        )
    }
}

impl Drop for NativeMirror {
    fn drop(&mut self) {
        // Mirrors outliving their context are never released; free here.
        let block = self.block.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Backing::Owned { address, bytes } = block.backing {
            if !self.released.load(Ordering::Acquire) {
                tracing::debug!(handle = %self.handle, "freeing unreleased native mirror");
                // SAFETY: the buffer was never freed, release did not run
                unsafe { alloc::free(address, bytes) };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display() {
        assert_eq!(Handle::from_raw(0x1f).to_string(), "0x1f");
        assert!(!Handle::NONE.is_materialized());
        assert!(Handle::from_raw(1).is_materialized());
    }

    #[test]
    fn test_backing_address() {
        assert_eq!(Backing::Unallocated.address(), 0);
        assert_eq!(Backing::Empty { address: 64 }.address(), 64);
        assert_eq!(
            Backing::Owned {
                address: 128,
                bytes: 8
            }
            .address(),
            128
        );
    }

    #[test]
    fn test_release_runs_once() {
        let registry = MirrorRegistry::new(&Default::default());
        let handle = registry.next_handle();
        let mirror = std::sync::Arc::new(NativeMirror::new(
            handle,
            OwnerRef::Vector(Weak::new()),
        ));
        registry.register(mirror.clone(), None);
        let block = alloc::allocate(16).unwrap();
        mirror.install(
            &registry,
            Backing::Owned {
                address: block.as_ptr() as usize,
                bytes: 16,
            },
            2,
            2,
            Vec::new(),
        );
        assert_eq!(registry.live_bytes(), 16);
        assert!(mirror.release(&registry));
        assert!(!mirror.release(&registry));
        assert_eq!(registry.live_bytes(), 0);
        assert!(registry.get(handle).is_none());
        assert!(mirror.owner().is_none());
    }
}
