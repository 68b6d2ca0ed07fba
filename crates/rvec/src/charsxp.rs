//! String elements
//!
//! A `CharSxp` is an immutable string with its own, optional mirror. String
//! vectors refer to their elements by handle once promoted, so each element
//! can be handed to native code on its own. The materialised contents are a
//! NUL-terminated copy of the bytes.

use crate::alloc;
use crate::context::{ContextInner, NativeContext};
use crate::error::{NativeError, VecResult};
use crate::mirror::{Backing, Handle, NativeMirror, OwnerRef};
use ecow::EcoString;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

pub struct CharCell {
    // weak: the context keeps its NA string alive
    ctx: Weak<ContextInner>,
    contents: EcoString,
    na: bool,
    mirror: Mutex<Option<Arc<NativeMirror>>>,
}

impl CharCell {
    fn mirror(&self) -> MutexGuard<'_, Option<Arc<NativeMirror>>> {
        self.mirror.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CharCell {
    fn drop(&mut self) {
        let mirror = self
            .mirror
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let (Some(mirror), Some(ctx)) = (mirror, self.ctx.upgrade()) {
            ctx.reclaimer.enqueue(mirror);
        }
    }
}

#[derive(Clone)]
pub struct CharSxp(Arc<CharCell>);

impl CharSxp {
    pub fn new(ctx: &NativeContext, contents: impl Into<EcoString>) -> Self {
        Self(Arc::new(CharCell {
            ctx: Arc::downgrade(ctx.inner()),
            contents: contents.into(),
            na: false,
            mirror: Mutex::new(None),
        }))
    }

    pub(crate) fn new_na(ctx: &Arc<ContextInner>) -> Self {
        Self(Arc::new(CharCell {
            ctx: Arc::downgrade(ctx),
            contents: EcoString::inline("NA"),
            na: true,
            mirror: Mutex::new(None),
        }))
    }

    /// The context's NA string
    pub fn na(ctx: &NativeContext) -> Self {
        ctx.na_string()
    }

    pub fn as_str(&self) -> &str {
        self.0.contents.as_str()
    }

    pub fn is_na(&self) -> bool {
        self.0.na
    }

    pub fn len(&self) -> usize {
        self.0.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.contents.is_empty()
    }

    pub fn ptr_eq(&self, other: &CharSxp) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn context(&self) -> VecResult<Arc<ContextInner>> {
        self.0
            .ctx
            .upgrade()
            .ok_or_else(|| NativeError::ContextDropped.into())
    }

    pub fn handle(&self) -> Handle {
        self.0
            .mirror()
            .as_ref()
            .map_or(Handle::NONE, |mirror| mirror.handle())
    }

    pub fn data_address(&self) -> usize {
        self.0
            .mirror()
            .as_ref()
            .map_or(0, |mirror| mirror.data_address())
    }

    /// Assign a handle without materialising the contents
    pub fn ensure_mirror(&self) -> VecResult<Handle> {
        let ctx = self.context()?;
        let mut slot = self.0.mirror();
        Ok(self.ensure_mirror_locked(&ctx, &mut slot).handle())
    }

    fn ensure_mirror_locked(
        &self,
        ctx: &ContextInner,
        slot: &mut Option<Arc<NativeMirror>>,
    ) -> Arc<NativeMirror> {
        if let Some(mirror) = slot {
            return mirror.clone();
        }
        let handle = ctx.registry.next_handle();
        let mirror = Arc::new(NativeMirror::new(
            handle,
            OwnerRef::Char(Arc::downgrade(&self.0)),
        ));
        let site = ctx.allocation_site(|| format!("string element {:?}", self.as_str()));
        ctx.registry.register(mirror.clone(), site);
        tracing::debug!(%handle, "assigned string element handle");
        *slot = Some(mirror.clone());
        mirror
    }

    /// Native NUL-terminated copy of the contents; returns its address.
    pub fn materialize(&self) -> VecResult<usize> {
        let ctx = self.context()?;
        let mut slot = self.0.mirror();
        let mirror = self.ensure_mirror_locked(&ctx, &mut slot);
        if mirror.is_allocated() {
            return Ok(mirror.data_address());
        }
        let bytes = self.as_str().as_bytes();
        let block = alloc::allocate(bytes.len() + 1)?;
        // SAFETY: the block holds the bytes plus the zeroed terminator
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), block.as_ptr(), bytes.len()) };
        let address = block.as_ptr() as usize;
        mirror.install(
            &ctx.registry,
            Backing::Owned {
                address,
                bytes: bytes.len() + 1,
            },
            bytes.len(),
            bytes.len(),
            Vec::new(),
        );
        Ok(address)
    }
}

impl From<Arc<CharCell>> for CharSxp {
    fn from(cell: Arc<CharCell>) -> Self {
        Self(cell)
    }
}

impl fmt::Debug for CharSxp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_na() {
            write!(f, "NA")
        } else {
            write!(f, "{:?}", self.as_str())
        }
    }
}

impl fmt::Display for CharSxp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Sexp;

    #[test]
    fn test_handle_without_data() {
        let ctx = NativeContext::default();
        let s = CharSxp::new(&ctx, "hello");
        assert_eq!(s.handle(), Handle::NONE);
        let handle = s.ensure_mirror().unwrap();
        assert!(handle.is_materialized());
        assert_eq!(s.ensure_mirror().unwrap(), handle);
        assert_eq!(s.data_address(), 0);
    }

    #[test]
    fn test_materialize_is_nul_terminated() {
        let ctx = NativeContext::default();
        let s = CharSxp::new(&ctx, "abc");
        let address = s.materialize().unwrap();
        assert_eq!(unsafe { alloc::read_c_string(address) }, "abc");
        assert_eq!(s.materialize().unwrap(), address);
        assert_eq!(ctx.registry().live_bytes(), 4);
    }

    #[test]
    fn test_lookup_resolves_string() {
        let ctx = NativeContext::default();
        let s = CharSxp::new(&ctx, "x");
        let handle = s.ensure_mirror().unwrap();
        match ctx.lookup(handle).unwrap() {
            Sexp::Char(found) => assert!(found.ptr_eq(&s)),
            other => panic!("expected a string element, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_releases_mirror() {
        let ctx = NativeContext::default();
        let s = CharSxp::new(&ctx, "gone");
        s.materialize().unwrap();
        drop(s);
        assert!(ctx.wait_idle(std::time::Duration::from_secs(10)));
        assert!(ctx.registry().is_empty());
        assert_eq!(ctx.registry().live_bytes(), 0);
    }

    #[test]
    fn test_context_dropped() {
        let ctx = NativeContext::default();
        let s = CharSxp::new(&ctx, "orphan");
        drop(ctx);
        assert!(s.ensure_mirror().is_err());
    }
}
