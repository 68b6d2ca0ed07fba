//! Typed vectors
//!
//! A vector holds its elements either in a managed buffer or, once promoted,
//! in native memory owned by its mirror; never both, and promotion is one
//! way. Reads and writes first consult the type's promotion switch: while no
//! vector of the type has ever been promoted, the managed buffer is used
//! without looking for a mirror.
//!
//! String and list elements are never stored inline in native memory. Each
//! element gets its own mirror and the parent's buffer holds one 8-byte
//! handle per slot.

use crate::alloc;
use crate::charsxp::CharSxp;
use crate::context::{ContextInner, NativeContext};
use crate::element::{copy_in, copy_out, NativeElement};
use crate::error::{AccessError, NativeError, VecError, VecResult};
use crate::mirror::{Backing, Handle, NativeMirror, OwnerRef};
use crate::storage::{Elem, Managed};
use crate::switch::PromotionSwitch;
use ecow::EcoString;
use rvec_val::{Complex, ElemType, Logical, SharingCell, SharingState, SharingTrigger};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Anything a handle can name
#[derive(Clone, Debug)]
pub enum Sexp {
    Vector(Vector),
    Char(CharSxp),
}

impl Sexp {
    pub fn handle(&self) -> Handle {
        match self {
            Sexp::Vector(vector) => vector.handle(),
            Sexp::Char(string) => string.handle(),
        }
    }

    pub fn ensure_mirror(&self) -> VecResult<Handle> {
        match self {
            Sexp::Vector(vector) => vector.ensure_mirror(),
            Sexp::Char(string) => string.ensure_mirror(),
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Sexp::Vector(vector) => Some(vector),
            Sexp::Char(_) => None,
        }
    }

    pub fn as_char(&self) -> Option<&CharSxp> {
        match self {
            Sexp::Char(string) => Some(string),
            Sexp::Vector(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &Sexp) -> bool {
        match (self, other) {
            (Sexp::Vector(a), Sexp::Vector(b)) => a.ptr_eq(b),
            (Sexp::Char(a), Sexp::Char(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub(crate) fn into_elem(self) -> Elem {
        match self {
            Sexp::Vector(vector) => Elem::List(vector),
            Sexp::Char(string) => Elem::Str(string),
        }
    }

    /// The indirect part of an element, if it has one
    pub(crate) fn from_elem(elem: &Elem) -> Option<Sexp> {
        match elem {
            Elem::Str(string) => Some(Sexp::Char(string.clone())),
            Elem::List(vector) => Some(Sexp::Vector(vector.clone())),
            _ => None,
        }
    }
}

struct Body {
    length: usize,
    true_length: usize,
    complete: bool,
    managed: Option<Managed>,
    mirror: Option<Arc<NativeMirror>>,
}

pub struct VectorCell {
    ctx: Arc<ContextInner>,
    ty: ElemType,
    sharing: SharingCell,
    body: Mutex<Body>,
}

impl Drop for VectorCell {
    fn drop(&mut self) {
        let body = self.body.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(mirror) = body.mirror.take() {
            self.ctx.reclaimer.enqueue(mirror);
        }
    }
}

/// Handle to a vector. Clones share the same instance; identity is the
/// pointer.
#[derive(Clone)]
pub struct Vector(Arc<VectorCell>);

impl From<Arc<VectorCell>> for Vector {
    fn from(cell: Arc<VectorCell>) -> Self {
        Self(cell)
    }
}

// Element snapshot of an indirect vector, each element with its handle
type HandleSnapshot = Vec<(Sexp, Handle)>;

impl Vector {
    // =========================================================================
    // Construction
    // =========================================================================

    /// A fresh temporary vector over a managed buffer
    pub fn new(ctx: &NativeContext, store: Managed) -> Vector {
        let length = store.capacity();
        let complete = store.is_complete(length);
        Vector(Arc::new(VectorCell {
            ctx: ctx.inner().clone(),
            ty: store.elem_type(),
            sharing: SharingCell::new(),
            body: Mutex::new(Body {
                length,
                true_length: length,
                complete,
                managed: Some(store),
                mirror: None,
            }),
        }))
    }

    pub fn int(ctx: &NativeContext, values: Vec<i32>) -> Vector {
        Vector::new(ctx, Managed::Int(values))
    }

    pub fn double(ctx: &NativeContext, values: Vec<f64>) -> Vector {
        Vector::new(ctx, Managed::Double(values))
    }

    pub fn logical(ctx: &NativeContext, values: Vec<Logical>) -> Vector {
        Vector::new(ctx, Managed::Logical(values))
    }

    pub fn complex(ctx: &NativeContext, values: Vec<Complex>) -> Vector {
        Vector::new(ctx, Managed::Complex(values))
    }

    pub fn raw(ctx: &NativeContext, values: Vec<u8>) -> Vector {
        Vector::new(ctx, Managed::Raw(values))
    }

    pub fn strings<I, S>(ctx: &NativeContext, values: I) -> Vector
    where
        I: IntoIterator<Item = S>,
        S: Into<EcoString>,
    {
        let elements = values
            .into_iter()
            .map(|value| CharSxp::new(ctx, value))
            .collect();
        Vector::new(ctx, Managed::Str(elements))
    }

    pub fn list(ctx: &NativeContext, values: Vec<Vector>) -> Vector {
        Vector::new(ctx, Managed::List(values))
    }

    /// The empty list
    pub fn null(ctx: &NativeContext) -> Vector {
        Vector::list(ctx, Vec::new())
    }

    /// `true_length` NA slots of which the first `length` are in use
    pub fn with_capacity(
        ctx: &NativeContext,
        ty: ElemType,
        length: usize,
        true_length: usize,
    ) -> VecResult<Vector> {
        if length > true_length {
            return Err(AccessError::LengthExceedsCapacity {
                length,
                true_length,
            }
            .into());
        }
        let vector = Vector::new(ctx, Managed::filled(ctx, ty, true_length));
        {
            let mut body = vector.body();
            body.length = length;
            body.complete = body
                .managed
                .as_ref()
                .is_some_and(|store| store.is_complete(length));
        }
        Ok(vector)
    }

    /// Adopt a buffer owned by foreign code. The buffer is read and written
    /// in place and never freed here; growing the vector copies it.
    ///
    /// # Safety
    ///
    /// `address` must point at `length` elements of `ty`'s native layout and
    /// stay valid for as long as the vector (or any native code holding its
    /// handle) uses it.
    pub unsafe fn from_native(
        ctx: &NativeContext,
        ty: ElemType,
        address: usize,
        length: usize,
    ) -> VecResult<Vector> {
        if ty.is_indirect() {
            return Err(AccessError::UnsupportedExternal { ty }.into());
        }
        if address == 0 {
            return Err(NativeError::NullBuffer { length }.into());
        }
        let inner = ctx.inner();
        // the vector never has a managed buffer, so the fast path is off
        inner.switches.flip(ty);
        let vector = Vector(Arc::new(VectorCell {
            ctx: inner.clone(),
            ty,
            sharing: SharingCell::new(),
            body: Mutex::new(Body {
                length,
                true_length: length,
                complete: false,
                managed: None,
                mirror: None,
            }),
        }));
        {
            let mut body = vector.body();
            let mirror = vector.mirror_locked(&mut body);
            mirror.install(
                &inner.registry,
                Backing::External { address },
                length,
                length,
                Vec::new(),
            );
        }
        tracing::debug!(%ty, address, length, "adopted external native buffer");
        Ok(vector)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    fn body(&self) -> MutexGuard<'_, Body> {
        self.0.body.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn elem_type(&self) -> ElemType {
        self.0.ty
    }

    pub fn context(&self) -> NativeContext {
        NativeContext::from_inner(self.0.ctx.clone())
    }

    pub fn ptr_eq(&self, other: &Vector) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn len(&self) -> usize {
        self.body().length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn true_length(&self) -> usize {
        self.body().true_length
    }

    /// No NA among the elements in use. A hint: false does not imply an NA
    /// is present.
    pub fn is_complete(&self) -> bool {
        self.body().complete
    }

    /// Contents live in native memory
    pub fn is_native(&self) -> bool {
        self.body().managed.is_none()
    }

    /// Zero until a mirror is assigned
    pub fn handle(&self) -> Handle {
        self.body()
            .mirror
            .as_ref()
            .map_or(Handle::NONE, |mirror| mirror.handle())
    }

    /// Zero until the contents are materialized
    pub fn data_address(&self) -> usize {
        self.body()
            .mirror
            .as_ref()
            .map_or(0, |mirror| mirror.data_address())
    }

    // =========================================================================
    // Sharing state
    // =========================================================================

    pub fn sharing_state(&self) -> SharingState {
        self.0.sharing.get()
    }

    pub fn apply(&self, trigger: SharingTrigger) -> SharingState {
        self.0.sharing.apply(trigger)
    }

    pub fn mark_non_temporary(&self) {
        self.0.sharing.mark_non_temporary();
    }

    pub fn make_shared(&self) {
        self.0.sharing.make_shared();
    }

    /// A vector safe to write in place: this one unless it is shared, in
    /// which case a fresh copy.
    pub fn make_mut(&self) -> VecResult<Vector> {
        if self.sharing_state().is_shared() {
            self.copy()
        } else {
            Ok(self.clone())
        }
    }

    // =========================================================================
    // Element access
    // =========================================================================

    fn broken(&self) -> VecError {
        AccessError::mismatch(self.0.ty, self.0.ty)
    }

    fn check_type(&self, found: ElemType) -> VecResult<()> {
        if found == self.0.ty {
            Ok(())
        } else {
            Err(AccessError::mismatch(self.0.ty, found))
        }
    }

    fn check_index(body: &Body, index: usize) -> VecResult<()> {
        if index < body.length {
            Ok(())
        } else {
            Err(AccessError::out_of_bounds(index, body.length))
        }
    }

    /// The managed buffer when accesses should use it
    fn managed<'a>(&self, body: &'a Body) -> VecResult<Option<&'a Managed>> {
        match self.0.ctx.switches.get(self.0.ty) {
            // no vector of this type has ever left managed memory
            PromotionSwitch::NeverPromoted => body
                .managed
                .as_ref()
                .map(Some)
                .ok_or_else(|| self.broken()),
            PromotionSwitch::Promoted => Ok(body.managed.as_ref()),
        }
    }

    fn managed_mut<'a>(&self, body: &'a mut Body) -> VecResult<Option<&'a mut Managed>> {
        match self.0.ctx.switches.get(self.0.ty) {
            PromotionSwitch::NeverPromoted => {
                let broken = self.broken();
                body.managed.as_mut().map(Some).ok_or(broken)
            }
            PromotionSwitch::Promoted => Ok(body.managed.as_mut()),
        }
    }

    fn native<'a>(&self, body: &'a Body) -> VecResult<&'a Arc<NativeMirror>> {
        body.mirror.as_ref().ok_or_else(|| self.broken())
    }

    pub fn get(&self, index: usize) -> VecResult<Elem> {
        let body = self.body();
        Self::check_index(&body, index)?;
        if let Some(store) = self.managed(&body)? {
            return store
                .get(index)
                .ok_or_else(|| AccessError::out_of_bounds(index, body.length));
        }
        self.load_native(self.native(&body)?, index)
    }

    fn load_native(&self, mirror: &NativeMirror, index: usize) -> VecResult<Elem> {
        Ok(match self.0.ty {
            ElemType::Int => Elem::Int(mirror.load(index)),
            ElemType::Double => Elem::Double(mirror.load(index)),
            ElemType::Logical => Elem::Logical(mirror.load(index)),
            ElemType::Complex => Elem::Complex(mirror.load(index)),
            ElemType::Raw => Elem::Raw(mirror.load(index)),
            ElemType::Str | ElemType::List => {
                let handle = mirror.load_handle(index);
                let elem = self.0.ctx.registry.lookup(handle)?.into_elem();
                self.check_type(elem.elem_type())?;
                elem
            }
        })
    }

    pub fn get_as<T: NativeElement>(&self, index: usize) -> VecResult<T> {
        self.check_type(T::TYPE)?;
        let body = self.body();
        Self::check_index(&body, index)?;
        if let Some(store) = self.managed(&body)? {
            let values = T::slice(store)
                .ok_or_else(|| AccessError::mismatch(T::TYPE, store.elem_type()))?;
            return Ok(values[index]);
        }
        Ok(self.native(&body)?.load(index))
    }

    /// Store an element.
    ///
    /// Writing a shared vector in place is a caller error: it is only
    /// checked by a debug assertion.
    pub fn set(&self, index: usize, elem: Elem) -> VecResult<()> {
        self.check_type(elem.elem_type())?;
        debug_assert!(
            !self.sharing_state().is_shared(),
            "in-place write to a shared vector"
        );
        let na = elem.is_na();
        // handle of an indirect element, assigned without the lock held
        let mut pending: Option<Handle> = None;
        loop {
            let mut body = self.body();
            Self::check_index(&body, index)?;
            if na {
                body.complete = false;
            }
            if let Some(store) = self.managed_mut(&mut body)? {
                if !store.set(index, elem) {
                    return Err(self.broken());
                }
                return Ok(());
            }
            let mirror = self.native(&body)?.clone();
            let sexp = match Sexp::from_elem(&elem) {
                Some(sexp) => sexp,
                None => {
                    Self::store_inline(&mirror, index, elem);
                    return Ok(());
                }
            };
            match pending {
                Some(handle) => {
                    let previous = mirror.store_handle(index, handle, sexp);
                    drop(body);
                    drop(previous);
                    return Ok(());
                }
                None => {
                    drop(body);
                    pending = Some(sexp.ensure_mirror()?);
                }
            }
        }
    }

    fn store_inline(mirror: &NativeMirror, index: usize, elem: Elem) {
        match elem {
            Elem::Int(value) => mirror.store(index, value),
            Elem::Double(value) => mirror.store(index, value),
            Elem::Logical(value) => mirror.store(index, value),
            Elem::Complex(value) => mirror.store(index, value),
            Elem::Raw(value) => mirror.store(index, value),
            Elem::Str(_) | Elem::List(_) => {}
        }
    }

    pub fn set_as<T: NativeElement>(&self, index: usize, value: T) -> VecResult<()> {
        self.set(index, value.into_elem())
    }

    /// The elements in use
    pub fn to_vec(&self) -> VecResult<Vec<Elem>> {
        (0..self.len()).map(|index| self.get(index)).collect()
    }

    pub fn to_vec_as<T: NativeElement>(&self) -> VecResult<Vec<T>> {
        self.check_type(T::TYPE)?;
        let body = self.body();
        if let Some(store) = self.managed(&body)? {
            let values = T::slice(store)
                .ok_or_else(|| AccessError::mismatch(T::TYPE, store.elem_type()))?;
            return Ok(values[..body.length].to_vec());
        }
        let address = self.native(&body)?.data_address();
        // SAFETY: the native buffer holds at least `length` elements
        Ok(unsafe { copy_in::<T>(address as *const u8, body.length) })
    }

    // =========================================================================
    // Length and capacity
    // =========================================================================

    /// Change the number of elements in use. Never reallocates; growing past
    /// the true length is refused.
    pub fn set_length(&self, length: usize) -> VecResult<()> {
        let mut body = self.body();
        if length > body.true_length {
            return Err(AccessError::LengthExceedsCapacity {
                length,
                true_length: body.true_length,
            }
            .into());
        }
        if length > body.length {
            body.complete = false;
        }
        body.length = length;
        if let Some(mirror) = &body.mirror {
            if mirror.is_allocated() {
                mirror.set_length(length);
            }
        }
        Ok(())
    }

    /// Reallocate to `true_length` slots; new slots hold NA. Reallocates the
    /// native buffer too once promoted; an external buffer is copied into an
    /// owned one.
    pub fn set_true_length(&self, true_length: usize) -> VecResult<()> {
        let ctx = self.context();
        let ty = self.0.ty;
        let mut fillers: HandleSnapshot = Vec::new();
        loop {
            let mut body = self.body();
            if true_length < body.length {
                return Err(AccessError::TrueLengthBelowLength {
                    true_length,
                    length: body.length,
                }
                .into());
            }
            let old = body.true_length;
            if let Some(store) = body.managed.as_mut() {
                store.resize(&ctx, true_length);
                body.true_length = true_length;
                return Ok(());
            }
            let mirror = self.native(&body)?.clone();
            let grown = true_length.saturating_sub(old);
            if ty.is_indirect() && fillers.len() != grown {
                drop(body);
                fillers = Self::fillers(&ctx, ty, grown)?;
                continue;
            }
            let empty = if true_length == 0 {
                ctx.empty_data_address()?
            } else {
                0
            };
            mirror.reallocate(&self.0.ctx.registry, ty.element_size(), true_length, empty)?;
            let dropped = if ty.is_indirect() {
                let fillers = std::mem::take(&mut fillers);
                for (offset, (sexp, handle)) in fillers.into_iter().enumerate() {
                    mirror.store_handle(old + offset, handle, sexp);
                }
                mirror.truncate_pins(true_length)
            } else {
                Self::fill_na(&mirror, ty, old..true_length);
                Vec::new()
            };
            body.true_length = true_length;
            drop(body);
            drop(dropped);
            tracing::trace!(%ty, old, true_length, "reallocated native vector");
            return Ok(());
        }
    }

    /// Fresh mirrored NA elements for indirect slots
    fn fillers(ctx: &NativeContext, ty: ElemType, count: usize) -> VecResult<HandleSnapshot> {
        (0..count)
            .map(|_| {
                let sexp = match ty {
                    ElemType::Str => Sexp::Char(ctx.na_string()),
                    _ => Sexp::Vector(Vector::null(ctx)),
                };
                let handle = sexp.ensure_mirror()?;
                Ok((sexp, handle))
            })
            .collect()
    }

    fn fill_na(mirror: &NativeMirror, ty: ElemType, slots: std::ops::Range<usize>) {
        for index in slots {
            match ty {
                ElemType::Int => mirror.store(index, i32::na()),
                ElemType::Double => mirror.store(index, f64::na()),
                ElemType::Logical => mirror.store(index, Logical::na()),
                ElemType::Complex => mirror.store(index, Complex::na()),
                ElemType::Raw => mirror.store(index, u8::na()),
                ElemType::Str | ElemType::List => {}
            }
        }
    }

    // =========================================================================
    // Mirrors and promotion
    // =========================================================================

    fn mirror_locked(&self, body: &mut Body) -> Arc<NativeMirror> {
        if let Some(mirror) = &body.mirror {
            return mirror.clone();
        }
        let registry = &self.0.ctx.registry;
        let handle = registry.next_handle();
        let mirror = Arc::new(NativeMirror::new(
            handle,
            OwnerRef::Vector(Arc::downgrade(&self.0)),
        ));
        let site = self
            .0
            .ctx
            .allocation_site(|| format!("{} vector of length {}", self.0.ty, body.length));
        registry.register(mirror.clone(), site);
        tracing::debug!(%handle, ty = %self.0.ty, "assigned vector handle");
        body.mirror = Some(mirror.clone());
        mirror
    }

    /// Assign a handle without moving the contents
    pub fn ensure_mirror(&self) -> VecResult<Handle> {
        let mut body = self.body();
        Ok(self.mirror_locked(&mut body).handle())
    }

    /// Move the contents into native memory and return the handle.
    /// Idempotent: a second call allocates nothing.
    pub fn materialize(&self) -> VecResult<Handle> {
        let ty = self.0.ty;
        let mut snapshot = self.element_handles()?;
        loop {
            let mut body = self.body();
            let mirror = self.mirror_locked(&mut body);
            let handle = mirror.handle();
            let Some(store) = body.managed.as_ref() else {
                return Ok(handle);
            };
            if ty.is_indirect() && !Self::snapshot_matches(store, &snapshot) {
                drop(body);
                snapshot = self.element_handles()?;
                continue;
            }
            let true_length = body.true_length;
            let bytes = true_length * ty.element_size();
            let backing = if bytes == 0 {
                Backing::Empty {
                    address: self.0.ctx.empty_data_address()?,
                }
            } else {
                let block = alloc::allocate(bytes)?;
                // SAFETY: the block holds `true_length` elements
                unsafe { Self::write_store(store, &snapshot, block.as_ptr()) };
                Backing::Owned {
                    address: block.as_ptr() as usize,
                    bytes,
                }
            };
            let pins = snapshot.into_iter().map(|(sexp, _)| sexp).collect();
            mirror.install(&self.0.ctx.registry, backing, body.length, true_length, pins);
            // flip before the managed buffer goes, so the fast path never
            // finds a vector without one
            self.0.ctx.switches.flip(ty);
            let managed = body.managed.take();
            drop(body);
            drop(managed);
            tracing::debug!(%handle, %ty, bytes, "promoted vector to native memory");
            return Ok(handle);
        }
    }

    /// Alias of [`Vector::materialize`]
    pub fn promote(&self) -> VecResult<Handle> {
        self.materialize()
    }

    /// Mirror every element of an indirect vector, without holding this
    /// vector's lock (a list may contain itself).
    fn element_handles(&self) -> VecResult<HandleSnapshot> {
        let elements: Vec<Sexp> = match &self.body().managed {
            Some(Managed::Str(values)) => values.iter().cloned().map(Sexp::Char).collect(),
            Some(Managed::List(values)) => values.iter().cloned().map(Sexp::Vector).collect(),
            _ => return Ok(Vec::new()),
        };
        elements
            .into_iter()
            .map(|sexp| {
                let handle = sexp.ensure_mirror()?;
                Ok((sexp, handle))
            })
            .collect()
    }

    fn snapshot_matches(store: &Managed, snapshot: &[(Sexp, Handle)]) -> bool {
        match store {
            Managed::Str(values) => {
                values.len() == snapshot.len()
                    && values.iter().zip(snapshot).all(|(value, (sexp, _))| {
                        sexp.as_char().is_some_and(|string| string.ptr_eq(value))
                    })
            }
            Managed::List(values) => {
                values.len() == snapshot.len()
                    && values.iter().zip(snapshot).all(|(value, (sexp, _))| {
                        sexp.as_vector().is_some_and(|vector| vector.ptr_eq(value))
                    })
            }
            _ => true,
        }
    }

    /// # Safety
    ///
    /// `dst` must hold `store.capacity()` elements of the store's native layout.
    unsafe fn write_store(store: &Managed, handles: &[(Sexp, Handle)], dst: *mut u8) {
        match store {
            Managed::Int(values) => copy_out(values, dst),
            Managed::Double(values) => copy_out(values, dst),
            Managed::Logical(values) => copy_out(values, dst),
            Managed::Complex(values) => copy_out(values, dst),
            Managed::Raw(values) => copy_out(values, dst),
            Managed::Str(_) | Managed::List(_) => {
                for (index, (_, handle)) in handles.iter().enumerate() {
                    (dst.add(index * 8) as *mut u64).write_unaligned(handle.as_u64());
                }
            }
        }
    }

    // =========================================================================
    // Copies
    // =========================================================================

    /// A fresh temporary vector with the same elements, in managed memory.
    /// Elements of a copied list become shared between both lists.
    pub fn copy(&self) -> VecResult<Vector> {
        let store = {
            let body = self.body();
            match self.managed(&body)? {
                Some(store) => store.prefix(body.length),
                None => self.read_native(self.native(&body)?, body.length)?,
            }
        };
        if let Managed::List(values) = &store {
            for value in values {
                value.make_shared();
            }
        }
        Ok(Vector::new(&self.context(), store))
    }

    fn read_native(&self, mirror: &NativeMirror, length: usize) -> VecResult<Managed> {
        let src = mirror.data_address() as *const u8;
        // SAFETY: the native buffer holds at least `length` elements
        Ok(unsafe {
            match self.0.ty {
                ElemType::Int => Managed::Int(copy_in(src, length)),
                ElemType::Double => Managed::Double(copy_in(src, length)),
                ElemType::Logical => Managed::Logical(copy_in(src, length)),
                ElemType::Complex => Managed::Complex(copy_in(src, length)),
                ElemType::Raw => Managed::Raw(copy_in(src, length)),
                ElemType::Str => Managed::Str(
                    (0..length)
                        .map(|index| match self.load_native(mirror, index)? {
                            Elem::Str(string) => Ok(string),
                            other => Err(AccessError::mismatch(ElemType::Str, other.elem_type())),
                        })
                        .collect::<VecResult<_>>()?,
                ),
                ElemType::List => Managed::List(
                    (0..length)
                        .map(|index| match self.load_native(mirror, index)? {
                            Elem::List(vector) => Ok(vector),
                            other => Err(AccessError::mismatch(ElemType::List, other.elem_type())),
                        })
                        .collect::<VecResult<_>>()?,
                ),
            }
        })
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let body = self.body();
        let handle = body
            .mirror
            .as_ref()
            .map_or(Handle::NONE, |mirror| mirror.handle());
        write!(
            f,
            "Vector({}, len={}, {}, handle={})",
            self.0.ty,
            body.length,
            if body.managed.is_some() { "managed" } else { "native" },
            handle
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NativeConfig;
    use pretty_assertions::assert_eq;
    use rvec_val::INT_NA;

    fn ctx() -> NativeContext {
        NativeContext::new(NativeConfig::default())
    }

    #[test]
    fn test_new_vector_is_temporary_and_managed() {
        let ctx = ctx();
        let v = Vector::int(&ctx, vec![1, 2, 3]);
        assert_eq!(v.sharing_state(), SharingState::Temporary);
        assert_eq!(v.handle(), Handle::NONE);
        assert_eq!(v.data_address(), 0);
        assert!(!v.is_native());
        assert!(v.is_complete());
        assert_eq!(v.len(), 3);
        assert_eq!(v.true_length(), 3);
    }

    #[test]
    fn test_get_set_managed() {
        let ctx = ctx();
        let v = Vector::double(&ctx, vec![1.0, 2.0]);
        v.set(1, Elem::Double(5.5)).unwrap();
        assert_eq!(v.get_as::<f64>(1).unwrap(), 5.5);
        assert_eq!(v.get(0).unwrap(), Elem::Double(1.0));
        assert!(v.get(2).is_err());
        assert!(v.set(0, Elem::Int(1)).is_err());
        assert!(v.get_as::<i32>(0).is_err());
    }

    #[test]
    fn test_writing_na_clears_complete() {
        let ctx = ctx();
        let v = Vector::int(&ctx, vec![1, 2]);
        assert!(v.is_complete());
        v.set_as(0, INT_NA).unwrap();
        assert!(!v.is_complete());
    }

    #[test]
    fn test_materialize_copies_contents() {
        let ctx = ctx();
        let v = Vector::complex(&ctx, vec![Complex::new(1.0, 2.0), Complex::new(-3.0, 0.5)]);
        let handle = v.materialize().unwrap();
        assert!(handle.is_materialized());
        assert!(v.is_native());
        assert_ne!(v.data_address(), 0);
        assert_eq!(v.get_as::<Complex>(1).unwrap(), Complex::new(-3.0, 0.5));
        assert_eq!(ctx.registry().live_bytes(), 32);
        assert_eq!(ctx.switch(ElemType::Complex), PromotionSwitch::Promoted);
    }

    #[test]
    fn test_ensure_mirror_assigns_handle_only() {
        let ctx = ctx();
        let v = Vector::raw(&ctx, vec![1, 2, 3]);
        let handle = v.ensure_mirror().unwrap();
        assert!(handle.is_materialized());
        assert_eq!(v.data_address(), 0);
        assert!(!v.is_native());
        assert_eq!(v.materialize().unwrap(), handle);
        assert_ne!(v.data_address(), 0);
    }

    #[test]
    fn test_native_writes() {
        let ctx = ctx();
        let v = Vector::logical(&ctx, vec![Logical::True, Logical::False]);
        v.materialize().unwrap();
        v.set(1, Elem::Logical(Logical::Na)).unwrap();
        assert_eq!(
            v.to_vec().unwrap(),
            vec![Elem::Logical(Logical::True), Elem::Logical(Logical::Na)]
        );
        let raw = unsafe { *((v.data_address() + 4) as *const i32) };
        assert_eq!(raw, i32::MIN);
    }

    #[test]
    fn test_unpromoted_vector_after_switch_flip() {
        let ctx = ctx();
        let promoted = Vector::int(&ctx, vec![1]);
        promoted.materialize().unwrap();
        let managed = Vector::int(&ctx, vec![7, 8]);
        assert_eq!(managed.get_as::<i32>(1).unwrap(), 8);
        managed.set_as(0, 9).unwrap();
        assert_eq!(managed.to_vec_as::<i32>().unwrap(), vec![9, 8]);
    }

    #[test]
    fn test_string_vector_stores_handles() {
        let ctx = ctx();
        let v = Vector::strings(&ctx, ["a", "bb"]);
        v.materialize().unwrap();
        let first = unsafe { (v.data_address() as *const u64).read_unaligned() };
        let element = ctx.lookup(Handle::from_raw(first)).unwrap();
        assert_eq!(element.as_char().map(|s| s.as_str()), Some("a"));
        // element handles carry no data
        assert_eq!(element.as_char().map(|s| s.data_address()), Some(0));
        assert_eq!(v.get(1).unwrap().as_str(), Some("bb"));
        v.set(0, Elem::Str(CharSxp::new(&ctx, "z"))).unwrap();
        assert_eq!(v.get(0).unwrap().as_str(), Some("z"));
    }

    #[test]
    fn test_list_can_contain_itself_when_promoting() {
        let ctx = ctx();
        let inner = Vector::int(&ctx, vec![1]);
        let list = Vector::list(&ctx, vec![inner.clone()]);
        list.materialize().unwrap();
        let got = list.get(0).unwrap();
        assert!(got.as_vector().is_some_and(|v| v.ptr_eq(&inner)));
        assert!(inner.handle().is_materialized());
        assert!(!inner.is_native());
    }

    #[test]
    fn test_set_length() {
        let ctx = ctx();
        let v = Vector::with_capacity(&ctx, ElemType::Int, 2, 4).unwrap();
        assert_eq!(v.len(), 2);
        v.set_length(4).unwrap();
        assert!(v.set_length(5).is_err());
        v.set_length(1).unwrap();
        assert_eq!(v.true_length(), 4);
    }

    #[test]
    fn test_set_true_length_managed() {
        let ctx = ctx();
        let v = Vector::int(&ctx, vec![1, 2]);
        assert!(v.set_true_length(1).is_err());
        v.set_true_length(4).unwrap();
        v.set_length(3).unwrap();
        assert_eq!(v.get_as::<i32>(2).unwrap(), INT_NA);
    }

    #[test]
    fn test_set_true_length_native() {
        let ctx = ctx();
        let v = Vector::double(&ctx, vec![1.0, 2.0]);
        v.materialize().unwrap();
        v.set_true_length(3).unwrap();
        v.set_length(3).unwrap();
        assert_eq!(v.get_as::<f64>(1).unwrap(), 2.0);
        assert!(NativeElement::is_na(&v.get_as::<f64>(2).unwrap()));
        assert_eq!(ctx.registry().live_bytes(), 24);
    }

    #[test]
    fn test_set_true_length_native_strings() {
        let ctx = ctx();
        let v = Vector::strings(&ctx, ["x"]);
        v.materialize().unwrap();
        v.set_true_length(2).unwrap();
        v.set_length(2).unwrap();
        assert!(v.get(1).unwrap().is_na());
        v.set_length(1).unwrap();
        v.set_true_length(1).unwrap();
        assert_eq!(v.get(0).unwrap().as_str(), Some("x"));
    }

    #[test]
    fn test_copy_is_fresh_and_managed() {
        let ctx = ctx();
        let v = Vector::int(&ctx, vec![4, 5, 6]);
        v.materialize().unwrap();
        v.make_shared();
        let copy = v.copy().unwrap();
        assert!(!copy.ptr_eq(&v));
        assert!(!copy.is_native());
        assert_eq!(copy.sharing_state(), SharingState::Temporary);
        assert_eq!(copy.to_vec_as::<i32>().unwrap(), vec![4, 5, 6]);
    }

    #[test]
    fn test_make_mut() {
        let ctx = ctx();
        let v = Vector::int(&ctx, vec![1]);
        assert!(v.make_mut().unwrap().ptr_eq(&v));
        v.make_shared();
        let fresh = v.make_mut().unwrap();
        assert!(!fresh.ptr_eq(&v));
        fresh.set_as(0, 2).unwrap();
        assert_eq!(v.get_as::<i32>(0).unwrap(), 1);
    }

    #[test]
    fn test_copy_list_shares_elements() {
        let ctx = ctx();
        let element = Vector::int(&ctx, vec![1]);
        let list = Vector::list(&ctx, vec![element.clone()]);
        let _copy = list.copy().unwrap();
        assert_eq!(element.sharing_state(), SharingState::Shared);
    }

    #[test]
    fn test_from_native() {
        let ctx = ctx();
        let mut buffer = [1i32, 2, 3];
        let v = unsafe {
            Vector::from_native(&ctx, ElemType::Int, buffer.as_mut_ptr() as usize, 3).unwrap()
        };
        assert!(v.is_native());
        assert_eq!(v.data_address(), buffer.as_ptr() as usize);
        assert_eq!(ctx.switch(ElemType::Int), PromotionSwitch::Promoted);
        v.set_as(1, 20).unwrap();
        assert_eq!(v.to_vec_as::<i32>().unwrap(), vec![1, 20, 3]);
        // growing moves the contents into an owned buffer
        v.set_true_length(4).unwrap();
        assert_ne!(v.data_address(), buffer.as_ptr() as usize);
        assert_eq!(buffer[1], 20);
        drop(v);
        assert!(ctx.wait_idle(std::time::Duration::from_secs(10)));
        assert_eq!(ctx.registry().live_bytes(), 0);
    }

    #[test]
    fn test_from_native_rejects() {
        let ctx = ctx();
        let err = unsafe { Vector::from_native(&ctx, ElemType::Str, 8, 1) }.unwrap_err();
        assert!(matches!(
            err,
            VecError::Access(AccessError::UnsupportedExternal { ty: ElemType::Str })
        ));
        assert!(unsafe { Vector::from_native(&ctx, ElemType::Int, 0, 1) }.is_err());
    }
}
