//! Inline element types and their native byte layout.
//!
//! Integers and logicals are 4 bytes, doubles 8, complex numbers two
//! consecutive doubles (real then imaginary) and raws a single byte. All
//! loads and stores are unaligned so external buffers with odd alignment
//! stay readable.

use crate::storage::{Elem, Managed};
use rvec_val::{double_na, is_double_na, is_int_na, Complex, ElemType, Logical, INT_NA};
use std::fmt;

/// An element stored inline (not through a handle) in native memory
pub trait NativeElement: Copy + fmt::Debug + Send + Sync + 'static {
    const TYPE: ElemType;

    /// # Safety
    ///
    /// `ptr` must be valid for reads of `Self::TYPE.element_size()` bytes.
    unsafe fn load(ptr: *const u8) -> Self;

    /// # Safety
    ///
    /// `ptr` must be valid for writes of `Self::TYPE.element_size()` bytes.
    unsafe fn store(ptr: *mut u8, value: Self);

    fn na() -> Self;

    fn is_na(&self) -> bool;

    fn slice(store: &Managed) -> Option<&Vec<Self>>;

    fn into_elem(self) -> Elem;
}

macro_rules! managed_access {
    ($variant:ident) => {
        fn slice(store: &Managed) -> Option<&Vec<Self>> {
            match store {
                Managed::$variant(values) => Some(values),
                _ => None,
            }
        }

        fn into_elem(self) -> Elem {
            Elem::$variant(self)
        }
    };
}

impl NativeElement for i32 {
    const TYPE: ElemType = ElemType::Int;

    unsafe fn load(ptr: *const u8) -> Self {
        (ptr as *const i32).read_unaligned()
    }

    unsafe fn store(ptr: *mut u8, value: Self) {
        (ptr as *mut i32).write_unaligned(value)
    }

    fn na() -> Self {
        INT_NA
    }

    fn is_na(&self) -> bool {
        is_int_na(*self)
    }

    managed_access!(Int);
}

impl NativeElement for f64 {
    const TYPE: ElemType = ElemType::Double;

    unsafe fn load(ptr: *const u8) -> Self {
        (ptr as *const f64).read_unaligned()
    }

    unsafe fn store(ptr: *mut u8, value: Self) {
        (ptr as *mut f64).write_unaligned(value)
    }

    fn na() -> Self {
        double_na()
    }

    fn is_na(&self) -> bool {
        is_double_na(*self)
    }

    managed_access!(Double);
}

impl NativeElement for Logical {
    const TYPE: ElemType = ElemType::Logical;

    unsafe fn load(ptr: *const u8) -> Self {
        Logical::from_native((ptr as *const i32).read_unaligned())
    }

    unsafe fn store(ptr: *mut u8, value: Self) {
        (ptr as *mut i32).write_unaligned(value.to_native())
    }

    fn na() -> Self {
        Logical::Na
    }

    fn is_na(&self) -> bool {
        Logical::is_na(*self)
    }

    managed_access!(Logical);
}

impl NativeElement for Complex {
    const TYPE: ElemType = ElemType::Complex;

    unsafe fn load(ptr: *const u8) -> Self {
        let re = (ptr as *const f64).read_unaligned();
        let im = (ptr.add(8) as *const f64).read_unaligned();
        Complex::new(re, im)
    }

    unsafe fn store(ptr: *mut u8, value: Self) {
        (ptr as *mut f64).write_unaligned(value.re);
        (ptr.add(8) as *mut f64).write_unaligned(value.im);
    }

    fn na() -> Self {
        Complex::na()
    }

    fn is_na(&self) -> bool {
        Complex::is_na(self)
    }

    managed_access!(Complex);
}

impl NativeElement for u8 {
    const TYPE: ElemType = ElemType::Raw;

    unsafe fn load(ptr: *const u8) -> Self {
        *ptr
    }

    unsafe fn store(ptr: *mut u8, value: Self) {
        *ptr = value
    }

    // raw vectors have no missing value
    fn na() -> Self {
        0
    }

    fn is_na(&self) -> bool {
        false
    }

    managed_access!(Raw);
}

/// Copy managed elements into a native buffer.
///
/// # Safety
///
/// `dst` must be valid for `values.len() * T::TYPE.element_size()` bytes.
pub(crate) unsafe fn copy_out<T: NativeElement>(values: &[T], dst: *mut u8) {
    let width = T::TYPE.element_size();
    for (i, value) in values.iter().enumerate() {
        T::store(dst.add(i * width), *value);
    }
}

/// Copy `count` elements out of a native buffer.
///
/// # Safety
///
/// `src` must be valid for `count * T::TYPE.element_size()` bytes.
pub(crate) unsafe fn copy_in<T: NativeElement>(src: *const u8, count: usize) -> Vec<T> {
    let width = T::TYPE.element_size();
    (0..count).map(|i| T::load(src.add(i * width))).collect()
}
