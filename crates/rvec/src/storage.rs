//! Managed (in-process) representation of vector contents.
//!
//! A managed buffer always holds `true_length` elements; the logical length
//! is tracked by the owning vector. Slots past the logical length hold NA.

use crate::charsxp::CharSxp;
use crate::context::NativeContext;
use crate::element::NativeElement;
use crate::vector::Vector;
use rvec_val::{Complex, ElemType, Logical};
use std::fmt;

/// One element, tagged with its type
#[derive(Clone)]
pub enum Elem {
    Int(i32),
    Double(f64),
    Logical(Logical),
    Complex(Complex),
    Raw(u8),
    Str(CharSxp),
    List(Vector),
}

impl Elem {
    pub fn elem_type(&self) -> ElemType {
        match self {
            Elem::Int(_) => ElemType::Int,
            Elem::Double(_) => ElemType::Double,
            Elem::Logical(_) => ElemType::Logical,
            Elem::Complex(_) => ElemType::Complex,
            Elem::Raw(_) => ElemType::Raw,
            Elem::Str(_) => ElemType::Str,
            Elem::List(_) => ElemType::List,
        }
    }

    pub fn is_na(&self) -> bool {
        match self {
            Elem::Int(v) => v.is_na(),
            Elem::Double(v) => NativeElement::is_na(v),
            Elem::Logical(v) => v.is_na(),
            Elem::Complex(v) => v.is_na(),
            Elem::Raw(_) => false,
            Elem::Str(s) => s.is_na(),
            Elem::List(_) => false,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Elem::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Elem::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Elem::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Elem::List(v) => Some(v),
            _ => None,
        }
    }
}

/// Identity for indirect elements, value equality for inline ones
impl PartialEq for Elem {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Elem::Int(a), Elem::Int(b)) => a == b,
            (Elem::Double(a), Elem::Double(b)) => a.to_bits() == b.to_bits() || a == b,
            (Elem::Logical(a), Elem::Logical(b)) => a == b,
            (Elem::Complex(a), Elem::Complex(b)) => a == b,
            (Elem::Raw(a), Elem::Raw(b)) => a == b,
            (Elem::Str(a), Elem::Str(b)) => a.as_str() == b.as_str() && a.is_na() == b.is_na(),
            (Elem::List(a), Elem::List(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Elem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Elem::Int(v) => write!(f, "Int({})", v),
            Elem::Double(v) => write!(f, "Double({})", v),
            Elem::Logical(v) => write!(f, "Logical({})", v),
            Elem::Complex(v) => write!(f, "Complex({})", v),
            Elem::Raw(v) => write!(f, "Raw({:#04x})", v),
            Elem::Str(s) => write!(f, "Str({:?})", s.as_str()),
            Elem::List(v) => write!(f, "List({:?})", v),
        }
    }
}

impl From<i32> for Elem {
    fn from(value: i32) -> Self {
        Elem::Int(value)
    }
}

impl From<f64> for Elem {
    fn from(value: f64) -> Self {
        Elem::Double(value)
    }
}

impl From<Logical> for Elem {
    fn from(value: Logical) -> Self {
        Elem::Logical(value)
    }
}

impl From<Complex> for Elem {
    fn from(value: Complex) -> Self {
        Elem::Complex(value)
    }
}

impl From<u8> for Elem {
    fn from(value: u8) -> Self {
        Elem::Raw(value)
    }
}

impl From<CharSxp> for Elem {
    fn from(value: CharSxp) -> Self {
        Elem::Str(value)
    }
}

impl From<Vector> for Elem {
    fn from(value: Vector) -> Self {
        Elem::List(value)
    }
}

/// Managed buffer, one variant per element type
#[derive(Clone)]
pub enum Managed {
    Int(Vec<i32>),
    Double(Vec<f64>),
    Logical(Vec<Logical>),
    Complex(Vec<Complex>),
    Raw(Vec<u8>),
    Str(Vec<CharSxp>),
    List(Vec<Vector>),
}

macro_rules! each_managed {
    ($store:expr, $values:ident => $body:expr) => {
        match $store {
            Managed::Int($values) => $body,
            Managed::Double($values) => $body,
            Managed::Logical($values) => $body,
            Managed::Complex($values) => $body,
            Managed::Raw($values) => $body,
            Managed::Str($values) => $body,
            Managed::List($values) => $body,
        }
    };
}

impl Managed {
    pub fn elem_type(&self) -> ElemType {
        match self {
            Managed::Int(_) => ElemType::Int,
            Managed::Double(_) => ElemType::Double,
            Managed::Logical(_) => ElemType::Logical,
            Managed::Complex(_) => ElemType::Complex,
            Managed::Raw(_) => ElemType::Raw,
            Managed::Str(_) => ElemType::Str,
            Managed::List(_) => ElemType::List,
        }
    }

    /// Number of allocated slots, i.e. the true length
    pub fn capacity(&self) -> usize {
        each_managed!(self, values => values.len())
    }

    /// A buffer of `len` NA slots
    pub fn filled(ctx: &NativeContext, ty: ElemType, len: usize) -> Managed {
        let mut store = Managed::empty(ty);
        store.resize(ctx, len);
        store
    }

    pub fn empty(ty: ElemType) -> Managed {
        match ty {
            ElemType::Int => Managed::Int(Vec::new()),
            ElemType::Double => Managed::Double(Vec::new()),
            ElemType::Logical => Managed::Logical(Vec::new()),
            ElemType::Complex => Managed::Complex(Vec::new()),
            ElemType::Raw => Managed::Raw(Vec::new()),
            ElemType::Str => Managed::Str(Vec::new()),
            ElemType::List => Managed::List(Vec::new()),
        }
    }

    pub fn get(&self, index: usize) -> Option<Elem> {
        match self {
            Managed::Int(v) => v.get(index).map(|x| Elem::Int(*x)),
            Managed::Double(v) => v.get(index).map(|x| Elem::Double(*x)),
            Managed::Logical(v) => v.get(index).map(|x| Elem::Logical(*x)),
            Managed::Complex(v) => v.get(index).map(|x| Elem::Complex(*x)),
            Managed::Raw(v) => v.get(index).map(|x| Elem::Raw(*x)),
            Managed::Str(v) => v.get(index).map(|x| Elem::Str(x.clone())),
            Managed::List(v) => v.get(index).map(|x| Elem::List(x.clone())),
        }
    }

    /// Store an element; false when the element type does not match
    pub fn set(&mut self, index: usize, elem: Elem) -> bool {
        match (self, elem) {
            (Managed::Int(v), Elem::Int(x)) => v[index] = x,
            (Managed::Double(v), Elem::Double(x)) => v[index] = x,
            (Managed::Logical(v), Elem::Logical(x)) => v[index] = x,
            (Managed::Complex(v), Elem::Complex(x)) => v[index] = x,
            (Managed::Raw(v), Elem::Raw(x)) => v[index] = x,
            (Managed::Str(v), Elem::Str(x)) => v[index] = x,
            (Managed::List(v), Elem::List(x)) => v[index] = x,
            _ => return false,
        }
        true
    }

    /// Resize to `len` slots, filling new slots with NA (fresh empty lists
    /// for list vectors)
    pub fn resize(&mut self, ctx: &NativeContext, len: usize) {
        match self {
            Managed::Int(v) => v.resize(len, i32::na()),
            Managed::Double(v) => v.resize(len, f64::na()),
            Managed::Logical(v) => v.resize(len, Logical::na()),
            Managed::Complex(v) => v.resize(len, Complex::na()),
            Managed::Raw(v) => v.resize(len, u8::na()),
            Managed::Str(v) => v.resize_with(len, || CharSxp::na(ctx)),
            Managed::List(v) => v.resize_with(len, || Vector::null(ctx)),
        }
    }

    /// Copy of the first `len` slots
    pub fn prefix(&self, len: usize) -> Managed {
        match self {
            Managed::Int(v) => Managed::Int(v[..len].to_vec()),
            Managed::Double(v) => Managed::Double(v[..len].to_vec()),
            Managed::Logical(v) => Managed::Logical(v[..len].to_vec()),
            Managed::Complex(v) => Managed::Complex(v[..len].to_vec()),
            Managed::Raw(v) => Managed::Raw(v[..len].to_vec()),
            Managed::Str(v) => Managed::Str(v[..len].to_vec()),
            Managed::List(v) => Managed::List(v[..len].to_vec()),
        }
    }

    /// No NA among the first `len` slots
    pub fn is_complete(&self, len: usize) -> bool {
        match self {
            Managed::Int(v) => !v[..len].iter().any(|x| x.is_na()),
            Managed::Double(v) => !v[..len].iter().any(|x| NativeElement::is_na(x)),
            Managed::Logical(v) => !v[..len].iter().any(|x| x.is_na()),
            Managed::Complex(v) => !v[..len].iter().any(|x| x.is_na()),
            Managed::Raw(_) => true,
            Managed::Str(v) => !v[..len].iter().any(|x| x.is_na()),
            Managed::List(_) => true,
        }
    }
}
