//! Scalar encodings shared by managed and native storage.
//!
//! Missing values follow the usual array-language conventions: the smallest
//! `i32` for integers and logicals, and a NaN with payload 1954 for doubles.

use std::fmt;

pub const INT_NA: i32 = i32::MIN;

const DOUBLE_NA_BITS: u64 = 0x7FF0_0000_0000_07A2;
const DOUBLE_NA_PAYLOAD: u32 = 1954;

pub fn double_na() -> f64 {
    f64::from_bits(DOUBLE_NA_BITS)
}

pub fn is_int_na(value: i32) -> bool {
    value == INT_NA
}

/// True only for the NA payload, ordinary NaN is not NA.
pub fn is_double_na(value: f64) -> bool {
    value.is_nan() && (value.to_bits() & 0xFFFF_FFFF) as u32 == DOUBLE_NA_PAYLOAD
}

/// Three-valued logical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Logical {
    #[default]
    False = 0,
    True = 1,
    Na = 255,
}

impl Logical {
    /// Native layout is a 4-byte int.
    pub fn to_native(self) -> i32 {
        match self {
            Logical::False => 0,
            Logical::True => 1,
            Logical::Na => INT_NA,
        }
    }

    /// Any non-zero, non-NA int decodes as true.
    pub fn from_native(value: i32) -> Logical {
        match value {
            0 => Logical::False,
            INT_NA => Logical::Na,
            _ => Logical::True,
        }
    }

    pub fn is_na(self) -> bool {
        matches!(self, Logical::Na)
    }
}

impl From<bool> for Logical {
    fn from(value: bool) -> Self {
        if value {
            Logical::True
        } else {
            Logical::False
        }
    }
}

impl fmt::Display for Logical {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Logical::False => write!(f, "FALSE"),
            Logical::True => write!(f, "TRUE"),
            Logical::Na => write!(f, "NA"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Complex {
    pub re: f64,
    pub im: f64,
}

impl Complex {
    pub const fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    pub fn na() -> Self {
        Self {
            re: double_na(),
            im: 0.0,
        }
    }

    pub fn is_na(&self) -> bool {
        is_double_na(self.re)
    }
}

impl fmt::Display for Complex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_na() {
            return write!(f, "NA");
        }
        if self.im < 0.0 {
            write!(f, "{}-{}i", self.re, -self.im)
        } else {
            write!(f, "{}+{}i", self.re, self.im)
        }
    }
}
