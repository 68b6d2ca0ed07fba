use serde::Serialize;
use strum::{EnumCount, IntoEnumIterator};
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter};

/// Element type of a homogeneous vector.
///
/// The discriminant doubles as a dense index, so per-type tables
/// (promotion switches, statistics) can be plain arrays of `ElemType::COUNT`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, EnumCountMacro, Serialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ElemType {
    Int,
    Double,
    Logical,
    Complex,
    Raw,
    Str,
    List,
}

impl ElemType {
    /// Width in bytes of one element once the vector lives in native memory.
    ///
    /// Logicals widen to 4-byte ints, complex numbers take two doubles and
    /// strings/lists store one 8-byte handle per element.
    pub const fn element_size(self) -> usize {
        match self {
            ElemType::Int => 4,
            ElemType::Double => 8,
            ElemType::Logical => 4,
            ElemType::Complex => 16,
            ElemType::Raw => 1,
            ElemType::Str => 8,
            ElemType::List => 8,
        }
    }

    /// Elements are references to other objects rather than inline bits.
    pub const fn is_indirect(self) -> bool {
        matches!(self, ElemType::Str | ElemType::List)
    }

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<ElemType> {
        ElemType::iter().nth(index)
    }

    pub fn all() -> impl Iterator<Item = ElemType> {
        ElemType::iter()
    }

    pub const fn count() -> usize {
        <ElemType as EnumCount>::COUNT
    }
}
