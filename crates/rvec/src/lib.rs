pub mod alloc;
pub mod charsxp;
pub mod config;
pub mod context;
pub mod element;
pub mod error;
pub mod inspector;
pub mod mirror;
pub mod reclaim;
pub mod registry;
pub mod sharing;
pub mod storage;
pub mod switch;
pub mod value;
pub mod vector;

#[cfg(test)]
mod tests;

pub use charsxp::CharSxp;
pub use config::NativeConfig;
pub use context::NativeContext;
pub use element::NativeElement;
pub use error::{AccessError, NativeError, VecError, VecResult};
pub use inspector::{InspectorSnapshot, NativeDataInspector};
pub use mirror::{Handle, NativeMirror};
pub use storage::{Elem, Managed};
pub use switch::PromotionSwitch;
pub use value::{DataFrame, Factor, Frame, Value};
pub use vector::{Sexp, Vector};

pub use rvec_val::{Complex, ElemType, Logical, SharingState, SharingTrigger};
