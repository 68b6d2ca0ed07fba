//! Per-type promotion switches.
//!
//! While no vector of a type has ever been moved to native memory, every
//! access to vectors of that type can take the managed path without checking
//! for a mirror. The first promotion flips the switch for good.

use rvec_val::ElemType;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PromotionSwitch {
    NeverPromoted,
    Promoted,
}

#[derive(Debug)]
pub struct PromotionSwitches {
    promoted: [AtomicBool; ElemType::count()],
}

impl Default for PromotionSwitches {
    fn default() -> Self {
        Self::new()
    }
}

impl PromotionSwitches {
    pub fn new() -> Self {
        Self {
            promoted: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    pub fn get(&self, ty: ElemType) -> PromotionSwitch {
        if self.promoted[ty.index()].load(Ordering::Acquire) {
            PromotionSwitch::Promoted
        } else {
            PromotionSwitch::NeverPromoted
        }
    }

    pub fn is_promoted(&self, ty: ElemType) -> bool {
        self.get(ty) == PromotionSwitch::Promoted
    }

    /// Flip the switch for `ty`. Returns true only for the call that flipped it.
    pub fn flip(&self, ty: ElemType) -> bool {
        let first = !self.promoted[ty.index()].swap(true, Ordering::AcqRel);
        if first {
            tracing::debug!(%ty, "promotion switch flipped");
        }
        first
    }
}
