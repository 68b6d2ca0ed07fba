//! Sharing states for copy-on-modify value semantics
//!
//! A vector starts `Temporary`, becomes `Owned` once something binds it and
//! `Shared` once a second binding can observe it. The state only moves forward;
//! a vector leaves `Shared` only by being copied into a new instance.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Ownership marker deciding whether a vector may be mutated in place
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SharingState {
    /// Freshly constructed, reachable from a single place
    Temporary,
    /// Bound to exactly one variable
    Owned,
    /// Reachable from two or more bindings, writers must copy first
    Shared,
}

/// Boundary at which the sharing state is updated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SharingTrigger {
    Assign,
    PassArgument,
}

impl SharingState {
    /// Successor state for a trigger. Total over every (state, trigger) pair.
    pub fn after(self, trigger: SharingTrigger) -> SharingState {
        match (self, trigger) {
            (SharingState::Temporary, _) => SharingState::Owned,
            (SharingState::Owned, _) => SharingState::Shared,
            (SharingState::Shared, _) => SharingState::Shared,
        }
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temporary)
    }

    pub fn is_shared(&self) -> bool {
        matches!(self, Self::Shared)
    }

    pub fn allows_in_place_write(&self) -> bool {
        !self.is_shared()
    }

    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(raw: u8) -> SharingState {
        match raw {
            0 => SharingState::Temporary,
            1 => SharingState::Owned,
            _ => SharingState::Shared,
        }
    }
}

impl fmt::Display for SharingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Temporary => write!(f, "temporary"),
            Self::Owned => write!(f, "owned"),
            Self::Shared => write!(f, "shared"),
        }
    }
}

/// Per-instance holder of a [`SharingState`].
///
/// Atomic only so the owning vector stays `Sync`; transitions are plain
/// load/store pairs and assume a single mutating execution context.
#[derive(Debug)]
pub struct SharingCell {
    state: AtomicU8,
}

impl Default for SharingCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SharingCell {
    pub fn new() -> Self {
        Self::with_state(SharingState::Temporary)
    }

    pub fn with_state(state: SharingState) -> Self {
        Self {
            state: AtomicU8::new(state.as_u8()),
        }
    }

    pub fn get(&self) -> SharingState {
        SharingState::from_u8(self.state.load(Ordering::Relaxed))
    }

    /// Apply a trigger and return the new state
    pub fn apply(&self, trigger: SharingTrigger) -> SharingState {
        let next = self.get().after(trigger);
        self.state.store(next.as_u8(), Ordering::Relaxed);
        next
    }

    /// Temporary -> Owned, other states unchanged
    pub fn mark_non_temporary(&self) {
        if self.get().is_temporary() {
            self.state.store(SharingState::Owned.as_u8(), Ordering::Relaxed);
        }
    }

    pub fn make_shared(&self) {
        self.state.store(SharingState::Shared.as_u8(), Ordering::Relaxed);
    }
}
