//! Sharing transitions at binding and call sites.
//!
//! The interpreter calls [`assign`] whenever it stores a value into a
//! variable and [`wrap_argument`] (or [`pass_arguments`]) for every evaluated
//! call argument. Nothing else moves a vector's sharing state forward.

use crate::value::{Frame, Value};
use ecow::EcoString;
use rvec_val::{SharingState, SharingTrigger};

/// Bind `value` to `name`, returning the previous binding.
///
/// Only plain vectors take part: rebinding the very same vector leaves its
/// state alone, any other vector moves one step towards `Shared`. Data
/// frames and factors keep their inner vector's state.
pub fn assign(frame: &mut Frame, name: impl Into<EcoString>, value: Value) -> Option<Value> {
    let name = name.into();
    if let Some(vector) = value.as_vector() {
        let rebinding = frame
            .get(&name)
            .is_some_and(|previous| previous.same(&value));
        if !rebinding {
            let state = vector.apply(SharingTrigger::Assign);
            tracing::trace!(%name, %state, "assigned vector");
        }
    }
    frame.insert(name, value)
}

/// Mark an evaluated call argument. Constant arguments are fresh on every
/// evaluation and stay untouched. Returns the resulting state, if the value
/// takes part in sharing at all.
pub fn wrap_argument(value: &Value, constant: bool) -> Option<SharingState> {
    if constant {
        return None;
    }
    value
        .sharing_target()
        .map(|vector| vector.apply(SharingTrigger::PassArgument))
}

/// One evaluated argument of a call
#[derive(Debug, Clone)]
pub struct CallArgument {
    pub value: Value,
    pub constant: bool,
}

impl CallArgument {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            constant: false,
        }
    }

    pub fn constant(value: Value) -> Self {
        Self {
            value,
            constant: true,
        }
    }
}

/// Apply the argument rule to every argument of a call
pub fn pass_arguments(arguments: &[CallArgument]) {
    for argument in arguments {
        wrap_argument(&argument.value, argument.constant);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NativeContext;
    use crate::value::{DataFrame, Frame};
    use crate::vector::Vector;
    use rvec_val::shared;

    #[test]
    fn test_rebinding_same_vector_is_noop() {
        let ctx = NativeContext::default();
        let mut frame = Frame::new();
        let v = Vector::int(&ctx, vec![1]);
        assign(&mut frame, "x", v.clone().into());
        assert_eq!(v.sharing_state(), SharingState::Owned);
        assign(&mut frame, "x", v.clone().into());
        assert_eq!(v.sharing_state(), SharingState::Owned);
    }

    #[test]
    fn test_constant_arguments_untouched() {
        let ctx = NativeContext::default();
        let v = Vector::int(&ctx, vec![1]);
        assert_eq!(wrap_argument(&v.clone().into(), true), None);
        assert_eq!(v.sharing_state(), SharingState::Temporary);
    }

    #[test]
    fn test_data_frame_delegates() {
        let ctx = NativeContext::default();
        let columns = Vector::list(&ctx, vec![Vector::int(&ctx, vec![1, 2])]);
        let value = Value::DataFrame(DataFrame {
            columns: columns.clone(),
        });
        columns.mark_non_temporary();
        assert_eq!(wrap_argument(&value, false), Some(SharingState::Shared));
    }

    #[test]
    fn test_assigning_data_frame_leaves_columns() {
        let ctx = NativeContext::default();
        let columns = Vector::list(&ctx, vec![Vector::int(&ctx, vec![1, 2])]);
        let value = Value::DataFrame(DataFrame {
            columns: columns.clone(),
        });
        let mut frame = Frame::new();
        assign(&mut frame, "x", value);
        let x = frame.get("x").cloned().unwrap();
        assign(&mut frame, "y", x);
        assert_eq!(columns.sharing_state(), SharingState::Temporary);
    }

    #[test]
    fn test_environments_are_exempt() {
        let env = Value::Env(shared(Frame::new()));
        assert_eq!(wrap_argument(&env, false), None);
        let mut frame = Frame::new();
        assign(&mut frame, "e", env);
        assert!(frame.contains("e"));
    }
}
