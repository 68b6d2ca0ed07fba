use crate::charsxp::CharSxp;
use crate::vector::Vector;
use ecow::EcoString;
use indexmap::IndexMap;
use rvec_val::{same, Shared};
use std::fmt;

/// A tabular wrapper over a list of columns
#[derive(Clone, Debug)]
pub struct DataFrame {
    pub columns: Vector,
}

/// Integer codes into a vector of levels
#[derive(Clone, Debug)]
pub struct Factor {
    pub codes: Vector,
    pub levels: Vector,
}

/// A value as the interpreter binds and passes it
#[derive(Clone)]
pub enum Value {
    Null,
    Vector(Vector),
    Char(CharSxp),
    DataFrame(DataFrame),
    Factor(Factor),
    /// Reference type, compared and shared by identity
    Env(Shared<Frame>),
}

impl Value {
    /// The vector whose sharing state stands for this value
    pub fn sharing_target(&self) -> Option<&Vector> {
        match self {
            Value::Vector(vector) => Some(vector),
            Value::DataFrame(frame) => Some(&frame.columns),
            Value::Factor(factor) => Some(&factor.codes),
            Value::Null | Value::Char(_) | Value::Env(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&Vector> {
        match self {
            Value::Vector(vector) => Some(vector),
            _ => None,
        }
    }

    /// Identity comparison
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Vector(a), Value::Vector(b)) => a.ptr_eq(b),
            (Value::Char(a), Value::Char(b)) => a.ptr_eq(b),
            (Value::DataFrame(a), Value::DataFrame(b)) => a.columns.ptr_eq(&b.columns),
            (Value::Factor(a), Value::Factor(b)) => {
                a.codes.ptr_eq(&b.codes) && a.levels.ptr_eq(&b.levels)
            }
            (Value::Env(a), Value::Env(b)) => same(a, b),
            _ => false,
        }
    }
}

impl From<Vector> for Value {
    fn from(vector: Vector) -> Self {
        Value::Vector(vector)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Vector(vector) => write!(f, "{:?}", vector),
            Value::Char(string) => write!(f, "{:?}", string),
            Value::DataFrame(frame) => write!(f, "DataFrame({:?})", frame.columns),
            Value::Factor(factor) => write!(f, "Factor({:?})", factor.codes),
            Value::Env(env) => write!(f, "<environment: {:p}>", env.as_ptr()),
        }
    }
}

/// Insertion-ordered binding table
#[derive(Debug, Default, Clone)]
pub struct Frame {
    vars: IndexMap<EcoString, Value>,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Store without applying any sharing transition; see
    /// [`crate::sharing::assign`] for the interpreter's assignment.
    pub fn insert(&mut self, name: impl Into<EcoString>, value: Value) -> Option<Value> {
        self.vars.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.vars.shift_remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(|name| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
