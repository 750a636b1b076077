//! Runtime values
//!
//! `Value` is `Copy`: scalars inline, everything else a handle into the
//! VM heap. Handles stay valid as long as the value is reachable from a
//! GC root.

use serde::Serialize;
use std::fmt;

/// Handle to a heap slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ObjRef(pub u32);

impl ObjRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Handle to a loaded execution context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(pub u32);

impl ContextId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Handle to a registered native function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct NativeId(pub u32);

/// A script function: its context plus its function-table index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FunctionRef {
    pub context: ContextId,
    pub index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub enum Value {
    #[default]
    Null,
    Int(i64),
    Float(f64),
    Object(ObjRef),
    /// Class reference produced by `using`; the payload is an interned name
    Symbol(u32),
    Function(FunctionRef),
    Native(NativeId),
}

impl Value {
    pub fn is_truthy(&self) -> bool {
        match *self {
            Value::Null => false,
            Value::Int(v) => v != 0,
            Value::Float(v) => v != 0.0,
            _ => true,
        }
    }

    pub fn from_bool(value: bool) -> Self {
        Value::Int(value as i64)
    }

    pub fn as_int(&self) -> Option<i64> {
        match *self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Numeric view; ints widen to float
    pub fn as_number(&self) -> Option<f64> {
        match *self {
            Value::Int(v) => Some(v as f64),
            Value::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match *self {
            Value::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::from_bool(v)
    }
}

/// Formats a float so it always reads back as a float (`2.0`, not `2`)
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}
