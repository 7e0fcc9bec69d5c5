//! Values passed to and returned from module methods.
//!
//! Arguments travel as an explicit, sized `Vec<Value>`.  Pointer and
//! dictionary values alias memory owned elsewhere through `Rc`, so a module
//! handing one back never transfers ownership to the caller.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// Shared dictionary payload.
pub type Dict = Rc<RefCell<BTreeMap<String, Value>>>;

// ── ValueKind ─────────────────────────────────────────────────────────────────

/// Kind tag of a variable or result slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValueKind {
    /// No result has been set during the current call.
    #[default]
    Unknown,
    Numeric,
    String,
    Pointer,
    Dictionary,
}

// ── Value ─────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub enum Value {
    Int(i64),
    Str(String),
    Pointer(Rc<dyn Any>),
    Dict(Dict),
}

impl Default for Value {
    fn default() -> Self {
        Value::Str(String::new())
    }
}

impl Value {
    pub fn pointer<T: Any>(v: T) -> Self {
        Value::Pointer(Rc::new(v))
    }

    pub fn dict() -> Self {
        Value::Dict(Rc::new(RefCell::new(BTreeMap::new())))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Numeric,
            Value::Str(_) => ValueKind::String,
            Value::Pointer(_) => ValueKind::Pointer,
            Value::Dict(_) => ValueKind::Dictionary,
        }
    }

    /// Coerce to `i64`; non-numeric strings and references become 0.
    pub fn as_int(&self) -> i64 {
        match self {
            Value::Int(n) => *n,
            Value::Str(s) => s.trim().parse().unwrap_or(0),
            Value::Pointer(_) | Value::Dict(_) => 0,
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Downcast a pointer payload.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Pointer(p) => p.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Truthiness: 0, `""` and `"0"` are false; references are true.
    pub fn as_bool(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty() && s != "0",
            Value::Pointer(_) | Value::Dict(_) => true,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

// References compare by identity, scalars by value.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "Int({n})"),
            Value::Str(s) => write!(f, "Str({s:?})"),
            Value::Pointer(p) => write!(f, "Pointer({:p})", Rc::as_ptr(p)),
            Value::Dict(d) => match d.try_borrow() {
                Ok(map) => f.debug_map().entries(map.iter()).finish(),
                Err(_) => f.write_str("Dict(<borrowed>)"),
            },
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{n}"),
            Value::Str(s) => f.write_str(s),
            Value::Pointer(p) => write!(f, "<pointer {:p}>", Rc::as_ptr(p)),
            Value::Dict(d) => write!(f, "<dictionary {:p}>", Rc::as_ptr(d)),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
