//! Kind-tagged variable store.
//!
//! Every module instance carries one; the registry keeps another for
//! host-wide settings shared with all instances.  Each entry's kind is the
//! kind of the [`Value`] stored in it.

use std::collections::HashMap;

use crate::value::{Value, ValueKind};

/// Name → value store.
#[derive(Debug, Default, Clone)]
pub struct VarStore {
    vars: HashMap<String, Value>,
}

impl VarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set, overwrite, or (with `None`) remove a variable.
    ///
    /// Overwriting drops the previous value, so an owned string is released
    /// before the new one takes its place.
    pub fn set(&mut self, name: impl Into<String>, value: Option<Value>) {
        let name = name.into();
        match value {
            Some(v) => {
                self.vars.insert(name, v);
            }
            None => {
                self.vars.remove(&name);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Kind of a stored variable, `Unknown` if unset.
    pub fn kind(&self, name: &str) -> ValueKind {
        self.vars.get(name).map(Value::kind).unwrap_or_default()
    }

    /// Get the value of a variable coerced to an integer.
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.vars.get(name)? {
            Value::Int(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Remove a variable.  Returns `true` if it existed.
    pub fn unset(&mut self, name: &str) -> bool {
        self.vars.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
