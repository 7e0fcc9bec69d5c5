//! One instantiated module.
//!
//! A [`ModuleInstance`] is a small runtime-defined object: a table of named
//! native methods, a kind-tagged variable store, a typed private-state table,
//! the argument list of the call in progress, and the result of that call.
//!
//! Methods read their arguments positionally via [`ModuleInstance::arg`] and
//! report a result with [`ModuleInstance::set_result`]:
//!
//! ```rust
//! use cmdscript::{ModuleInstance, Value};
//!
//! let mut inst = ModuleInstance::new();
//! inst.add_method("add", "A/N B/N", |inst| {
//!     let sum = inst.arg(0).as_int() + inst.arg(1).as_int();
//!     inst.set_result(Value::Int(sum));
//!     Ok(())
//! });
//! inst.execute("add", vec![Value::Int(2), Value::Int(3)]).unwrap();
//! assert_eq!(inst.result(), Some(&Value::Int(5)));
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};
use crate::var::VarStore;

/// Native method body.  `Err` carries a message for the caller.
pub type MethodFn = Rc<dyn Fn(&mut ModuleInstance) -> Result<(), String>>;

/// Shared, interior-mutable handle to an instance.
pub type InstanceRef = Rc<RefCell<ModuleInstance>>;

/// Host variables the registry shares with every instance it creates.
pub type SharedVars = Rc<RefCell<VarStore>>;

// ── MethodEntry ───────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MethodEntry {
    pub name: String,
    /// Informational parameter signature; never checked at call time.
    pub signature: String,
    func: MethodFn,
}

impl fmt::Debug for MethodEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodEntry")
            .field("name", &self.name)
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

// ── ModuleInstance ────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct ModuleInstance {
    /// Registry-assigned identity; 0 until tracked.
    id: u64,
    /// Name of the owning module definition.
    module: String,
    shared: Option<SharedVars>,
    methods: HashMap<String, MethodEntry>,
    vars: VarStore,
    private: HashMap<String, Box<dyn Any>>,
    /// Arguments of the call in progress.
    args: Vec<Value>,
    /// `None` means the result kind is `Unknown`.
    result: Option<Value>,
}

impl ModuleInstance {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called by the registry when it starts tracking this instance.
    pub(crate) fn attach(&mut self, id: u64, module: &str, shared: SharedVars) {
        self.id = id;
        self.module = module.to_owned();
        self.shared = Some(shared);
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn module_name(&self) -> &str {
        &self.module
    }

    /// Host variables of the registry that created this instance.
    pub fn shared(&self) -> Option<&SharedVars> {
        self.shared.as_ref()
    }

    // ── Methods ───────────────────────────────────────────────────────────────

    /// Insert or overwrite a method.
    pub fn add_method<F>(&mut self, name: &str, signature: &str, func: F)
    where
        F: Fn(&mut ModuleInstance) -> Result<(), String> + 'static,
    {
        self.methods.insert(
            name.to_owned(),
            MethodEntry {
                name: name.to_owned(),
                signature: signature.to_owned(),
                func: Rc::new(func),
            },
        );
    }

    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodEntry> {
        self.methods.get(name)
    }

    /// `(name, signature)` of every method, sorted by name.
    pub fn methods(&self) -> Vec<(&str, &str)> {
        let mut out: Vec<_> = self
            .methods
            .values()
            .map(|m| (m.name.as_str(), m.signature.as_str()))
            .collect();
        out.sort_unstable();
        out
    }

    /// Invoke a method with `args`.
    ///
    /// The result slot is reset to `Unknown` before the lookup, so a failed
    /// call never leaves a stale result behind.  The method may re-enter
    /// `execute` on the same instance; the inner call replaces the argument
    /// list.
    pub fn execute(&mut self, name: &str, args: Vec<Value>) -> Result<()> {
        self.result = None;
        let Some(func) = self.methods.get(name).map(|m| m.func.clone()) else {
            warn!(module = %self.module, method = name, "method not found");
            return Err(Error::MethodNotFound {
                module: self.module.clone(),
                method: name.to_owned(),
            });
        };
        self.args = args;
        func(self).map_err(|message| Error::MethodFailed {
            module: self.module.clone(),
            method: name.to_owned(),
            message,
        })
    }

    // ── Call state ────────────────────────────────────────────────────────────

    /// Positional argument of the current call; missing ones read as `""`.
    pub fn arg(&self, index: usize) -> Value {
        self.args.get(index).cloned().unwrap_or_default()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn set_result(&mut self, value: Value) {
        self.result = Some(value);
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn take_result(&mut self) -> Option<Value> {
        self.result.take()
    }

    pub fn result_kind(&self) -> ValueKind {
        self.result.as_ref().map(Value::kind).unwrap_or_default()
    }

    // ── Variables ─────────────────────────────────────────────────────────────

    /// Set a variable; `None` removes it.
    pub fn set_var(&mut self, name: &str, value: Option<Value>) {
        self.vars.set(name, value);
    }

    pub fn get_var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn vars(&self) -> &VarStore {
        &self.vars
    }

    /// Store typed module-private state.
    pub fn set_private<T: Any>(&mut self, name: &str, value: T) {
        self.private.insert(name.to_owned(), Box::new(value));
    }

    pub fn private<T: Any>(&self, name: &str) -> Option<&T> {
        self.private.get(name)?.downcast_ref()
    }

    pub fn private_mut<T: Any>(&mut self, name: &str) -> Option<&mut T> {
        self.private.get_mut(name)?.downcast_mut()
    }

    /// Drop all variables, methods and private state.
    pub fn clear(&mut self) {
        self.vars.clear();
        self.methods.clear();
        self.private.clear();
        self.args.clear();
        self.result = None;
    }
}

impl fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("methods", &self.methods())
            .field("vars", &self.vars)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn adder() -> ModuleInstance {
        let mut inst = ModuleInstance::new();
        inst.add_method("add", "A/N B/N", |inst| {
            let sum = inst.arg(0).as_int() + inst.arg(1).as_int();
            inst.set_result(Value::Int(sum));
            Ok(())
        });
        inst
    }

    #[test]
    fn execute_sets_result() {
        let mut inst = adder();
        inst.execute("add", vec![Value::Int(40), Value::Int(2)]).unwrap();
        assert_eq!(inst.result(), Some(&Value::Int(42)));
        assert_eq!(inst.result_kind(), ValueKind::Numeric);
    }

    #[test]
    fn missing_method_leaves_result_unknown() {
        let mut inst = adder();
        inst.execute("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        let err = inst.execute("nope", vec![]).unwrap_err();
        assert!(matches!(err, Error::MethodNotFound { ref method, .. } if method == "nope"));
        assert_eq!(inst.result_kind(), ValueKind::Unknown);
    }

    #[test]
    fn result_reset_each_call() {
        let mut inst = adder();
        inst.add_method("noop", "", |_| Ok(()));
        inst.execute("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        inst.execute("noop", vec![]).unwrap();
        assert!(inst.result().is_none());
    }

    #[test]
    fn method_error_is_reported() {
        let mut inst = ModuleInstance::new();
        inst.add_method("fail", "", |_| Err("boom".into()));
        let err = inst.execute("fail", vec![]).unwrap_err();
        assert!(matches!(err, Error::MethodFailed { ref message, .. } if message == "boom"));
    }

    #[test]
    fn add_method_overwrites() {
        let mut inst = ModuleInstance::new();
        inst.add_method("m", "OLD", |inst| {
            inst.set_result(Value::Int(1));
            Ok(())
        });
        inst.add_method("m", "NEW", |inst| {
            inst.set_result(Value::Int(2));
            Ok(())
        });
        inst.execute("m", vec![]).unwrap();
        assert_eq!(inst.result(), Some(&Value::Int(2)));
        assert_eq!(inst.methods(), vec![("m", "NEW")]);
    }

    #[test]
    fn reentrant_execute() {
        let mut inst = adder();
        inst.add_method("double", "N/N", |inst| {
            let n = inst.arg(0);
            inst.execute("add", vec![n.clone(), n]).map_err(|e| e.to_string())
        });
        inst.execute("double", vec![Value::Int(21)]).unwrap();
        assert_eq!(inst.result(), Some(&Value::Int(42)));
    }

    #[test]
    fn missing_args_read_empty() {
        let mut inst = ModuleInstance::new();
        inst.add_method("peek", "", |inst| {
            inst.set_result(inst.arg(3));
            Ok(())
        });
        inst.execute("peek", vec![Value::Int(1)]).unwrap();
        assert_eq!(inst.result(), Some(&Value::from("")));
    }

    #[test]
    fn string_var_replaced() {
        let mut inst = ModuleInstance::new();
        inst.set_var("k", Some(Value::from("v1")));
        inst.set_var("k", Some(Value::from("v2")));
        assert_eq!(inst.vars().len(), 1);
        assert_eq!(inst.get_var("k").and_then(Value::as_str), Some("v2"));
    }

    #[test]
    fn private_state_is_typed() {
        let mut inst = ModuleInstance::new();
        inst.set_private("count", 3usize);
        *inst.private_mut::<usize>("count").unwrap() += 1;
        assert_eq!(inst.private::<usize>("count"), Some(&4));
        assert!(inst.private::<String>("count").is_none());
    }

    #[test]
    fn clear_drops_everything() {
        let mut inst = adder();
        inst.set_var("x", Some(Value::from("s")));
        inst.set_private("p", 1u8);
        inst.clear();
        assert!(!inst.has_method("add"));
        assert!(inst.get_var("x").is_none());
        assert!(inst.private::<u8>("p").is_none());
    }
}
