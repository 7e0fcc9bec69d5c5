//! Module registry.
//!
//! The [`Registry`] maps module names to [`ModuleDefinition`]s and tracks
//! every instance it hands out, keyed by the instance's own identity.  That
//! index is what lets [`Registry::clear`] (and `Drop`) dispose instances the
//! host forgot about.
//!
//! ## Teardown order
//!
//! Instances are always destroyed before definitions.  A definition owns the
//! library handle its destructor lives in, so unloading first would leave
//! live instances pointing at unmapped code.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::instance::{InstanceRef, ModuleInstance, SharedVars};
use super::loader::{
    Destructor, Factory, InfoFn, ModuleLibrary, ModuleLoader, StaticLoader, CREATE_SYMBOL,
    DESTROY_SYMBOL, INFO_SYMBOL,
};
use crate::error::{Error, Result};
use crate::var::VarStore;

// ── ModuleDefinition ──────────────────────────────────────────────────────────

/// How to build, destroy and describe one named module.
pub struct ModuleDefinition {
    name: String,
    /// `None` when no dynamic library owns the code.
    handle: Option<Box<dyn ModuleLibrary>>,
    factory: Factory,
    destructor: Destructor,
    info: Option<InfoFn>,
}

impl ModuleDefinition {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_dynamic(&self) -> bool {
        self.handle.is_some()
    }
}

impl fmt::Debug for ModuleDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDefinition")
            .field("name", &self.name)
            .field("dynamic", &self.is_dynamic())
            .field("info", &self.info.is_some())
            .finish_non_exhaustive()
    }
}

// ── Tracked instance ──────────────────────────────────────────────────────────

struct Tracked {
    module: String,
    instance: InstanceRef,
}

// ── Registry ──────────────────────────────────────────────────────────────────

pub struct Registry {
    loader: Box<dyn ModuleLoader>,
    /// Directories tried, in order, for relative library paths.
    search_path: Vec<PathBuf>,
    definitions: HashMap<String, ModuleDefinition>,
    /// Registration order, for listing and teardown.
    order: Vec<String>,
    /// Live instances by identity; ordered so teardown is deterministic.
    instances: BTreeMap<u64, Tracked>,
    next_id: u64,
    shared: SharedVars,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// A registry loading shared libraries with the platform linker.
    ///
    /// Without the `native` feature this falls back to an empty
    /// [`StaticLoader`], so only [`Registry::add`] can register modules.
    pub fn new() -> Self {
        #[cfg(feature = "native")]
        let loader: Box<dyn ModuleLoader> = Box::new(super::loader::NativeLoader);
        #[cfg(not(feature = "native"))]
        let loader: Box<dyn ModuleLoader> = Box::new(StaticLoader::new());
        Self::with_loader(loader)
    }

    pub fn with_loader(loader: Box<dyn ModuleLoader>) -> Self {
        Registry {
            loader,
            search_path: Vec::new(),
            definitions: HashMap::new(),
            order: Vec::new(),
            instances: BTreeMap::new(),
            next_id: 0,
            shared: Rc::new(RefCell::new(VarStore::new())),
        }
    }

    /// Convenience for hosts that link every module statically.
    pub fn with_static(loader: StaticLoader) -> Self {
        Self::with_loader(Box::new(loader))
    }

    pub fn add_search_dir(&mut self, dir: impl Into<PathBuf>) {
        self.search_path.push(dir.into());
    }

    /// Host variables handed to every instance this registry creates.
    pub fn shared(&self) -> &SharedVars {
        &self.shared
    }

    // ── Registration ──────────────────────────────────────────────────────────

    /// Open `path` and register the module it exports under `name`.
    ///
    /// Nothing is registered unless the library opens and both mandatory
    /// entry points resolve; the handle is dropped (unloaded) otherwise.
    pub fn load(&mut self, name: &str, path: impl AsRef<Path>) -> Result<()> {
        self.check_unique(name)?;
        let path = self.resolve_path(path.as_ref());
        let load_err = |reason: String| {
            warn!(module = name, path = %path.display(), %reason, "load failed");
            Error::DynamicLoad {
                name: name.to_owned(),
                path: path.display().to_string(),
                reason,
            }
        };

        let handle = self.loader.open(&path).map_err(load_err)?;
        let factory = handle
            .factory(CREATE_SYMBOL)
            .ok_or_else(|| load_err(format!("missing symbol `{CREATE_SYMBOL}`")))?;
        let destructor = handle
            .destructor(DESTROY_SYMBOL)
            .ok_or_else(|| load_err(format!("missing symbol `{DESTROY_SYMBOL}`")))?;
        let info = handle.info(INFO_SYMBOL);

        info!(module = name, path = %path.display(), "module loaded");
        self.insert(ModuleDefinition {
            name: name.to_owned(),
            handle: Some(handle),
            factory,
            destructor,
            info,
        });
        Ok(())
    }

    /// Register an already-resident module.
    pub fn add(
        &mut self,
        name: &str,
        handle: Option<Box<dyn ModuleLibrary>>,
        factory: Factory,
        destructor: Destructor,
        info: Option<InfoFn>,
    ) -> Result<()> {
        self.check_unique(name)?;
        debug!(module = name, "module added");
        self.insert(ModuleDefinition {
            name: name.to_owned(),
            handle,
            factory,
            destructor,
            info,
        });
        Ok(())
    }

    /// Register a resident module whose instances need no teardown beyond
    /// being dropped.
    pub fn register<F>(&mut self, name: &str, factory: F) -> Result<()>
    where
        F: Fn() -> ModuleInstance + 'static,
    {
        self.add(
            name,
            None,
            Rc::new(move || Ok::<_, String>(factory())),
            Rc::new(drop::<ModuleInstance>),
            None,
        )
    }

    fn check_unique(&self, name: &str) -> Result<()> {
        if self.definitions.contains_key(name) {
            warn!(module = name, "duplicate registration rejected");
            return Err(Error::DuplicateRegistration(name.to_owned()));
        }
        Ok(())
    }

    fn insert(&mut self, def: ModuleDefinition) {
        self.order.push(def.name.clone());
        self.definitions.insert(def.name.clone(), def);
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        self.search_path
            .iter()
            .map(|dir| dir.join(path))
            .find(|p| p.exists())
            .unwrap_or_else(|| path.to_path_buf())
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn has_module(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    pub fn definition(&self, name: &str) -> Option<&ModuleDefinition> {
        self.definitions.get(name)
    }

    /// Module names in registration order.
    pub fn modules(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Metadata string `info_id` of module `name`, if it provides one.
    pub fn get_info(&self, name: &str, info_id: i32) -> Option<String> {
        let info = self.definitions.get(name)?.info.as_ref()?;
        info(info_id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    // ── Instances ─────────────────────────────────────────────────────────────

    /// Build and start tracking a new instance of module `name`.
    pub fn new_instance(&mut self, name: &str) -> Result<InstanceRef> {
        let Some(def) = self.definitions.get(name) else {
            warn!(module = name, "cannot instantiate unknown module");
            return Err(Error::Instance(name.to_owned()));
        };
        let mut inst = (def.factory)().map_err(|reason| Error::Factory {
            name: name.to_owned(),
            reason,
        })?;

        self.next_id += 1;
        let id = self.next_id;
        inst.attach(id, name, self.shared.clone());
        let instance = Rc::new(RefCell::new(inst));
        self.instances.insert(
            id,
            Tracked {
                module: name.to_owned(),
                instance: instance.clone(),
            },
        );
        debug!(module = name, id, "instance created");
        Ok(instance)
    }

    /// Run the owning module's destructor on `instance` and stop tracking it.
    ///
    /// Other handles to the same instance stay valid but see an empty
    /// instance with no methods.
    pub fn delete_instance(&mut self, instance: &InstanceRef) -> Result<()> {
        let tracked_id = self
            .instances
            .iter()
            .find(|(_, t)| Rc::ptr_eq(&t.instance, instance))
            .map(|(id, _)| *id);
        let Some(id) = tracked_id else {
            let id = instance.try_borrow().map(|i| i.id()).unwrap_or_default();
            warn!(id, "delete of untracked instance");
            return Err(Error::InvalidInstance(id));
        };
        if instance.try_borrow_mut().is_err() {
            warn!(id, "delete of instance in use");
            return Err(Error::InstanceBusy(id));
        }
        if let Some(tracked) = self.instances.remove(&id) {
            self.dispose(tracked);
        }
        Ok(())
    }

    fn dispose(&self, tracked: Tracked) {
        let Ok(mut slot) = tracked.instance.try_borrow_mut() else {
            warn!(module = %tracked.module, "instance in use at teardown, destructor skipped");
            return;
        };
        let inst = std::mem::take(&mut *slot);
        drop(slot);
        debug!(module = %tracked.module, id = inst.id(), "instance destroyed");
        match self.definitions.get(&tracked.module) {
            Some(def) => (def.destructor)(inst),
            None => drop(inst),
        }
    }

    // ── Teardown ──────────────────────────────────────────────────────────────

    /// Unregister one module, destroying its live instances first.
    pub fn remove(&mut self, name: &str) -> bool {
        if !self.definitions.contains_key(name) {
            return false;
        }
        let ids: Vec<u64> = self
            .instances
            .iter()
            .filter(|(_, t)| t.module == name)
            .map(|(id, _)| *id)
            .collect();
        for id in ids {
            if let Some(tracked) = self.instances.remove(&id) {
                self.dispose(tracked);
            }
        }
        self.order.retain(|n| n != name);
        self.definitions.remove(name);
        info!(module = name, "module removed");
        true
    }

    /// Destroy every live instance, then every definition.
    pub fn clear(&mut self) {
        for (_, tracked) in std::mem::take(&mut self.instances) {
            self.dispose(tracked);
        }
        for name in std::mem::take(&mut self.order) {
            if let Some(def) = self.definitions.remove(&name) {
                debug!(module = %name, dynamic = def.is_dynamic(), "definition released");
            }
        }
    }
}

impl Drop for Registry {
    fn drop(&mut self) {
        self.clear();
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("modules", &self.order)
            .field("instances", &self.instances.len())
            .field("search_path", &self.search_path)
            .finish_non_exhaustive()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::module::loader::{InfoId, StaticLibrary};
    use crate::value::Value;

    fn greeter() -> ModuleInstance {
        let mut inst = ModuleInstance::new();
        inst.add_method("greet", "NAME", |inst| {
            let name = inst.arg(0);
            inst.set_result(Value::Str(format!("hello {name}")));
            Ok(())
        });
        inst
    }

    type Log = Rc<RefCell<Vec<String>>>;

    /// A loader with one instrumented library at `lib/<name>.so`.
    fn logging_loader(name: &str, log: &Log) -> StaticLoader {
        let (d, u) = (log.clone(), log.clone());
        let tag = name.to_owned();
        let tag2 = name.to_owned();
        StaticLoader::new().with(
            format!("lib/{name}.so"),
            StaticLibrary::module(greeter, move |_| d.borrow_mut().push(format!("destroy {tag}")))
                .on_unload(move || u.borrow_mut().push(format!("unload {tag2}"))),
        )
    }

    #[test]
    fn load_and_instantiate() {
        let log = Log::default();
        let mut reg = Registry::with_static(logging_loader("greeter", &log));
        reg.load("greeter", "lib/greeter.so").unwrap();
        assert!(reg.has_module("greeter"));
        assert!(reg.definition("greeter").unwrap().is_dynamic());

        let inst = reg.new_instance("greeter").unwrap();
        inst.borrow_mut().execute("greet", vec![Value::from("bob")]).unwrap();
        assert_eq!(inst.borrow().result(), Some(&Value::from("hello bob")));
        assert_eq!(inst.borrow().module_name(), "greeter");
    }

    #[test]
    fn duplicate_load_keeps_first() {
        let log = Log::default();
        let loader = logging_loader("a", &log).with(
            "lib/other.so",
            StaticLibrary::module(ModuleInstance::new, drop::<ModuleInstance>),
        );
        let mut reg = Registry::with_static(loader);
        reg.load("m", "lib/a.so").unwrap();
        let err = reg.load("m", "lib/other.so").unwrap_err();
        assert!(matches!(err, Error::DuplicateRegistration(ref n) if n == "m"));

        let inst = reg.new_instance("m").unwrap();
        assert!(inst.borrow().has_method("greet"));
    }

    #[test]
    fn missing_library_registers_nothing() {
        let mut reg = Registry::with_static(StaticLoader::new());
        let err = reg.load("ghost", "lib/ghost.so").unwrap_err();
        assert!(matches!(err, Error::DynamicLoad { .. }));
        assert!(!reg.has_module("ghost"));
        assert_eq!(reg.modules().count(), 0);
    }

    #[test]
    fn missing_symbol_unloads_and_registers_nothing() {
        let unloaded = Rc::new(RefCell::new(false));
        let flag = unloaded.clone();
        let loader = StaticLoader::new().with(
            "half.so",
            StaticLibrary::new()
                .with_factory(CREATE_SYMBOL, || Ok(ModuleInstance::new()))
                .on_unload(move || *flag.borrow_mut() = true),
        );
        let mut reg = Registry::with_static(loader);
        let err = reg.load("half", "half.so").unwrap_err();
        assert!(err.to_string().contains(DESTROY_SYMBOL));
        assert!(!reg.has_module("half"));
        assert!(*unloaded.borrow());
    }

    #[test]
    fn unknown_module_instance_error() {
        let mut reg = Registry::with_static(StaticLoader::new());
        let err = reg.new_instance("nope").unwrap_err();
        assert!(matches!(err, Error::Instance(ref n) if n == "nope"));
        assert_eq!(reg.instance_count(), 0);
    }

    #[test]
    fn delete_instance_runs_destructor_once() {
        let log = Log::default();
        let mut reg = Registry::with_static(logging_loader("g", &log));
        reg.load("g", "lib/g.so").unwrap();
        let inst = reg.new_instance("g").unwrap();
        reg.delete_instance(&inst).unwrap();
        assert_eq!(*log.borrow(), vec!["destroy g"]);
        assert!(!inst.borrow().has_method("greet"));

        let err = reg.delete_instance(&inst).unwrap_err();
        assert!(matches!(err, Error::InvalidInstance(_)));
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn delete_of_borrowed_instance_is_refused() {
        let log = Log::default();
        let mut reg = Registry::with_static(logging_loader("g", &log));
        reg.load("g", "lib/g.so").unwrap();
        let inst = reg.new_instance("g").unwrap();

        let held = inst.borrow_mut();
        let err = reg.delete_instance(&inst).unwrap_err();
        assert!(matches!(err, Error::InstanceBusy(_)));
        drop(held);

        assert_eq!(reg.instance_count(), 1);
        assert!(log.borrow().is_empty());
        reg.delete_instance(&inst).unwrap();
        assert_eq!(*log.borrow(), vec!["destroy g"]);
    }

    #[test]
    fn foreign_instance_is_invalid() {
        let mut reg = Registry::with_static(StaticLoader::new());
        reg.register("m", ModuleInstance::new).unwrap();
        let foreign = Rc::new(RefCell::new(ModuleInstance::new()));
        assert!(matches!(
            reg.delete_instance(&foreign),
            Err(Error::InvalidInstance(0))
        ));
    }

    #[test]
    fn clear_destroys_instances_before_unloading() {
        let log = Log::default();
        let loader = logging_loader("a", &log);
        let (d, u) = (log.clone(), log.clone());
        let loader = loader.with(
            "lib/b.so",
            StaticLibrary::module(ModuleInstance::new, move |_| d.borrow_mut().push("destroy b".into()))
                .on_unload(move || u.borrow_mut().push("unload b".into())),
        );
        let mut reg = Registry::with_static(loader);
        reg.load("a", "lib/a.so").unwrap();
        reg.load("b", "lib/b.so").unwrap();
        let _a1 = reg.new_instance("a").unwrap();
        let _b1 = reg.new_instance("b").unwrap();
        let _a2 = reg.new_instance("a").unwrap();

        reg.clear();
        let log = log.borrow();
        let last_destroy = log.iter().rposition(|e| e.starts_with("destroy")).unwrap();
        let first_unload = log.iter().position(|e| e.starts_with("unload")).unwrap();
        assert_eq!(log.iter().filter(|e| e.starts_with("destroy")).count(), 3);
        assert!(last_destroy < first_unload, "order was {log:?}");
        assert_eq!(reg.instance_count(), 0);
        assert!(!reg.has_module("a"));
    }

    #[test]
    fn drop_tears_down_forgotten_instances() {
        let log = Log::default();
        {
            let mut reg = Registry::with_static(logging_loader("g", &log));
            reg.load("g", "lib/g.so").unwrap();
            reg.new_instance("g").unwrap();
        }
        assert_eq!(*log.borrow(), vec!["destroy g", "unload g"]);
    }

    #[test]
    fn remove_single_module() {
        let log = Log::default();
        let mut reg = Registry::with_static(logging_loader("g", &log));
        reg.load("g", "lib/g.so").unwrap();
        reg.register("other", ModuleInstance::new).unwrap();
        reg.new_instance("g").unwrap();
        let keep = reg.new_instance("other").unwrap();

        assert!(reg.remove("g"));
        assert_eq!(*log.borrow(), vec!["destroy g", "unload g"]);
        assert_eq!(reg.modules().collect::<Vec<_>>(), vec!["other"]);
        assert_eq!(reg.instance_count(), 1);
        assert!(reg.delete_instance(&keep).is_ok());
        assert!(!reg.remove("g"));
    }

    #[test]
    fn info_query() {
        let loader = StaticLoader::new().with(
            "i.so",
            StaticLibrary::module(ModuleInstance::new, drop::<ModuleInstance>).with_info(INFO_SYMBOL, |id| {
                match id {
                    x if x == InfoId::Version as i32 => Some("0.3".to_owned()),
                    _ => None,
                }
            }),
        );
        let mut reg = Registry::with_static(loader);
        reg.load("i", "i.so").unwrap();
        reg.register("plain", ModuleInstance::new).unwrap();
        assert_eq!(reg.get_info("i", InfoId::Version as i32).as_deref(), Some("0.3"));
        assert_eq!(reg.get_info("i", InfoId::Author as i32), None);
        assert_eq!(reg.get_info("plain", InfoId::Version as i32), None);
        assert_eq!(reg.get_info("absent", 0), None);
    }

    #[test]
    fn instances_share_registry_vars() {
        let mut reg = Registry::with_static(StaticLoader::new());
        reg.register("m", ModuleInstance::new).unwrap();
        reg.shared().borrow_mut().set("theme", Some(Value::from("dark")));
        let inst = reg.new_instance("m").unwrap();
        let shared = inst.borrow().shared().cloned().unwrap();
        assert_eq!(shared.borrow().get("theme"), Some(&Value::from("dark")));
    }

    #[test]
    fn search_path_resolves_relative() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("libx.so");
        std::fs::write(&lib, b"").unwrap();
        let loader = StaticLoader::new().with(lib.clone(), StaticLibrary::module(ModuleInstance::new, drop::<ModuleInstance>));
        let mut reg = Registry::with_static(loader);
        reg.add_search_dir(dir.path());
        reg.load("x", "libx.so").unwrap();
        assert!(reg.has_module("x"));
    }

    #[test]
    fn factory_failure_is_reported() {
        let mut reg = Registry::with_static(StaticLoader::new());
        reg.add(
            "broken",
            None,
            Rc::new(|| Err::<ModuleInstance, _>("no resources".to_owned())),
            Rc::new(drop::<ModuleInstance>),
            None,
        )
        .unwrap();
        let err = reg.new_instance("broken").unwrap_err();
        assert!(matches!(err, Error::Factory { ref reason, .. } if reason == "no resources"));
        assert_eq!(reg.instance_count(), 0);
    }
}
