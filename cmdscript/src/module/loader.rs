//! Loading module code: shared libraries or in-process tables.
//!
//! The registry never talks to the dynamic linker directly.  It asks a
//! [`ModuleLoader`] to open a path and then resolves the module entry points
//! by symbol name from the returned [`ModuleLibrary`].  Dropping the library
//! handle unloads it.
//!
//! | Symbol | Required | Signature |
//! |--------|----------|-----------|
//! | `module_create`  | yes | `extern "C" fn() -> *mut ModuleInstance` |
//! | `module_destroy` | yes | `extern "C" fn(*mut ModuleInstance)` |
//! | `module_info`    | no  | `extern "C" fn(c_int) -> *const c_char` |
//!
//! Native plugins exchange `ModuleInstance` by pointer, so they must be built
//! against the same `cmdscript` version with the same toolchain as the host.
//! [`declare_module!`](crate::declare_module) generates the two mandatory
//! symbols.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use super::instance::ModuleInstance;

pub const CREATE_SYMBOL: &str = "module_create";
pub const DESTROY_SYMBOL: &str = "module_destroy";
pub const INFO_SYMBOL: &str = "module_info";

/// Builds a fresh instance.
pub type Factory = Rc<dyn Fn() -> Result<ModuleInstance, String>>;
/// Consumes an instance at disposal time.
pub type Destructor = Rc<dyn Fn(ModuleInstance)>;
/// Answers metadata queries by [`InfoId`] number.
pub type InfoFn = Rc<dyn Fn(i32) -> Option<String>>;

// ── InfoId ────────────────────────────────────────────────────────────────────

/// Well-known metadata ids understood by `module_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InfoId {
    Name = 0,
    Version = 1,
    Description = 2,
    Author = 3,
}

// ── Traits ────────────────────────────────────────────────────────────────────

/// An opened library.  Dropping it unloads the code.
pub trait ModuleLibrary {
    fn factory(&self, symbol: &str) -> Option<Factory>;
    fn destructor(&self, symbol: &str) -> Option<Destructor>;
    fn info(&self, symbol: &str) -> Option<InfoFn>;
}

pub trait ModuleLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleLibrary>, String>;
}

// ── Static (in-process) loading ───────────────────────────────────────────────

/// Entry points of a library that is linked into the host.
#[derive(Clone, Default)]
pub struct StaticLibrary {
    factories: HashMap<String, Factory>,
    destructors: HashMap<String, Destructor>,
    infos: HashMap<String, InfoFn>,
    on_unload: Option<Rc<dyn Fn()>>,
}

impl StaticLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    /// A library exporting the standard `module_create`/`module_destroy` pair.
    pub fn module<C, D>(create: C, destroy: D) -> Self
    where
        C: Fn() -> ModuleInstance + 'static,
        D: Fn(ModuleInstance) + 'static,
    {
        Self::new()
            .with_factory(CREATE_SYMBOL, move || Ok(create()))
            .with_destructor(DESTROY_SYMBOL, destroy)
    }

    pub fn with_factory<F>(mut self, symbol: &str, f: F) -> Self
    where
        F: Fn() -> Result<ModuleInstance, String> + 'static,
    {
        self.factories.insert(symbol.to_owned(), Rc::new(f));
        self
    }

    pub fn with_destructor<F>(mut self, symbol: &str, f: F) -> Self
    where
        F: Fn(ModuleInstance) + 'static,
    {
        self.destructors.insert(symbol.to_owned(), Rc::new(f));
        self
    }

    pub fn with_info<F>(mut self, symbol: &str, f: F) -> Self
    where
        F: Fn(i32) -> Option<String> + 'static,
    {
        self.infos.insert(symbol.to_owned(), Rc::new(f));
        self
    }

    /// Run `f` each time an opened handle of this library is dropped.
    pub fn on_unload<F: Fn() + 'static>(mut self, f: F) -> Self {
        self.on_unload = Some(Rc::new(f));
        self
    }
}

impl fmt::Debug for StaticLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticLibrary")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("destructors", &self.destructors.keys().collect::<Vec<_>>())
            .field("infos", &self.infos.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct StaticHandle(StaticLibrary);

impl ModuleLibrary for StaticHandle {
    fn factory(&self, symbol: &str) -> Option<Factory> {
        self.0.factories.get(symbol).cloned()
    }

    fn destructor(&self, symbol: &str) -> Option<Destructor> {
        self.0.destructors.get(symbol).cloned()
    }

    fn info(&self, symbol: &str) -> Option<InfoFn> {
        self.0.infos.get(symbol).cloned()
    }
}

impl Drop for StaticHandle {
    fn drop(&mut self) {
        if let Some(f) = &self.0.on_unload {
            f();
        }
    }
}

/// Loader over a fixed path → [`StaticLibrary`] table.
///
/// Used on targets without runtime code loading, and by tests.
#[derive(Debug, Default)]
pub struct StaticLoader {
    libraries: HashMap<PathBuf, StaticLibrary>,
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, library: StaticLibrary) {
        self.libraries.insert(path.into(), library);
    }

    pub fn with(mut self, path: impl Into<PathBuf>, library: StaticLibrary) -> Self {
        self.insert(path, library);
        self
    }
}

impl ModuleLoader for StaticLoader {
    fn open(&self, path: &Path) -> Result<Box<dyn ModuleLibrary>, String> {
        self.libraries
            .get(path)
            .cloned()
            .map(|lib| Box::new(StaticHandle(lib)) as Box<dyn ModuleLibrary>)
            .ok_or_else(|| format!("{}: no such library", path.display()))
    }
}

// ── Native loading ────────────────────────────────────────────────────────────

#[cfg(feature = "native")]
pub use native::NativeLoader;

#[cfg(feature = "native")]
mod native {
    use std::ffi::CStr;
    use std::os::raw::{c_char, c_int};
    use std::path::Path;
    use std::rc::Rc;

    use libloading::Library;

    use super::{Destructor, Factory, InfoFn, ModuleInstance, ModuleLibrary, ModuleLoader};

    type CreateFn = unsafe extern "C" fn() -> *mut ModuleInstance;
    type DestroyFn = unsafe extern "C" fn(*mut ModuleInstance);
    type NativeInfoFn = unsafe extern "C" fn(c_int) -> *const c_char;

    /// Opens shared libraries with the platform dynamic linker.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct NativeLoader;

    impl ModuleLoader for NativeLoader {
        fn open(&self, path: &Path) -> Result<Box<dyn ModuleLibrary>, String> {
            // SAFETY: loading a module runs its initialisers with full host
            // trust; modules are not sandboxed.
            let lib = unsafe { Library::new(path) }.map_err(|e| e.to_string())?;
            Ok(Box::new(NativeLibrary { lib: Rc::new(lib) }))
        }
    }

    /// Every resolved entry point holds a clone of `lib`, so the code stays
    /// mapped until the last closure referring to it is dropped.
    struct NativeLibrary {
        lib: Rc<Library>,
    }

    impl NativeLibrary {
        fn symbol<T: Copy>(&self, symbol: &str) -> Option<T> {
            // SAFETY: `T` is one of the entry-point signatures documented in
            // the module header; a library exporting the name with another
            // signature is a broken plugin.
            unsafe { self.lib.get::<T>(symbol.as_bytes()) }
                .ok()
                .map(|s| *s)
        }
    }

    impl ModuleLibrary for NativeLibrary {
        fn factory(&self, symbol: &str) -> Option<Factory> {
            let create: CreateFn = self.symbol(symbol)?;
            let lib = self.lib.clone();
            Some(Rc::new(move || {
                let _held = &lib;
                // SAFETY: `module_create` returns a pointer produced by
                // `Box::into_raw`, or null on failure.
                let ptr = unsafe { create() };
                if ptr.is_null() {
                    return Err("module_create returned null".to_owned());
                }
                Ok(*unsafe { Box::from_raw(ptr) })
            }))
        }

        fn destructor(&self, symbol: &str) -> Option<Destructor> {
            let destroy: DestroyFn = self.symbol(symbol)?;
            let lib = self.lib.clone();
            Some(Rc::new(move |inst| {
                let _held = &lib;
                // SAFETY: ownership of the boxed instance passes to the module.
                unsafe { destroy(Box::into_raw(Box::new(inst))) }
            }))
        }

        fn info(&self, symbol: &str) -> Option<InfoFn> {
            let info: NativeInfoFn = self.symbol(symbol)?;
            let lib = self.lib.clone();
            Some(Rc::new(move |id| {
                let _held = &lib;
                // SAFETY: `module_info` returns null or a NUL-terminated
                // string that outlives the call.
                let ptr = unsafe { info(id as c_int) };
                if ptr.is_null() {
                    return None;
                }
                Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
            }))
        }
    }
}

/// Export `module_create` and `module_destroy` from a plugin crate.
///
/// ```ignore
/// fn build() -> cmdscript::ModuleInstance { /* add methods */ }
/// cmdscript::declare_module!(build);
/// ```
#[macro_export]
macro_rules! declare_module {
    ($factory:path) => {
        #[no_mangle]
        pub extern "C" fn module_create() -> *mut $crate::ModuleInstance {
            ::std::boxed::Box::into_raw(::std::boxed::Box::new($factory()))
        }

        /// # Safety
        /// `inst` must come from `module_create` and not be used afterwards.
        #[no_mangle]
        pub unsafe extern "C" fn module_destroy(inst: *mut $crate::ModuleInstance) {
            if !inst.is_null() {
                drop(::std::boxed::Box::from_raw(inst));
            }
        }
    };
}

// ── Tests ─────────────────────────────────────────────────────────────────────
