//! Runtime modules: definitions, instances, and how their code is loaded.

pub mod instance;
pub mod loader;
pub mod registry;

pub use instance::{InstanceRef, MethodEntry, MethodFn, ModuleInstance, SharedVars};
pub use loader::{
    Destructor, Factory, InfoFn, InfoId, ModuleLibrary, ModuleLoader, StaticLibrary, StaticLoader,
};
#[cfg(feature = "native")]
pub use loader::NativeLoader;
pub use registry::{ModuleDefinition, Registry};
