//! Embeddable command-script engine with dynamically loaded modules.
//!
//! - [`module`]: module registry, instances and library loading
//! - [`script`]: the bracketed script language and its engine
//! - [`config`]: rc files that set up a registry and engine
//! - [`cli`]: command-line parsing for the `cmdscript` binary

pub mod cli;
pub mod config;
pub mod error;
pub mod module;
pub mod script;
pub mod value;
pub mod var;

pub use error::{Error, ErrorCategory, Result};
pub use module::{InstanceRef, ModuleInstance, Registry};
pub use script::{Command, Engine};
pub use value::{Value, ValueKind};
pub use var::VarStore;
