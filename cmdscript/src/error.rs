//! Crate-wide error type.
//!
//! Script-level helpers (template binding, module methods, test functions)
//! report failures as plain `String`s; the registry and the engine lift them
//! into [`Error`] at their boundary so hosts match on one type.

use thiserror::Error;

// ── Error ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
    /// A module with this name is already registered.
    #[error("module `{0}` is already registered")]
    DuplicateRegistration(String),

    /// The shared library could not be opened or lacks a mandatory entry point.
    #[error("cannot load module `{name}` from {path}: {reason}")]
    DynamicLoad {
        name: String,
        path: String,
        reason: String,
    },

    /// `new_instance` on a name the registry does not know.
    #[error("no module named `{0}`")]
    Instance(String),

    /// The instance was never created by this registry, or already disposed.
    #[error("instance #{0} is not tracked by this registry")]
    InvalidInstance(u64),

    /// The instance is borrowed elsewhere, typically by a running callback.
    #[error("instance #{0} is in use")]
    InstanceBusy(u64),

    /// The factory refused to build an instance.
    #[error("module `{name}` failed to create an instance: {reason}")]
    Factory { name: String, reason: String },

    #[error("method `{method}` not found in module `{module}`")]
    MethodNotFound { module: String, method: String },

    /// A module method returned an error status.
    #[error("{module}.{method}: {message}")]
    MethodFailed {
        module: String,
        method: String,
        message: String,
    },

    #[error("unknown command `{0}`")]
    CommandUnknown(String),

    /// Argument text did not satisfy the command's template.
    #[error("({command} …): {message}")]
    Arguments { command: String, message: String },

    /// An open/close callback or intrinsic reported failure.
    #[error("({command} …): {message}")]
    CommandFailed { command: String, message: String },

    #[error("unmatched `)` at offset {offset}")]
    UnmatchedCloseBracket { offset: usize },

    /// Script ended with commands still open (outermost first).
    #[error("unclosed `(` for {}", .open.join(" > "))]
    UnmatchedOpenBracket { open: Vec<String> },

    /// A template string itself is malformed.
    #[error("bad template `{template}`: {message}")]
    Template { template: String, message: String },
}

/// Coarse classification of [`Error`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Method, command, module or instance not found.
    Lookup,
    /// Unbalanced brackets.
    Structural,
    Duplicate,
    DynamicLoad,
    /// A callback, method or argument binding reported failure.
    Callback,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MethodNotFound { .. }
            | Error::CommandUnknown(_)
            | Error::Instance(_)
            | Error::InvalidInstance(_) => ErrorCategory::Lookup,
            Error::UnmatchedCloseBracket { .. } | Error::UnmatchedOpenBracket { .. } => {
                ErrorCategory::Structural
            }
            Error::DuplicateRegistration(_) => ErrorCategory::Duplicate,
            Error::DynamicLoad { .. } => ErrorCategory::DynamicLoad,
            Error::Factory { .. }
            | Error::MethodFailed { .. }
            | Error::Arguments { .. }
            | Error::CommandFailed { .. }
            | Error::InstanceBusy(_)
            | Error::Template { .. } => ErrorCategory::Callback,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

// ── Tests ─────────────────────────────────────────────────────────────────────
