//! Bracketed command scripts.
//!
//! A script is a tree of commands written as nested brackets.  Each command
//! name is followed by its arguments; child commands sit inside the parent's
//! brackets.  Text outside any bracket is ignored.
//!
//! - [`tokenizer`] turns the text into OPEN/CLOSE tokens and skips the
//!   blocks an `if` rules out
//! - [`template`] binds argument text to named fields
//! - [`engine`] dispatches tokens to intrinsics and command callbacks
//! - [`builtins`] provides `if` and the standard tests
//!
//! # Quick start
//!
//! ```rust
//! use cmdscript::script::{Command, Engine};
//!
//! let mut engine = Engine::with_builtins();
//! for name in ["window", "button"] {
//!     engine
//!         .register_command(Command::new(name, "TITLE").on_open(move |_, ctx| {
//!             let title = ctx.arg("TITLE").and_then(|a| a.as_str()).unwrap_or("").to_owned();
//!             ctx.user::<Vec<String>>().unwrap().push(format!("{name} {title}"));
//!             Ok(())
//!         }))
//!         .unwrap();
//! }
//!
//! let mut out: Vec<String> = Vec::new();
//! engine
//!     .execute("(window Main (button OK) (button Cancel))", &mut out)
//!     .unwrap();
//! assert_eq!(out, vec!["window Main", "button OK", "button Cancel"]);
//! ```

pub mod builtins;
pub mod engine;
pub mod template;
pub mod tokenizer;

// Re-exports for convenience.
pub use engine::{CallContext, Command, CommandFn, Engine, IntrinsicCall, IntrinsicFn, TestFn};
pub use template::{ArgToken, ArgValue, Args, Template};
pub use tokenizer::{SkipState, Token, TokenKind, Tokenizer};
