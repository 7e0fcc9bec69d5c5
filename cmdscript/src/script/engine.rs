//! Script engine: command tables and token dispatch.
//!
//! The [`Engine`] owns three name-keyed tables:
//!
//! - *intrinsics*, commands implemented by the engine itself (`if`);
//! - *test functions*, boolean predicates consulted by `if`;
//! - *command bindings*, each tying a command name to a module instance, an
//!   argument template and optional open/close callbacks.
//!
//! [`Engine::execute`] walks a script token by token.  An OPEN binds the
//! command's arguments and runs its open callback; the matching CLOSE runs
//! its close callback with the same arguments.  The first failure aborts
//! the script; callbacks already run are not undone.
//!
//! ```rust
//! use cmdscript::script::{Command, Engine};
//!
//! let mut engine = Engine::with_builtins();
//! engine
//!     .register_command(Command::new("log", "MSG/A").on_open(|_, ctx| {
//!         let msg = ctx.arg("MSG").and_then(|a| a.as_str()).unwrap_or_default().to_owned();
//!         ctx.user::<Vec<String>>().unwrap().push(msg);
//!         Ok(())
//!     }))
//!     .unwrap();
//!
//! let mut lines: Vec<String> = Vec::new();
//! engine.execute("(if eq a a (log yes) (log no))", &mut lines).unwrap();
//! assert_eq!(lines, vec!["yes"]);
//! ```

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use tracing::{debug, info, warn};

use super::builtins;
use super::template::{self, ArgValue, Args, Template};
use super::tokenizer::{TokenKind, Tokenizer};
use crate::error::{Error, Result};
use crate::module::{InstanceRef, ModuleInstance, Registry};
use crate::value::Value;

/// Open or close callback of a command.
pub type CommandFn = Rc<dyn Fn(&mut ModuleInstance, &mut CallContext<'_>) -> Result<(), String>>;
/// Engine-implemented command.
pub type IntrinsicFn = Rc<dyn Fn(&mut IntrinsicCall<'_>) -> Result<(), String>>;
/// Boolean test consulted by `if`.
pub type TestFn = Rc<dyn Fn(&[String]) -> bool>;

/// Method a module must provide to be imported as a command.
pub const TEMPLATE_METHOD: &str = "get_template";
pub const OPEN_METHOD: &str = "open";
pub const CLOSE_METHOD: &str = "close";

// ── Call contexts ─────────────────────────────────────────────────────────────

/// What an open/close callback sees of the command being run.
pub struct CallContext<'a> {
    command: &'a str,
    args: &'a Args,
    depth: usize,
    user: &'a mut (dyn Any + 'static),
}

impl<'a> CallContext<'a> {
    pub fn command(&self) -> &str {
        self.command
    }

    pub fn args(&self) -> &Args {
        self.args
    }

    /// Argument bound to template field `name`.
    pub fn arg(&self, name: &str) -> Option<&ArgValue> {
        self.args.get(name)
    }

    /// Argument bound to the template field at `index`.
    pub fn arg_at(&self, index: usize) -> Option<&ArgValue> {
        self.args.at(index)
    }

    /// Call-stack depth including this command.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The host value passed to [`Engine::execute`], if it is a `T`.
    pub fn user<T: Any>(&mut self) -> Option<&mut T> {
        self.user.downcast_mut()
    }
}

/// What an intrinsic sees: its raw tokens and the engine's control state.
pub struct IntrinsicCall<'a> {
    command: &'a str,
    args: &'a [String],
    tests: &'a HashMap<String, TestFn>,
    tokenizer: &'a mut Tokenizer,
    user: &'a mut (dyn Any + 'static),
}

impl<'a> IntrinsicCall<'a> {
    pub fn command(&self) -> &str {
        self.command
    }

    /// Raw argument tokens; never empty.
    pub fn args(&self) -> &'a [String] {
        self.args
    }

    pub fn depth(&self) -> usize {
        self.tokenizer.depth()
    }

    /// Run test function `name`; `None` if no such test is registered.
    pub fn test(&self, name: &str, args: &[String]) -> Option<bool> {
        let test = self.tests.get(name)?;
        Some(test(args))
    }

    /// Make the following sibling blocks conditional: with `remaining == 1`
    /// the next block is skipped, with `2` the one after it.
    pub fn skip_siblings(&mut self, remaining: u8) {
        self.tokenizer.begin_skip(remaining.clamp(1, 2));
    }

    pub fn user<T: Any>(&mut self) -> Option<&mut T> {
        self.user.downcast_mut()
    }
}

// ── Command builder ───────────────────────────────────────────────────────────

/// Description of a command to register with [`Engine::register_command`].
pub struct Command {
    name: String,
    template: String,
    instance: Option<InstanceRef>,
    open: Option<CommandFn>,
    close: Option<CommandFn>,
}

impl Command {
    pub fn new(name: &str, template: &str) -> Self {
        Command {
            name: name.to_owned(),
            template: template.to_owned(),
            instance: None,
            open: None,
            close: None,
        }
    }

    /// Bind to an existing module instance.  Without one the command gets a
    /// private, empty instance.
    pub fn instance(mut self, instance: InstanceRef) -> Self {
        self.instance = Some(instance);
        self
    }

    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ModuleInstance, &mut CallContext<'_>) -> Result<(), String> + 'static,
    {
        self.open = Some(Rc::new(f));
        self
    }

    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut ModuleInstance, &mut CallContext<'_>) -> Result<(), String> + 'static,
    {
        self.close = Some(Rc::new(f));
        self
    }
}

struct Binding {
    instance: InstanceRef,
    template: Template,
    open: Option<CommandFn>,
    close: Option<CommandFn>,
}

// ── Engine ────────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct Engine {
    intrinsics: HashMap<String, IntrinsicFn>,
    tests: HashMap<String, TestFn>,
    bindings: HashMap<String, Binding>,
    /// Fields every command accepts, prepended to its own template.
    default_template: Template,
}

impl Engine {
    /// An engine with empty tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// An engine with the `if` intrinsic and the standard test functions.
    pub fn with_builtins() -> Self {
        let mut engine = Self::new();
        builtins::install(&mut engine);
        engine
    }

    // ── Registration ──────────────────────────────────────────────────────────

    pub fn register_intrinsic<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&mut IntrinsicCall<'_>) -> Result<(), String> + 'static,
    {
        self.intrinsics.insert(name.to_owned(), Rc::new(f));
    }

    pub fn register_test<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&[String]) -> bool + 'static,
    {
        self.tests.insert(name.to_owned(), Rc::new(f));
    }

    pub fn has_test(&self, name: &str) -> bool {
        self.tests.contains_key(name)
    }

    /// Fields accepted by every command registered from now on.
    pub fn set_default_template(&mut self, spec: &str) -> Result<()> {
        self.default_template = Template::parse(spec).map_err(|message| Error::Template {
            template: spec.to_owned(),
            message,
        })?;
        Ok(())
    }

    pub fn register_command(&mut self, cmd: Command) -> Result<()> {
        let binding = self.make_binding(&cmd.name, &cmd.template, cmd.instance, cmd.open, cmd.close)?;
        debug!(command = %cmd.name, template = %binding.template, "command registered");
        self.bindings.insert(cmd.name, binding);
        Ok(())
    }

    fn make_binding(
        &self,
        name: &str,
        spec: &str,
        instance: Option<InstanceRef>,
        open: Option<CommandFn>,
        close: Option<CommandFn>,
    ) -> Result<Binding> {
        if self.bindings.contains_key(name) || self.intrinsics.contains_key(name) {
            warn!(command = name, "duplicate command rejected");
            return Err(Error::DuplicateRegistration(name.to_owned()));
        }
        let template_err = |message: String| Error::Template {
            template: spec.to_owned(),
            message,
        };
        let own = Template::parse(spec).map_err(template_err)?;
        let template = self.default_template.combine(&own).map_err(template_err)?;
        Ok(Binding {
            instance: instance.unwrap_or_else(|| Rc::new(RefCell::new(ModuleInstance::new()))),
            template,
            open,
            close,
        })
    }

    /// Make every module of `registry` a command of the same name.
    ///
    /// Each module is instantiated once.  Its template comes from its
    /// mandatory `get_template` method; its optional `open` and `close`
    /// methods become the callbacks and receive the bound arguments in
    /// template order.  Nothing is imported if any module fails; instances
    /// already created for the import are deleted again.
    ///
    /// Also registers the `defined` test over the registry's shared vars,
    /// unless the host already registered its own.
    pub fn import_registry(&mut self, registry: &mut Registry) -> Result<usize> {
        let names: Vec<String> = registry.modules().map(str::to_owned).collect();
        let mut staged: Vec<(String, Binding)> = Vec::with_capacity(names.len());

        for name in names {
            match self.stage_module(registry, &name) {
                Ok(binding) => staged.push((name, binding)),
                Err(e) => {
                    for (_, binding) in &staged {
                        let _ = registry.delete_instance(&binding.instance);
                    }
                    return Err(e);
                }
            }
        }

        let count = staged.len();
        for (name, binding) in staged {
            self.bindings.insert(name, binding);
        }
        if !self.has_test("defined") {
            builtins::install_defined(self, registry.shared().clone());
        }
        info!(count, "imported registry modules");
        Ok(count)
    }

    fn stage_module(&self, registry: &mut Registry, name: &str) -> Result<Binding> {
        let instance = registry.new_instance(name)?;
        let spec = {
            let mut inst = instance.borrow_mut();
            inst.execute(TEMPLATE_METHOD, Vec::new())
                .map(|()| inst.take_result().map(|v| v.to_string()).unwrap_or_default())
        };
        let staged = spec.and_then(|spec| {
            let inst = instance.borrow();
            let open = inst.has_method(OPEN_METHOD).then(|| method_callback(OPEN_METHOD));
            let close = inst.has_method(CLOSE_METHOD).then(|| method_callback(CLOSE_METHOD));
            drop(inst);
            self.make_binding(name, &spec, Some(instance.clone()), open, close)
        });
        if staged.is_err() {
            let _ = registry.delete_instance(&instance);
        }
        staged
    }

    /// Drop every command binding.  Intrinsics and tests stay.
    pub fn reset(&mut self) {
        self.bindings.clear();
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.bindings.contains_key(name) || self.intrinsics.contains_key(name)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.bindings.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Module instance bound to `name`.
    pub fn instance(&self, name: &str) -> Option<&InstanceRef> {
        self.bindings.get(name).map(|b| &b.instance)
    }

    // ── Execution ─────────────────────────────────────────────────────────────

    /// Run `script`, passing `user` to every callback.
    pub fn execute(&self, script: &str, user: &mut (dyn Any + 'static)) -> Result<()> {
        let mut tok = Tokenizer::new(script);
        // Bound arguments of every open command, parallel to the call stack.
        let mut frames: Vec<Args> = Vec::new();

        while let Some(token) = tok.next_token()? {
            match token.kind {
                TokenKind::Open => self.open(&mut tok, &mut frames, &token.name, user)?,
                TokenKind::Close => {
                    let args = frames.pop().unwrap_or_default();
                    self.close(&token.name, &args, tok.depth() + 1, user)?;
                }
            }
        }

        if tok.depth() > 0 {
            return Err(Error::UnmatchedOpenBracket {
                open: tok.stack().to_vec(),
            });
        }
        Ok(())
    }

    fn open(
        &self,
        tok: &mut Tokenizer,
        frames: &mut Vec<Args>,
        name: &str,
        user: &mut (dyn Any + 'static),
    ) -> Result<()> {
        if let Some(intrinsic) = self.intrinsics.get(name) {
            let args = template::tokenize(tok.arg_text())
                .and_then(|t| {
                    if t.is_empty() {
                        Err("expected at least one argument".to_owned())
                    } else {
                        Ok(t)
                    }
                })
                .map_err(|message| Error::Arguments {
                    command: name.to_owned(),
                    message,
                })?;
            tok.push(name);
            frames.push(Args::default());
            debug!(command = name, depth = tok.depth(), "intrinsic");
            let mut call = IntrinsicCall {
                command: name,
                args: &args,
                tests: &self.tests,
                tokenizer: tok,
                user,
            };
            return intrinsic(&mut call).map_err(|message| Error::CommandFailed {
                command: name.to_owned(),
                message,
            });
        }

        let Some(binding) = self.bindings.get(name) else {
            warn!(command = name, offset = tok.cursor(), "unknown command");
            return Err(Error::CommandUnknown(name.to_owned()));
        };
        let bound = binding.template.bind(tok.arg_text());
        tok.push(name);
        let args = bound.map_err(|message| Error::Arguments {
            command: name.to_owned(),
            message,
        })?;
        debug!(command = name, depth = tok.depth(), "open");
        let result = match &binding.open {
            Some(open) => run_callback(binding, open, name, &args, tok.depth(), user),
            None => Ok(()),
        };
        frames.push(args);
        result
    }

    fn close(
        &self,
        name: &str,
        args: &Args,
        depth: usize,
        user: &mut (dyn Any + 'static),
    ) -> Result<()> {
        if self.intrinsics.contains_key(name) {
            return Ok(());
        }
        let Some(binding) = self.bindings.get(name) else {
            return Ok(());
        };
        debug!(command = name, depth, "close");
        match &binding.close {
            Some(close) => run_callback(binding, close, name, args, depth, user),
            None => Ok(()),
        }
    }
}

fn run_callback(
    binding: &Binding,
    f: &CommandFn,
    name: &str,
    args: &Args,
    depth: usize,
    user: &mut (dyn Any + 'static),
) -> Result<()> {
    let failed = |message: String| Error::CommandFailed {
        command: name.to_owned(),
        message,
    };
    let mut inst = binding
        .instance
        .try_borrow_mut()
        .map_err(|_| failed("module instance is already in use".to_owned()))?;
    let mut ctx = CallContext {
        command: name,
        args,
        depth,
        user,
    };
    f(&mut inst, &mut ctx).map_err(failed)
}

/// Callback forwarding to a module method with the bound arguments.
fn method_callback(method: &'static str) -> CommandFn {
    Rc::new(move |inst, ctx| {
        let values: Vec<Value> = ctx.args().to_values();
        inst.execute(method, values).map_err(|e| e.to_string())
    })
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut intrinsics: Vec<_> = self.intrinsics.keys().collect();
        intrinsics.sort_unstable();
        let mut tests: Vec<_> = self.tests.keys().collect();
        tests.sort_unstable();
        f.debug_struct("Engine")
            .field("intrinsics", &intrinsics)
            .field("tests", &tests)
            .field("commands", &self.commands())
            .field("default_template", &self.default_template.to_string())
            .finish()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
