//! `.cmdscriptrc` configuration file parser.
//!
//! An rc file sets up the module registry and the engine before a script
//! runs:
//!
//! | Directive | Action |
//! |-----------|--------|
//! | `/path <dir>` | add a module search directory |
//! | `/load <name> <path>` | load a module library under `name` |
//! | `/template <spec>` | default argument template for every command |
//! | `/set <name>=<value>` or `/set <name> <value>` | set a shared host variable |
//! | Lines starting with `;` or `#` | comment, ignored |
//!
//! Unknown directives are reported but do not stop the rest of the file.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::module::Registry;
use crate::script::{Engine, Template};
use crate::value::Value;
use crate::var::VarStore;

// ── Public API ────────────────────────────────────────────────────────────────

/// A non-fatal error encountered while loading or applying a config file.
#[derive(Debug)]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for ConfigError {}

/// A `/load` directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSpec {
    pub name: String,
    pub path: PathBuf,
    /// Line of the directive, for error reports.
    pub line: usize,
}

#[derive(Debug, Default)]
pub struct Config {
    pub search_path: Vec<PathBuf>,
    pub modules: Vec<ModuleSpec>,
    pub template: Option<String>,
    pub vars: VarStore,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an rc string.
    ///
    /// Returns the config and a list of any errors, one per bad line.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = Config::new();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let lineno = i + 1;
            let line = raw.trim();

            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }

            let Some(rest) = line.strip_prefix('/') else {
                errors.push(ConfigError {
                    line: lineno,
                    message: format!("expected a /command, found `{line}`"),
                });
                continue;
            };

            let (cmd, args_str) = rest
                .split_once(|c: char| c.is_ascii_whitespace())
                .unwrap_or((rest, ""));
            let args_str = args_str.trim();

            let result = match cmd {
                "path" => parse_path(&split_args(args_str), &mut config),
                "load" => parse_load(&split_args(args_str), lineno, &mut config),
                // Template specs contain `/` and `=`, so take the raw text.
                "template" => parse_template(args_str, &mut config),
                "set" => parse_set(&split_args(args_str), &mut config.vars),
                other => Err(format!("unknown directive /{other}")),
            };
            if let Err(message) = result {
                errors.push(ConfigError { line: lineno, message });
            }
        }

        (config, errors)
    }

    /// Read and parse an rc file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// Push this configuration into `registry` and `engine`.
    ///
    /// Search directories and variables are applied first so that `/load`
    /// paths resolve regardless of directive order.  A module that fails to
    /// load is reported and skipped.
    pub fn apply(&self, registry: &mut Registry, engine: &mut Engine) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        for dir in &self.search_path {
            registry.add_search_dir(dir.clone());
        }
        {
            let mut shared = registry.shared().borrow_mut();
            for (name, value) in self.vars.iter() {
                shared.set(name.clone(), Some(value.clone()));
            }
        }
        if let Some(spec) = &self.template {
            if let Err(e) = engine.set_default_template(spec) {
                errors.push(ConfigError { line: 0, message: e.to_string() });
            }
        }
        for m in &self.modules {
            if let Err(e) = registry.load(&m.name, &m.path) {
                warn!(module = %m.name, error = %e, "rc: module not loaded");
                errors.push(ConfigError { line: m.line, message: e.to_string() });
            }
        }

        errors
    }
}

// ── Argument tokenizer ────────────────────────────────────────────────────────

/// Split `s` into whitespace-delimited tokens, honouring double-quoted strings
/// and `\"` escapes within them.
fn split_args(s: &str) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut in_quotes = false;
    let mut chars = s.chars();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    cur.push(escaped);
                }
            }
            c if c.is_ascii_whitespace() && !in_quotes => {
                if !cur.is_empty() {
                    args.push(std::mem::take(&mut cur));
                }
            }
            c => cur.push(c),
        }
    }
    if !cur.is_empty() {
        args.push(cur);
    }
    args
}

// ── Directives ────────────────────────────────────────────────────────────────

fn parse_path(tokens: &[String], config: &mut Config) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/path: requires a directory".into());
    }
    config.search_path.extend(tokens.iter().map(PathBuf::from));
    Ok(())
}

/// `/load <name> <path>`
fn parse_load(tokens: &[String], line: usize, config: &mut Config) -> Result<(), String> {
    let [name, path] = tokens else {
        return Err(format!("/load: expected <name> <path>, got {} arguments", tokens.len()));
    };
    if config.modules.iter().any(|m| &m.name == name) {
        return Err(format!("/load: module '{name}' already listed"));
    }
    config.modules.push(ModuleSpec {
        name: name.clone(),
        path: PathBuf::from(path),
        line,
    });
    Ok(())
}

fn parse_template(spec: &str, config: &mut Config) -> Result<(), String> {
    Template::parse(spec).map_err(|e| format!("/template: {e}"))?;
    config.template = Some(spec.to_owned());
    Ok(())
}

/// Parse `/set <name>=<value>` or `/set <name> <value>`.
///
/// Values that read as integers are stored numerically.
fn parse_set(tokens: &[String], vars: &mut VarStore) -> Result<(), String> {
    if tokens.is_empty() {
        return Err("/set: requires an argument".into());
    }

    let (name, value) = if let Some((name, value)) = tokens[0].split_once('=') {
        (name.to_owned(), value.to_owned())
    } else if tokens.len() >= 2 {
        (tokens[0].clone(), tokens[1..].join(" "))
    } else {
        return Err(format!("/set: missing value for '{}'", tokens[0]));
    };

    if name.is_empty() {
        return Err("/set: variable name cannot be empty".into());
    }

    let value = match value.parse::<i64>() {
        Ok(n) => Value::Int(n),
        Err(_) => Value::Str(value),
    };
    vars.set(name, Some(value));
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
