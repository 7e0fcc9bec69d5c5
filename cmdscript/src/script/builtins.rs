//! Built-in intrinsics and test functions.
//!
//! `if` is the only intrinsic.  Its first token names a test function; the
//! rest are that test's arguments.  The next sibling block runs when the
//! test holds, the one after it otherwise:
//!
//! ```text
//! (if eq mode debug
//!     (window Debug)      ; then
//!     (window Main))      ; else, optional
//! ```

use tracing::warn;

use super::engine::{Engine, IntrinsicCall};
use crate::module::SharedVars;

/// Names of the stateless built-in tests.
pub const TESTS: &[&str] = &["true", "false", "eq", "ne", "empty"];

/// Add `if` and the stateless tests to `engine`.
pub fn install(engine: &mut Engine) {
    engine.register_intrinsic("if", cond_if);
    for &name in TESTS {
        engine.register_test(name, move |args| {
            // Names come from TESTS, so the lookup never misses.
            call_test(name, args).unwrap_or(false)
        });
    }
}

/// Add the `defined NAME` test, true when `vars` holds `NAME`.
pub fn install_defined(engine: &mut Engine, vars: SharedVars) {
    engine.register_test("defined", move |args| match args {
        [name] => vars.borrow().contains(name),
        _ => false,
    });
}

/// Evaluate a stateless built-in test.
///
/// Returns `None` if `name` is not a built-in.
pub fn call_test(name: &str, args: &[String]) -> Option<bool> {
    Some(match name {
        "true" => true,
        "false" => false,
        "eq" => matches!(args, [a, b] if a == b),
        "ne" => matches!(args, [a, b] if a != b),
        // `(if empty %x ...)` with an unset `x` arrives as no token at all.
        "empty" => args.iter().all(String::is_empty),
        _ => return None,
    })
}

fn cond_if(call: &mut IntrinsicCall<'_>) -> Result<(), String> {
    let Some((test, rest)) = call.args().split_first() else {
        return Err("if: missing test".into());
    };
    let holds = match call.test(test, rest) {
        Some(b) => b,
        None => {
            // Unknown tests take the else branch.
            warn!(test = %test, "if: unknown test function");
            false
        }
    };
    call.skip_siblings(if holds { 2 } else { 1 });
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::engine::Command;
    use crate::value::Value;
    use crate::var::VarStore;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn s(v: &[&str]) -> Vec<String> {
        v.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn constant_tests() {
        assert_eq!(call_test("true", &[]), Some(true));
        assert_eq!(call_test("false", &s(&["ignored"])), Some(false));
    }

    #[test]
    fn equality() {
        assert_eq!(call_test("eq", &s(&["a", "a"])), Some(true));
        assert_eq!(call_test("eq", &s(&["a", "b"])), Some(false));
        assert_eq!(call_test("eq", &s(&["a"])), Some(false));
        assert_eq!(call_test("ne", &s(&["a", "b"])), Some(true));
        assert_eq!(call_test("ne", &s(&["a", "a"])), Some(false));
        assert_eq!(call_test("ne", &s(&["a", "b", "c"])), Some(false));
    }

    #[test]
    fn empty_test() {
        assert_eq!(call_test("empty", &[]), Some(true));
        assert_eq!(call_test("empty", &s(&[""])), Some(true));
        assert_eq!(call_test("empty", &s(&["x"])), Some(false));
    }

    #[test]
    fn unknown_test_is_none() {
        assert_eq!(call_test("nope", &[]), None);
    }

    #[test]
    fn install_registers_everything() {
        let mut engine = Engine::new();
        install(&mut engine);
        assert!(engine.has_command("if"));
        for name in TESTS {
            assert!(engine.has_test(name), "{name}");
        }
        assert!(!engine.has_test("defined"));
    }

    #[test]
    fn defined_tracks_shared_vars() {
        let vars: SharedVars = Rc::new(RefCell::new(VarStore::new()));
        let mut engine = Engine::with_builtins();
        install_defined(&mut engine, vars.clone());
        assert!(engine.has_test("defined"));

        let mut seen: Vec<&'static str> = Vec::new();
        engine
            .register_command(Command::new("mark", "").on_open(|_, ctx| {
                ctx.user::<Vec<&'static str>>().unwrap().push("mark");
                Ok(())
            }))
            .unwrap();

        engine.execute("(if defined x (mark))", &mut seen).unwrap();
        assert!(seen.is_empty());

        vars.borrow_mut().set("x", Some(Value::Int(1)));
        engine.execute("(if defined x (mark))", &mut seen).unwrap();
        assert_eq!(seen, vec!["mark"]);
    }
}
