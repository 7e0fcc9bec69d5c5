use proptest::prelude::*;

use cmdscript::script::template::{tokenize, Template};
use cmdscript::script::{Command, Engine, Tokenizer};

/// Engine where `a`, `b` and `c` accept any arguments and do nothing.
fn engine() -> Engine {
    let mut engine = Engine::with_builtins();
    for name in ["a", "b", "c"] {
        engine.register_command(Command::new(name, "ARGS/M")).unwrap();
    }
    engine
}

/// Balanced scripts over the registered commands, with arbitrary argument
/// words and conditionals sprinkled in.
fn script() -> impl Strategy<Value = String> {
    let word = "[0-9][a-z0-9]{0,5}";
    let leaf = (prop::sample::select(vec!["a", "b", "c"]), prop::collection::vec(word, 0..3))
        .prop_map(|(name, args)| format!("({name} {})", args.join(" ")));
    leaf.prop_recursive(4, 32, 4, |inner| {
        prop_oneof![
            (prop::sample::select(vec!["a", "b", "c"]), prop::collection::vec(inner.clone(), 0..4))
                .prop_map(|(name, kids)| format!("({name} {})", kids.concat())),
            (prop::sample::select(vec!["true", "false", "eq x x", "ne x x"]), inner.clone(), inner)
                .prop_map(|(test, then, other)| format!("(if {test} {then} {other})")),
        ]
    })
}

proptest! {
    /// The tokenizer never panics: every input ends in `Ok(None)` or an error.
    #[test]
    fn tokenizer_does_not_panic(s in "\\PC*") {
        let mut tok = Tokenizer::new(&s);
        let mut steps = 0usize;
        while let Ok(Some(_)) = tok.next_token() {
            steps += 1;
            prop_assert!(steps <= s.len());
        }
    }

    /// Executing arbitrary text returns a result rather than panicking.
    #[test]
    fn engine_does_not_panic(s in "[()a-c if true false \"=]{0,40}") {
        let _ = engine().execute(&s, &mut ());
    }

    /// Well-formed scripts over registered commands always succeed.
    #[test]
    fn balanced_scripts_succeed(s in script()) {
        prop_assert!(engine().execute(&s, &mut ()).is_ok(), "script: {}", s);
    }

    /// Argument tokens never contain separators unless they were quoted.
    #[test]
    fn unquoted_tokens_have_no_separators(s in "[a-z =\t]{0,30}") {
        let tokens = tokenize(&s).unwrap();
        for t in &tokens {
            prop_assert!(!t.is_empty());
            prop_assert!(!t.contains(|c: char| c.is_whitespace() || c == '='));
        }
    }

    /// A multi-value template accepts any unquoted word list.
    #[test]
    fn multi_template_takes_everything(words in prop::collection::vec("[b-z][a-z]{0,4}", 0..8)) {
        let t = Template::parse("ARGS/M").unwrap();
        let args = t.bind(&words.join(" "));
        prop_assert!(args.is_ok());
    }
}
