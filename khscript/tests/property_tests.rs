//! Property tests: the evaluator and compiler must be total over arbitrary
//! input. Scripts come from untrusted users; nothing they type may panic
//! the engine.

use proptest::prelude::*;

use khscript::{compile, evaluate, evaluate_condition, Value};

fn no_vars(_: &str) -> Option<String> {
    None
}

proptest! {
    #[test]
    fn evaluate_never_panics(src in ".{0,120}") {
        let _ = evaluate(&src, &no_vars);
    }

    #[test]
    fn evaluate_condition_never_panics(src in ".{0,120}") {
        let _ = evaluate_condition(&src, &no_vars);
    }

    #[test]
    fn compile_never_panics(src in "(?s).{0,400}") {
        let _ = compile(&src);
    }

    #[test]
    fn numeric_literals_round_trip(n in -1_000_000i64..1_000_000i64) {
        let v = evaluate(&n.to_string(), &no_vars);
        prop_assert_eq!(v, Value::Number(n as f64));
    }

    #[test]
    fn addition_matches_f64(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let v = evaluate(&format!("{a} + {b}"), &no_vars);
        prop_assert_eq!(v, Value::Number((a + b) as f64));
    }

    #[test]
    fn comparison_is_consistent(a in -1000i64..1000, b in -1000i64..1000) {
        let lt = evaluate_condition(&format!("{a} < {b}"), &no_vars);
        let ge = evaluate_condition(&format!("{a} >= {b}"), &no_vars);
        prop_assert_ne!(lt, ge);
    }

    #[test]
    fn quoted_strings_echo(s in "[a-zA-Z0-9 ]{0,40}") {
        let v = evaluate(&format!("\"{s}\""), &no_vars);
        prop_assert_eq!(v.to_string(), s);
    }

    #[test]
    fn resolver_values_flow_through(n in -1000i64..1000) {
        let raw = n.to_string();
        let resolver = move |name: &str| (name == "v").then(|| raw.clone());
        let v = evaluate("$v * 1", &resolver);
        prop_assert_eq!(v, Value::Number(n as f64));
    }
}
