use luna_vm::Vm;
use proptest::prelude::*;

/// Results rendered with their number subtype, or the error message with
/// operand names removed (literals carry none).
fn outcome(source: &str) -> Result<String, String> {
    match Vm::new().do_string(source, "=test") {
        Ok(values) => Ok(format!("{values:?}")),
        Err(e) => Err(e
            .to_string()
            .replace(" (local 'a')", "")
            .replace(" (local 'b')", "")
            .replace(" (local 'x')", "")),
    }
}

fn literal_int(n: i64) -> String {
    if n < 0 {
        format!("({n})")
    } else {
        n.to_string()
    }
}

fn literal_float(x: f64) -> String {
    if x < 0.0 {
        format!("({x:?})")
    } else {
        format!("{x:?}")
    }
}

/// `a op b` on literals (folded at compile time when legal) must agree with
/// the same operation on locals (always computed by the VM).
fn assert_agrees(a: &str, op: &str, b: &str) {
    let folded = outcome(&format!("return {a} {op} {b}"));
    let computed = outcome(&format!("local a, b = {a}, {b} return a {op} b"));
    assert_eq!(folded, computed, "{a} {op} {b}");
}

const INT_OPS: &[&str] = &["+", "-", "*", "/", "//", "%", "^", "&", "|", "~", "<<", ">>"];
const FLOAT_OPS: &[&str] = &["+", "-", "*", "/", "//", "%", "^"];

#[test]
fn test_known_edge_cases_agree() {
    let cases = [
        ("2", "/", "0"),
        ("1", "//", "0"),
        ("1", "%", "0"),
        ("1.5", "&", "1"),
        ("3.0", "|", "4"),
        ("9223372036854775807", "+", "1"),
        ("(-9223372036854775807 - 1)", "//", "(-1)"),
        ("(-9223372036854775807 - 1)", "%", "(-1)"),
        ("1", "<<", "64"),
        ("1", ">>", "(-3)"),
        ("(-7)", "//", "2"),
        ("(-7)", "%", "2"),
        ("7", "%", "(-2.5)"),
        ("0.0", "/", "0"),
    ];
    for (a, op, b) in cases {
        assert_agrees(a, op, b);
    }
}

#[test]
fn test_unary_folding_agrees() {
    for src in ["-(9223372036854775807 + 1)", "~5", "-(0.0)", "~(2^53)", "-(-(3))"] {
        let folded = outcome(&format!("return {src}"));
        let inner = src.trim_start_matches(['-', '~']);
        let op = &src[..src.len() - inner.len()];
        let computed = outcome(&format!("local x = {inner} return {op}x"));
        assert_eq!(folded, computed, "{src}");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn integer_ops_agree(a in any::<i64>(), b in -70i64..70, op in 0..INT_OPS.len()) {
        assert_agrees(&literal_int(a), INT_OPS[op], &literal_int(b));
    }

    #[test]
    fn float_ops_agree(a in -1e6f64..1e6, b in -1e3f64..1e3, op in 0..FLOAT_OPS.len()) {
        assert_agrees(&literal_float(a), FLOAT_OPS[op], &literal_float(b));
    }

    #[test]
    fn mixed_ops_agree(a in -1000i64..1000, b in -100f64..100.0, op in 0..FLOAT_OPS.len()) {
        assert_agrees(&literal_int(a), FLOAT_OPS[op], &literal_float(b));
    }
}
