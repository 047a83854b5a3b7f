use super::helpers::*;
use luna_compiler::compile;

fn message(src: &str) -> String {
    compile_str_err(src).message
}

#[test]
fn e2e_unexpected_symbol() {
    let err = compile_str_err("x = = 1");
    assert_eq!(err.message, "unexpected symbol");
    assert_eq!(err.near.as_deref(), Some("'='"));
    assert_eq!(err.to_string(), "test:1: unexpected symbol near '='");
}

#[test]
fn e2e_error_on_later_line() {
    let err = compile_str_err("local a = 1\nlocal b = 2\nx = = 3");
    assert_eq!(err.line, 3);
}

#[test]
fn e2e_name_expected() {
    let err = compile_str_err("local 1");
    assert_eq!(err.message, "<name> expected");
    assert_eq!(err.near.as_deref(), Some("'1'"));
}

#[test]
fn e2e_unexpected_eof() {
    let err = compile_str_err("x = 1 +");
    assert_eq!(err.message, "unexpected symbol");
    assert_eq!(err.near.as_deref(), Some("<eof>"));
}

#[test]
fn e2e_bad_for() {
    assert_eq!(message("for i do end"), "'=' or 'in' expected");
}

#[test]
fn e2e_expression_statement_must_be_call() {
    assert_eq!(message("x"), "syntax error");
    assert_eq!(message("a.b:c = 1"), "function arguments expected");
}

#[test]
fn e2e_missing_end_reports_opener() {
    let err = compile_str_err("while true do\n  x = 1\n");
    assert_eq!(err.message, "'end' expected (to close 'while' at line 1)");
    assert_eq!(message("do x = 1"), "'end' expected");
    assert_eq!(
        message("local t = {1, 2\n\nlocal y"),
        "'}' expected (to close '{' at line 1)"
    );
}

#[test]
fn e2e_bad_parameter_list() {
    assert_eq!(message("function f(a, 1) end"), "<name> or '...' expected");
}

#[test]
fn e2e_vararg_outside_vararg_function() {
    assert_eq!(
        message("function f() return ... end"),
        "cannot use '...' outside a vararg function"
    );
}

#[test]
fn e2e_lexical_errors_are_compile_errors() {
    let err = compile_str_err("x = 'abc");
    assert_eq!(err.message, "unfinished string");
    assert_eq!(err.chunk, "test");
    assert_eq!(message("x = 3..4"), "malformed number");
    assert_eq!(message("x = '\\q'"), "invalid escape sequence");
}

#[test]
fn e2e_too_many_locals() {
    let names: Vec<String> = (0..201).map(|i| format!("a{i}")).collect();
    let src = format!("local {}", names.join(", "));
    assert!(message(&src).starts_with("too many local variables (limit is 200) in main function"));
    let src = format!("function f()\nlocal {}\nend", names.join(", "));
    assert!(message(&src).starts_with("too many local variables (limit is 200) in function at line 1"));
}

#[test]
fn e2e_too_many_registers() {
    let args = vec!["1"; 300].join(", ");
    assert_eq!(
        message(&format!("f({args})")),
        "function or expression needs too many registers"
    );
}

#[test]
fn e2e_too_many_syntax_levels() {
    let src = format!("return {}1{}", "(".repeat(300), ")".repeat(300));
    assert_eq!(message(&src), "chunk has too many syntax levels");
}

#[test]
fn e2e_syntax_levels_at_limit() {
    // `return` and the outer expression take two levels; each paren one more.
    let src = format!("return {}1{}", "(".repeat(198), ")".repeat(198));
    assert!(compile(src.as_bytes(), "=t").is_ok());
    let src = format!("return {}1{}", "(".repeat(199), ")".repeat(199));
    assert_eq!(message(&src), "chunk has too many syntax levels");
}

#[test]
fn e2e_deeply_nested_blocks() {
    let src = format!("{} x = 1 {}", "do ".repeat(150), "end ".repeat(150));
    assert!(compile(src.as_bytes(), "=t").is_ok());
}

#[test]
fn e2e_chunk_names_in_messages() {
    let err = compile(b"x = = 1", "x = = 1").unwrap_err();
    assert_eq!(err.to_string(), "[string \"x = = 1\"]:1: unexpected symbol near '='");
    let err = compile(b"x = = 1", "@scripts/a.lua").unwrap_err();
    assert_eq!(err.to_string(), "scripts/a.lua:1: unexpected symbol near '='");
}
