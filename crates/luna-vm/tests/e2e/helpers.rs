use luna_vm::{LuaError, Value, Vm};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

/// Compile and execute Lua source, returning every result.
pub fn run_lua(source: &str) -> Vec<Value> {
    Vm::new()
        .do_string(source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}\nsource:\n{source}"))
}

/// Compile and execute Lua source, expecting an error; returns its message.
pub fn run_lua_err(source: &str) -> String {
    match Vm::new().do_string(source, "=test") {
        Err(e) => e.to_string(),
        Ok(vals) => panic!("expected error, got {} results: {vals:?}", vals.len()),
    }
}

/// Like `run_lua_err`, but hands back the error itself.
#[allow(dead_code)]
pub fn run_lua_error(source: &str) -> LuaError {
    match Vm::new().do_string(source, "=test") {
        Err(e) => e,
        Ok(vals) => panic!("expected error, got {vals:?}"),
    }
}

#[derive(Clone, Default)]
pub struct Captured(Rc<RefCell<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run Lua source and return everything it printed.
#[allow(dead_code)]
pub fn run_lua_output(source: &str) -> String {
    let out = Captured::default();
    let mut vm = Vm::new();
    vm.set_output(Box::new(out.clone()));
    vm.do_string(source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}\nsource:\n{source}"));
    let bytes = out.0.borrow().clone();
    String::from_utf8(bytes).expect("printed output is utf-8")
}

pub fn assert_int(results: &[Value], idx: usize, expected: i64) {
    match &results[idx] {
        Value::Integer(got) => assert_eq!(*got, expected, "result[{idx}]"),
        other => panic!("result[{idx}] = {other:?}, expected integer {expected}"),
    }
}

#[allow(dead_code)]
pub fn assert_float(results: &[Value], idx: usize, expected: f64) {
    match &results[idx] {
        Value::Float(got) => assert!(
            (got - expected).abs() < 1e-10,
            "result[{idx}] = {got}, expected {expected}"
        ),
        other => panic!("result[{idx}] = {other:?}, expected float {expected}"),
    }
}

#[allow(dead_code)]
pub fn assert_bool(results: &[Value], idx: usize, expected: bool) {
    assert_eq!(results[idx], Value::Boolean(expected), "result[{idx}]");
}

#[allow(dead_code)]
pub fn assert_nil(results: &[Value], idx: usize) {
    assert!(results[idx].is_nil(), "result[{idx}] = {:?}, expected nil", results[idx]);
}

#[allow(dead_code)]
pub fn assert_str(results: &[Value], idx: usize, expected: &str) {
    match &results[idx] {
        Value::String(s) => assert_eq!(s.as_bytes(), expected.as_bytes(), "result[{idx}]"),
        other => panic!("result[{idx}] = {other:?}, expected string {expected:?}"),
    }
}

/// Run Lua source and check that it returns exactly these integers.
pub fn run_check_ints(source: &str, expected: &[i64]) {
    let results = run_lua(source);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {results:?}",
        expected.len()
    );
    for (i, &want) in expected.iter().enumerate() {
        assert_int(&results, i, want);
    }
}
