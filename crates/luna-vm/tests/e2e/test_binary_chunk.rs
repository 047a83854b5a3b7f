use super::helpers::*;
use luna_compiler::compile;
use luna_core::LuaStr;
use luna_vm::binary_chunk::{dump, undump, UndumpError};
use luna_vm::{LuaError, Value, Vm};

const PROGRAMS: &[&str] = &[
    "return 1 + 2",
    "local function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end
     return fib(15)",
    "local t = {} for i = 1, 10 do t[i] = i * i end return #t, t[10]",
    "local s = '' for _, w in ipairs({'a', 'b', 'c'}) do s = s .. w end return s",
    "local function mk() local n = 0 return function() n = n + 1 return n end end
     local c = mk() c() return c(), 2.5, 'long string constant that needs more than forty bytes'",
    "local function v(...) return select('#', ...), ... end return v(1, nil, 3)",
];

fn run_binary(bytes: &[u8]) -> Vec<Value> {
    let mut vm = Vm::new();
    let f = vm.load(bytes, "=test").unwrap();
    vm.call(&f, &[], -1).unwrap()
}

#[test]
fn test_dumped_programs_run_identically() {
    for src in PROGRAMS {
        let proto = compile(src.as_bytes(), "=test").unwrap();
        let expected = run_lua(src);
        assert_eq!(run_binary(&dump(&proto, false)), expected, "{src}");
        assert_eq!(run_binary(&dump(&proto, true)), expected, "stripped: {src}");
    }
}

#[test]
fn test_dump_is_stable_across_reload() {
    for src in PROGRAMS {
        let proto = compile(src.as_bytes(), "=test").unwrap();
        for strip in [false, true] {
            let bytes = dump(&proto, strip);
            let reloaded = undump(&bytes, "=test").unwrap();
            assert_eq!(dump(&reloaded, strip), bytes, "{src}");
        }
    }
}

#[test]
fn test_full_dump_keeps_positions_in_errors() {
    let proto = compile(b"local t = nil\nreturn t.x", "=script").unwrap();
    let mut vm = Vm::new();
    let f = vm.load(&dump(&proto, false), "=ignored").unwrap();
    let err = vm.call(&f, &[], -1).unwrap_err();
    assert_eq!(err.to_string(), "script:2: attempt to index a nil value (local 't')");
}

#[test]
fn test_stripped_dump_drops_names_and_lines() {
    let proto = compile(b"local t = nil\nreturn t.x", "=script").unwrap();
    let mut vm = Vm::new();
    let f = vm.load(&dump(&proto, true), "=ignored").unwrap();
    let err = vm.call(&f, &[], -1).unwrap_err();
    assert_eq!(err.to_string(), "attempt to index a nil value");
}

#[test]
fn test_load_accepts_binary_strings() {
    let proto = compile(b"local a, b = ... return a * b", "=mul").unwrap();
    let mut vm = Vm::new();
    vm.set_global("bin", Value::from(LuaStr::from(dump(&proto, false))));
    let r = vm
        .do_string("local f = load(bin) return f(6, 7)", "=test")
        .unwrap();
    assert_eq!(r, vec![Value::Integer(42)]);
    let r = vm.do_string("return load(bin, 'b', 't')", "=test").unwrap();
    assert!(r[0].is_nil());
    assert_eq!(r[1], Value::from("attempt to load a binary chunk (mode is 't')"));
}

#[test]
fn test_corrupt_binary_reports_undump_error() {
    let proto = compile(b"return 1", "=test").unwrap();
    let mut bytes = dump(&proto, false);
    bytes.truncate(bytes.len() - 3);
    let err = Vm::new().load(&bytes, "=bad").unwrap_err();
    assert!(
        matches!(&err, LuaError::Undump(e) if matches!(**e, UndumpError::Truncated { .. })),
        "got {err:?}"
    );
}

#[test]
fn test_load_reports_corrupt_binary_as_message() {
    let mut vm = Vm::new();
    vm.set_global("bin", Value::from(LuaStr::from(&b"\x1bLua\x52"[..])));
    let r = vm.do_string("return load(bin)", "=test").unwrap();
    assert!(r[0].is_nil());
    assert!(matches!(&r[1], Value::String(_)));
}
