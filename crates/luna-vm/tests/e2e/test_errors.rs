use super::helpers::*;
use luna_vm::{LuaError, Value, Vm, VmConfig};
use luna_vm::vm::MAX_NATIVE_DEPTH;

#[test]
fn test_error_reports_line_of_failing_instruction() {
    let msg = run_lua_err(
        "local t = {}\n\
         local x = 1\n\
         return t.a.b",
    );
    assert_eq!(msg, "test:3: attempt to index a nil value (field 'a')");
}

#[test]
fn test_error_inside_called_function_uses_its_line() {
    let msg = run_lua_err(
        "local function bad()\n\
           return nil + 1\n\
         end\n\
         bad()",
    );
    assert_eq!(msg, "test:2: attempt to perform arithmetic on a nil value");
}

#[test]
fn test_call_nil_global() {
    assert_eq!(
        run_lua_err("nope(1)"),
        "test:1: attempt to call a nil value (global 'nope')"
    );
}

#[test]
fn test_index_nil_upvalue() {
    assert_eq!(
        run_lua_err("local cfg\nlocal function f() return cfg.x end\nreturn f()"),
        "test:2: attempt to index a nil value (upvalue 'cfg')"
    );
}

#[test]
fn test_arith_on_table_field() {
    assert_eq!(
        run_lua_err("local t = {x = {}} return t.x * 2"),
        "test:1: attempt to perform arithmetic on a table value (field 'x')"
    );
}

#[test]
fn test_string_coercion_in_arithmetic() {
    let r = run_lua("return '10' + 1, '0x10' * 1, '1.5' * 2, 10 .. 20");
    assert_int(&r, 0, 11);
    assert_int(&r, 1, 16);
    assert_float(&r, 2, 3.0);
    assert_str(&r, 3, "1020");
}

#[test]
fn test_pcall_returns_message_and_continues() {
    let r = run_lua(
        "local ok, e = pcall(function() error('first') end)
         local ok2, v = pcall(function() return 'fine' end)
         return ok, e, ok2, v",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "test:1: first");
    assert_bool(&r, 2, true);
    assert_str(&r, 3, "fine");
}

#[test]
fn test_nested_pcall_rethrow() {
    let r = run_lua(
        "local ok, e = pcall(function()
             local ok, inner = pcall(error, 'deep', 0)
             error('outer:' .. inner, 0)
         end)
         return ok, e",
    );
    assert_bool(&r, 0, false);
    assert_str(&r, 1, "outer:deep");
}

#[test]
fn test_error_value_kinds() {
    let r = run_lua(
        "local _, a = pcall(error, 42)
         local _, b = pcall(error, nil)
         local _, c = pcall(error, false)
         return a, b, c",
    );
    assert_int(&r, 0, 42);
    assert_nil(&r, 1);
    assert_bool(&r, 2, false);
}

#[test]
fn test_uncaught_table_error_carries_value() {
    match run_lua_error("error({code = 3})") {
        LuaError::Value(Value::Table(t)) => {
            assert_eq!(t.borrow().get_str("code"), Value::Integer(3));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn test_deep_recursion_overflows() {
    let err = run_lua_error("local function f(n) return 1 + f(n + 1) end return f(1)");
    assert!(matches!(err, LuaError::StackOverflow), "got {err:?}");
}

const NESTED_PCALL: &str = "local function f(n)
       if n == 0 then return 0 end
       local ok, v = pcall(f, n - 1)
       if not ok then error(v, 0) end
       return v + 1
     end
     return f(...)";

#[test]
fn test_nested_pcall_just_under_limit() {
    let mut vm = Vm::new();
    let f = vm.load(NESTED_PCALL.as_bytes(), "=t").unwrap();
    // the outer call plus one re-entry per pcall
    let depth = (MAX_NATIVE_DEPTH - 2) as i64;
    assert_eq!(vm.call(&f, &[Value::Integer(depth)], 1).unwrap(), vec![Value::Integer(depth)]);
    assert_eq!(vm.native_depth, 0);
}

#[test]
fn test_nested_pcall_past_limit_overflows() {
    let mut vm = Vm::new();
    let f = vm.load(NESTED_PCALL.as_bytes(), "=t").unwrap();
    let depth = (MAX_NATIVE_DEPTH + 50) as i64;
    let err = vm.call(&f, &[Value::Integer(depth)], 1).unwrap_err();
    assert_eq!(err.to_string(), "stack overflow");
    assert_eq!(vm.native_depth, 0);
    assert!(vm.call_stack.is_empty());
    // the VM is still usable
    assert_eq!(vm.call(&f, &[Value::Integer(3)], 1).unwrap(), vec![Value::Integer(3)]);
}

#[test]
fn test_vm_usable_after_error() {
    let mut vm = Vm::new();
    assert!(vm.do_string("local x = nil; return x.y", "=test").is_err());
    let r = vm.do_string("return 1 + 1", "=test").unwrap();
    assert_eq!(r, vec![Value::Integer(2)]);
    assert!(vm.call_stack.is_empty());
}

#[test]
fn test_instruction_budget_interrupts() {
    let mut vm = Vm::with_config(VmConfig {
        instruction_budget: Some(10_000),
        ..VmConfig::default()
    });
    let err = vm.do_string("while true do end", "=test").unwrap_err();
    assert!(matches!(err, LuaError::Interrupted));
    // The budget is per outermost call.
    let r = vm.do_string("local s = 0 for i = 1, 100 do s = s + i end return s", "=test");
    assert_eq!(r.unwrap(), vec![Value::Integer(5050)]);
}

#[test]
fn test_deadline_interrupts() {
    let mut vm = Vm::with_config(VmConfig {
        deadline: Some(std::time::Instant::now()),
        ..VmConfig::default()
    });
    let err = vm.do_string("local i = 0 while true do i = i + 1 end", "=test").unwrap_err();
    assert!(matches!(err, LuaError::Interrupted));
}

#[test]
fn test_compile_error_through_vm() {
    let err = run_lua_error("x = = 1");
    assert!(matches!(err, LuaError::Compile(_)));
    assert_eq!(err.to_string(), "test:1: unexpected symbol near '='");
}
