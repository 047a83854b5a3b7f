use super::helpers::*;
use luna_compiler::opcode::OpCode;

#[test]
fn e2e_params_and_vararg_flag() {
    let proto = compile_str("local function f(a, b, ...) end local function g() end");
    assert_eq!(proto.protos.len(), 2);
    assert_eq!(proto.protos[0].num_params, 2);
    assert!(proto.protos[0].is_vararg);
    assert_eq!(proto.protos[1].num_params, 0);
    assert!(!proto.protos[1].is_vararg);
}

#[test]
fn e2e_upvalue_chain_through_intermediate_function() {
    let proto = compile_str("local x function a() return function() return x end end");
    let a = &proto.protos[0];
    assert_eq!(a.upvalues.len(), 1);
    assert_eq!(a.upvalues[0].name.as_ref().unwrap().to_string(), "x");
    assert!(a.upvalues[0].in_stack);
    assert_eq!(a.upvalues[0].index, 0);
    let inner = &a.protos[0];
    assert_eq!(inner.upvalues.len(), 1);
    assert!(!inner.upvalues[0].in_stack);
    assert_eq!(inner.upvalues[0].index, 0);
}

#[test]
fn e2e_globals_in_nested_function_reach_env() {
    let proto = compile_str("function f() return g end");
    let f = &proto.protos[0];
    assert_eq!(f.upvalues[0].name.as_ref().unwrap().to_string(), "_ENV");
    assert!(!f.upvalues[0].in_stack);
    assert_eq!(f.upvalues[0].index, 0);
    assert!(has_opcode(f, OpCode::GetTabUp));
}

#[test]
fn e2e_upvalues_are_shared_by_name() {
    let proto = compile_str("local x, y function f() return x + y + x end");
    let f = &proto.protos[0];
    assert_eq!(f.upvalues.len(), 2);
    assert_eq!(count_opcode(f, OpCode::GetUpval), 3);
}

#[test]
fn e2e_upvalue_assignment() {
    let proto = compile_str("local x function f() x = 1 end");
    assert!(has_opcode(&proto.protos[0], OpCode::SetUpval));
}

#[test]
fn e2e_tail_call_only_in_tail_position() {
    let proto = compile_str("return f(1)");
    assert!(has_opcode(&proto, OpCode::TailCall));
    let proto = compile_str("return (f(1))");
    assert!(!has_opcode(&proto, OpCode::TailCall));
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 2);
    let proto = compile_str("return f(1), 2");
    assert!(!has_opcode(&proto, OpCode::TailCall));
}

#[test]
fn e2e_method_call() {
    let proto = compile_str("local obj obj:m(1, 2)");
    let self_op = find_opcode(&proto, OpCode::OpSelf).unwrap();
    assert_eq!((self_op.a(), self_op.b()), (1, 0));
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!((call.a(), call.b(), call.c()), (1, 4, 1));
}

#[test]
fn e2e_string_and_table_call_arguments() {
    let proto = compile_str("f 'x' f { 1 }");
    let calls: Vec<u32> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Call)
        .map(|i| i.b())
        .collect();
    assert_eq!(calls, vec![2, 2]);
}

#[test]
fn e2e_vararg_forwarding() {
    let proto = compile_str("f(...)");
    assert_eq!(find_opcode(&proto, OpCode::VarArg).unwrap().b(), 0);
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().b(), 0);
}

#[test]
fn e2e_line_info() {
    let proto = compile_str("local a = 1\nlocal b = 2\nreturn a + b");
    assert_eq!(proto.line_info, vec![1, 2, 3, 3, 3]);
}

#[test]
fn e2e_function_line_range() {
    let proto = compile_str("local x\n\nlocal function f()\n  return x\nend\n");
    let f = &proto.protos[0];
    assert_eq!(f.line_defined, 3);
    assert_eq!(f.last_line_defined, 5);
    assert_eq!(proto.line_defined, 0);
}

#[test]
fn e2e_recursive_local_function_sees_itself() {
    let proto = compile_str("local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end");
    let fact = &proto.protos[0];
    assert_eq!(fact.upvalues[0].name.as_ref().unwrap().to_string(), "fact");
    assert!(fact.upvalues[0].in_stack);
}

#[test]
fn e2e_prototype_source_is_chunk_name() {
    let proto = compile_str("local function f() end");
    assert_eq!(proto.source.as_ref().unwrap().to_string(), "=test");
    assert_eq!(proto.protos[0].source, proto.source);
}
