use super::helpers::*;
use luna_compiler::opcode::OpCode;

#[test]
fn e2e_local_padding_with_nil() {
    let proto = compile_str("local a, b, c = 1");
    assert_eq!(
        opcodes(&proto),
        vec![OpCode::LoadK, OpCode::LoadNil, OpCode::Return]
    );
    assert_eq!((proto.code[1].a(), proto.code[1].b()), (1, 1));
}

#[test]
fn e2e_local_extra_values_evaluated() {
    let proto = compile_str("local a = 1, g()");
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 1);
    let call = find_opcode(&proto, OpCode::Call).unwrap();
    assert_eq!(call.c(), 1, "surplus call keeps no results");
    assert_eq!(proto.local_vars.len(), 1);
}

#[test]
fn e2e_local_from_call_adjusts_results() {
    let proto = compile_str("local a, b = f()");
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 3);
}

#[test]
fn e2e_swap_assignment() {
    let proto = compile_str("local a, b = 1, 2 a, b = b, a");
    let moves: Vec<(u32, u32)> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Move)
        .map(|i| (i.a(), i.b()))
        .collect();
    assert_eq!(moves, vec![(2, 1), (1, 0), (0, 2)]);
}

#[test]
fn e2e_assignment_conflict_copies_local() {
    let proto = compile_str("local t, i = {}, 1 t[i], i = 10, 20");
    let moves: Vec<(u32, u32)> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Move)
        .map(|i| (i.a(), i.b()))
        .collect();
    assert_eq!(moves, vec![(2, 1)]);
    let settable = find_opcode(&proto, OpCode::SetTable).unwrap();
    assert_eq!((settable.a(), settable.b(), settable.c()), (0, 2, 3));
}

#[test]
fn e2e_global_assignment() {
    let proto = compile_str("x = 42");
    let set = find_opcode(&proto, OpCode::SetTabUp).unwrap();
    assert_eq!(set.a(), 0);
    assert_eq!(get_string_constant(&proto, 0), "x");
}

#[test]
fn e2e_while_loop_jumps_back() {
    let proto = compile_str("local i = 0 while i < 10 do i = i + 1 end");
    assert!(has_opcode(&proto, OpCode::Lt));
    assert!(proto
        .code
        .iter()
        .any(|i| i.opcode() == OpCode::Jmp && i.sbx() < 0));
}

#[test]
fn e2e_repeat_condition_sees_body_locals() {
    let proto = compile_str("repeat local done = true until done");
    assert!(has_opcode(&proto, OpCode::Test));
    let back = proto
        .code
        .iter()
        .enumerate()
        .find(|(_, i)| i.opcode() == OpCode::Jmp)
        .map(|(pc, i)| pc as i32 + 1 + i.sbx())
        .unwrap();
    assert_eq!(back, 0);
}

#[test]
fn e2e_numeric_for_offsets() {
    let proto = compile_str("for i = 1, 10 do end");
    assert_eq!(
        opcodes(&proto),
        vec![
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::ForPrep,
            OpCode::ForLoop,
            OpCode::Return,
        ]
    );
    assert_eq!(proto.code[3].sbx(), 0);
    assert_eq!(proto.code[4].sbx(), -1);
    assert_eq!(proto.code[2].bx(), 0, "default step reuses constant 1");
}

#[test]
fn e2e_generic_for_jumps_to_call() {
    let proto = compile_str("for k, v in next, t do end");
    let ops = opcodes(&proto);
    let jmp = ops.iter().position(|&o| o == OpCode::Jmp).unwrap();
    let call = ops.iter().position(|&o| o == OpCode::TForCall).unwrap();
    assert_eq!(jmp as i32 + 1 + proto.code[jmp].sbx(), call as i32);
    let tforloop = proto.code[call + 1];
    assert_eq!(tforloop.opcode(), OpCode::TForLoop);
    assert_eq!(call as i32 + 2 + tforloop.sbx(), jmp as i32 + 1);
}

#[test]
fn e2e_if_elseif_else() {
    let proto = compile_str(
        "local a, b, r\n\
         if a then r = 1 elseif b then r = 2 else r = 3 end",
    );
    assert_eq!(count_opcode(&proto, OpCode::Test), 2);
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 3);
}

#[test]
fn e2e_do_block_closes_captured_local() {
    let proto = compile_str("do local x = 1 f = function() return x end end");
    let jmp = find_opcode(&proto, OpCode::Jmp).unwrap();
    assert_eq!(jmp.a(), 1);
    assert_eq!(jmp.sbx(), 0);
}

#[test]
fn e2e_for_body_closes_loop_variable() {
    let proto = compile_str("local fs = {} for i = 1, 3 do fs[i] = function() return i end end");
    assert!(proto
        .code
        .iter()
        .any(|i| i.opcode() == OpCode::Jmp && i.a() == 5));
}

#[test]
fn e2e_local_function_debug_range() {
    let proto = compile_str("local function f() end");
    assert_eq!(proto.code[0].opcode(), OpCode::Closure);
    assert_eq!(proto.local_vars[0].name.to_string(), "f");
    assert_eq!(proto.local_vars[0].start_pc, 1);
}

#[test]
fn e2e_local_ranges_close_at_block_end() {
    let proto = compile_str("local a = 1 do local b = 2 end local c = 3");
    let ranges: Vec<(String, u32, u32)> = proto
        .local_vars
        .iter()
        .map(|v| (v.name.to_string(), v.start_pc, v.end_pc))
        .collect();
    assert_eq!(
        ranges,
        vec![
            ("a".to_string(), 1, 4),
            ("b".to_string(), 2, 2),
            ("c".to_string(), 3, 4),
        ]
    );
}

#[test]
fn e2e_method_definition_adds_self() {
    let proto = compile_str("local t = {a = {}} function t.a:m(x) return self end");
    let method = &proto.protos[0];
    assert_eq!(method.num_params, 2);
    assert_eq!(method.local_vars[0].name.to_string(), "self");
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_break_leaves_loop() {
    let proto = compile_str("while true do break end");
    let ops = opcodes(&proto);
    assert_eq!(ops, vec![OpCode::Jmp, OpCode::Jmp, OpCode::Return]);
    assert_eq!(proto.code[0].sbx(), 1, "break targets the end of the loop");
    assert_eq!(proto.code[1].sbx(), -2, "loop jumps back to its start");
}
