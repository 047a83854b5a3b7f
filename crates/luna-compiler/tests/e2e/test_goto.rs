use super::helpers::*;
use luna_compiler::opcode::OpCode;

fn jump_targets(proto: &luna_compiler::Proto) -> Vec<i32> {
    proto
        .code
        .iter()
        .enumerate()
        .filter(|(_, i)| i.opcode() == OpCode::Jmp)
        .map(|(pc, i)| pc as i32 + 1 + i.sbx())
        .collect()
}

#[test]
fn e2e_backward_goto_targets_label() {
    let proto = compile_str("local i = 0 ::top:: i = i + 1 if i < 3 then goto top end");
    // label 'top' sits right after the initial LOADK
    assert!(jump_targets(&proto).contains(&1));
}

#[test]
fn e2e_forward_goto_targets_label() {
    let proto = compile_str("goto done print(1) ::done::");
    let last = proto.code.len() as i32 - 1;
    assert_eq!(jump_targets(&proto)[0], last);
}

#[test]
fn e2e_continue_idiom() {
    let proto = compile_str(
        "for i = 1, 3 do\n\
           if i == 2 then goto continue end\n\
           local x = i\n\
           ::continue::\n\
         end",
    );
    assert!(has_opcode(&proto, OpCode::ForLoop));
}

#[test]
fn e2e_goto_into_local_scope() {
    let err = compile_str_err("goto x; local a; ::x:: print(a)");
    assert_eq!(err.message, "<goto x> at line 1 jumps into the scope of local 'a'");
    assert!(err.near.is_none());
    let err = compile_str_err("do\n  goto l\n  local a\n  ::l::\n  print(a)\nend");
    assert_eq!(err.message, "<goto l> at line 2 jumps into the scope of local 'a'");
}

#[test]
fn e2e_goto_cannot_see_nested_label() {
    let err = compile_str_err("goto inner do ::inner:: end");
    assert_eq!(err.message, "no visible label 'inner' for goto at line 1");
}

#[test]
fn e2e_goto_out_of_block() {
    let proto = compile_str("do goto out end ::out::");
    assert_eq!(jump_targets(&proto), vec![1]);
}

#[test]
fn e2e_goto_out_of_block_closes_upvalues() {
    let proto = compile_str("do local x = 1 f = function() return x end goto out end ::out::");
    let jumps: Vec<u32> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::Jmp)
        .map(|i| i.a())
        .collect();
    assert!(!jumps.is_empty());
    assert!(jumps.iter().all(|&a| a == 1));
}

#[test]
fn e2e_duplicate_label() {
    let err = compile_str_err("::a:: ::a::");
    assert_eq!(err.message, "label 'a' already defined on line 1");
    // a nested block may reuse the name
    compile_str("::a:: do ::a:: end");
}

#[test]
fn e2e_break_outside_loop() {
    let err = compile_str_err("local x = 1\nbreak");
    assert_eq!(err.message, "break at line 2 not inside a loop");
    assert!(err.near.is_none());
}

#[test]
fn e2e_break_from_nested_block() {
    let proto = compile_str("while true do do break end end");
    let ops = opcodes(&proto);
    assert_eq!(ops.last(), Some(&OpCode::Return));
    let end = proto.code.len() as i32 - 1;
    assert!(jump_targets(&proto).contains(&end));
}

#[test]
fn e2e_if_goto_shortcut() {
    let proto = compile_str("local a ::top:: if a then goto top end");
    // the conditional jump itself goes to the label, no extra JMP
    assert_eq!(count_opcode(&proto, OpCode::Jmp), 1);
    assert_eq!(jump_targets(&proto), vec![1]);
}

#[test]
fn e2e_goto_from_nested_block_into_local_scope() {
    let err = compile_str_err("do do goto l end end local a ::l:: print(a)");
    assert_eq!(err.message, "<goto l> at line 1 jumps into the scope of local 'a'");
    let err = compile_str_err("while x do do goto l end local a ::l:: print(a) end");
    assert_eq!(err.message, "<goto l> at line 1 jumps into the scope of local 'a'");
}

#[test]
fn e2e_goto_from_nested_block_to_final_label() {
    // a label closing its block is outside the scope of the block's locals
    let proto = compile_str("do do goto out end end local y = 2 ::out::");
    let end = proto.code.len() as i32 - 1;
    assert_eq!(jump_targets(&proto), vec![end]);
}

#[test]
fn e2e_backward_goto_two_blocks_out() {
    let proto = compile_str("local x = 1 ::top:: do do x = x + 1 goto top end end");
    let label_pc = opcodes(&proto).iter().position(|&op| op == OpCode::Add).unwrap() as i32;
    assert_eq!(jump_targets(&proto), vec![label_pc]);
}

#[test]
fn e2e_forward_goto_three_blocks_out() {
    let proto = compile_str("do local a = 1 do do goto out end end end ::out:: return");
    let ret = opcodes(&proto).iter().position(|&op| op == OpCode::Return).unwrap() as i32;
    assert_eq!(jump_targets(&proto), vec![ret]);
}
