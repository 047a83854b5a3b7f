use super::helpers::*;
use luna_compiler::opcode::{is_k, rk_as_k, OpCode};
use luna_compiler::proto::Constant;
use proptest::prelude::*;

#[test]
fn e2e_fold_arith_to_single_loadk() {
    let proto = compile_str("return 2 + 3 * 4");
    assert_eq!(
        opcodes(&proto),
        vec![OpCode::LoadK, OpCode::Return, OpCode::Return]
    );
    assert_eq!(get_int_constant(&proto, 0), 14);
}

#[test]
fn e2e_fold_keeps_integer_and_float_apart() {
    let proto = compile_str("return 1.5 * 2, 2^2, 7 // 2, 7 % -3, 1 << 64, ~0, -5");
    assert_eq!(count_opcode(&proto, OpCode::LoadK), 7);
    assert_eq!(
        proto.constants,
        vec![
            Constant::Float(3.0),
            Constant::Float(4.0),
            Constant::Integer(3),
            Constant::Integer(-2),
            Constant::Integer(0),
            Constant::Integer(-1),
            Constant::Integer(-5),
        ]
    );
}

#[test]
fn e2e_no_fold_for_traps_and_signed_zero() {
    for (src, op) in [
        ("return 2 / 0", OpCode::Div),
        ("return 1 // 0", OpCode::IDiv),
        ("return 1 % 0", OpCode::Mod),
        ("return 1.5 & 1", OpCode::BAnd),
        ("return 1 - 1.0", OpCode::Sub),
        ("return -0.0", OpCode::Unm),
    ] {
        let proto = compile_str(src);
        assert!(has_opcode(&proto, op), "{src} should keep {op:?}");
    }
}

#[test]
fn e2e_arith_with_constant_operand() {
    let proto = compile_str("local a = 1 return a + 1");
    let add = find_opcode(&proto, OpCode::Add).unwrap();
    assert_eq!(add.a(), 1);
    assert_eq!(add.b(), 0);
    assert_eq!(add.c(), rk_as_k(0));
}

#[test]
fn e2e_comparison_materialized_with_loadbool() {
    let proto = compile_str("local a, b = 1, 2 return a < b");
    assert_eq!(
        opcodes(&proto),
        vec![
            OpCode::LoadK,
            OpCode::LoadK,
            OpCode::Lt,
            OpCode::Jmp,
            OpCode::LoadBool,
            OpCode::LoadBool,
            OpCode::Return,
            OpCode::Return,
        ]
    );
    assert_eq!(proto.code[2].a(), 1);
    assert_eq!(proto.code[3].sbx(), 1);
    assert_eq!(proto.code[4].c(), 1, "false branch skips the true load");
}

#[test]
fn e2e_greater_swaps_operands() {
    let proto = compile_str("local a, b = 1, 2 return a > b");
    let lt = find_opcode(&proto, OpCode::Lt).unwrap();
    assert_eq!((lt.b(), lt.c()), (1, 0));
    let proto = compile_str("local a, b = 1, 2 return a ~= b");
    let eq = find_opcode(&proto, OpCode::Eq).unwrap();
    assert_eq!(eq.a(), 0);
}

#[test]
fn e2e_and_uses_testset() {
    let proto = compile_str("local a, b return a and b");
    assert_eq!(
        opcodes(&proto),
        vec![
            OpCode::LoadNil,
            OpCode::TestSet,
            OpCode::Jmp,
            OpCode::Move,
            OpCode::Return,
            OpCode::Return,
        ]
    );
    assert_eq!(proto.code[1].a(), 2);
    assert_eq!(proto.code[1].b(), 0);
    assert_eq!(proto.code[2].sbx(), 1);
}

#[test]
fn e2e_not_in_condition_becomes_test() {
    let proto = compile_str("local a if not a then a = 1 end");
    assert!(!has_opcode(&proto, OpCode::Not));
    let test = find_opcode(&proto, OpCode::Test).unwrap();
    assert_eq!(test.c(), 1);
}

#[test]
fn e2e_constant_condition_emits_no_test() {
    let proto = compile_str("if true then local x = 1 end");
    assert!(!has_opcode(&proto, OpCode::Test));
    let proto = compile_str("local y if y then local x = 1 end");
    assert!(has_opcode(&proto, OpCode::Test));
    assert!(has_opcode(&proto, OpCode::Jmp));
}

#[test]
fn e2e_concat_chain_is_one_instruction() {
    let proto = compile_str("local a, b, c = 'x', 'y', 'z' return a .. b .. c");
    assert_eq!(count_opcode(&proto, OpCode::Concat), 1);
    let concat = find_opcode(&proto, OpCode::Concat).unwrap();
    assert_eq!((concat.a(), concat.b(), concat.c()), (3, 3, 5));
}

#[test]
fn e2e_table_constructor_sizes() {
    let proto = compile_str("return {1, 2, 3, x = 1}");
    let newtable = find_opcode(&proto, OpCode::NewTable).unwrap();
    assert_eq!((newtable.b(), newtable.c()), (3, 1));
    let setlist = find_opcode(&proto, OpCode::SetList).unwrap();
    assert_eq!((setlist.b(), setlist.c()), (3, 1));
    assert!(has_opcode(&proto, OpCode::SetTable));
}

#[test]
fn e2e_constructor_flushes_every_fifty() {
    let items: Vec<String> = (1..=60).map(|i| i.to_string()).collect();
    let proto = compile_str(&format!("return {{{}}}", items.join(", ")));
    let flushes: Vec<(u32, u32)> = proto
        .code
        .iter()
        .filter(|i| i.opcode() == OpCode::SetList)
        .map(|i| (i.b(), i.c()))
        .collect();
    assert_eq!(flushes, vec![(50, 1), (10, 2)]);
}

#[test]
fn e2e_constructor_open_last_item() {
    let proto = compile_str("return {f()}");
    assert_eq!(find_opcode(&proto, OpCode::Call).unwrap().c(), 0);
    assert_eq!(find_opcode(&proto, OpCode::SetList).unwrap().b(), 0);
    let proto = compile_str("return {...}");
    assert_eq!(find_opcode(&proto, OpCode::VarArg).unwrap().b(), 0);
}

#[test]
fn e2e_return_vararg() {
    let proto = compile_str("return ...");
    let vararg = find_opcode(&proto, OpCode::VarArg).unwrap();
    assert_eq!((vararg.a(), vararg.b()), (0, 0));
    assert_eq!(proto.code[1].b(), 0);
}

#[test]
fn e2e_constant_beyond_rk_range_uses_register() {
    let mut src = String::new();
    for i in 0..300 {
        src.push_str(&format!("do local v = 's{i}' end\n"));
    }
    src.push_str("local t = {} t.key = 1\n");
    let proto = compile_str(&src);
    let settable = proto
        .code
        .iter()
        .rev()
        .find(|i| i.opcode() == OpCode::SetTable)
        .copied()
        .unwrap();
    assert!(!is_k(settable.b()));
    assert!(!is_k(settable.c()));
}

#[test]
fn e2e_unary_on_variables() {
    let proto = compile_str("local x return -x, #x, ~x, not x");
    for op in [OpCode::Unm, OpCode::Len, OpCode::BNot, OpCode::Not] {
        assert!(has_opcode(&proto, op), "missing {op:?}");
    }
}

proptest! {
    #[test]
    fn prop_integer_addition_folds(a in -1_000_000_000_000i64..1_000_000_000_000, b in -1_000_000_000_000i64..1_000_000_000_000) {
        let proto = compile_str(&format!("return ({a}) + ({b})"));
        prop_assert_eq!(proto.code.len(), 3);
        prop_assert_eq!(&proto.constants, &vec![Constant::Integer(a + b)]);
    }

    #[test]
    fn prop_integer_multiplication_folds(a in -100_000i64..100_000, b in -100_000i64..100_000) {
        let proto = compile_str(&format!("return ({a}) * ({b})"));
        prop_assert_eq!(&proto.constants, &vec![Constant::Integer(a * b)]);
    }
}
