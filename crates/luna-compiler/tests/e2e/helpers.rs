use luna_compiler::opcode::{Instruction, OpCode};
use luna_compiler::proto::{Constant, Proto};
use luna_compiler::{compile, CompileError};

/// Compile a Lua source string, panicking with the message on failure.
pub fn compile_str(source: &str) -> Proto {
    compile(source.as_bytes(), "=test").unwrap_or_else(|e| {
        panic!("compile failed: {e}\nsource:\n{source}");
    })
}

/// Compile a Lua source string and expect an error.
pub fn compile_str_err(source: &str) -> CompileError {
    match compile(source.as_bytes(), "=test") {
        Err(e) => e,
        Ok(_) => panic!("expected compile error, got success\nsource:\n{source}"),
    }
}

/// Opcodes of a prototype, in order.
pub fn opcodes(proto: &Proto) -> Vec<OpCode> {
    proto.code.iter().map(Instruction::opcode).collect()
}

pub fn has_opcode(proto: &Proto, op: OpCode) -> bool {
    proto.code.iter().any(|i| i.opcode() == op)
}

pub fn count_opcode(proto: &Proto, op: OpCode) -> usize {
    proto.code.iter().filter(|i| i.opcode() == op).count()
}

/// First instruction with a given opcode.
pub fn find_opcode(proto: &Proto, op: OpCode) -> Option<Instruction> {
    proto.code.iter().copied().find(|i| i.opcode() == op)
}

#[allow(dead_code)]
pub fn get_string_constant(proto: &Proto, idx: usize) -> String {
    match &proto.constants[idx] {
        Constant::String(s) => s.to_string(),
        other => panic!("expected string constant, got {other:?}"),
    }
}

pub fn get_int_constant(proto: &Proto, idx: usize) -> i64 {
    match &proto.constants[idx] {
        Constant::Integer(i) => *i,
        other => panic!("expected integer constant, got {other:?}"),
    }
}
