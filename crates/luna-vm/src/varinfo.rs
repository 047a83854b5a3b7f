//! Names for the values behind runtime type errors, recovered from the
//! bytecode: `(local 'x')`, `(global 'print')`, `(field 'y')`, ...

use luna_compiler::opcode::{index_k, is_k, OpCode};
use luna_compiler::proto::{Constant, Proto};

/// Find the last instruction before `lastpc` that wrote register `reg`.
/// Writes inside a forward jump's range are ambiguous and yield `None`.
fn find_set_reg(p: &Proto, lastpc: usize, reg: u32) -> Option<usize> {
    let mut setreg = None;
    let mut jmptarget = 0usize;
    for pc in 0..lastpc.min(p.code.len()) {
        let i = p.code[pc];
        let a = i.a();
        let op = i.opcode();
        let change = match op {
            OpCode::LoadNil => a <= reg && reg <= a + i.b(),
            OpCode::TForCall => reg >= a + 2,
            OpCode::Call | OpCode::TailCall => reg >= a,
            OpCode::Jmp => {
                let dest = pc as i64 + 1 + i.sbx() as i64;
                if (pc as i64) < dest && dest <= lastpc as i64 && dest as usize > jmptarget {
                    jmptarget = dest as usize;
                }
                false
            }
            _ => op.sets_a() && reg == a,
        };
        if change {
            setreg = if pc < jmptarget { None } else { Some(pc) };
        }
    }
    setreg
}

fn string_constant(p: &Proto, idx: u32) -> Option<String> {
    match p.constants.get(idx as usize) {
        Some(Constant::String(s)) => Some(s.to_str_lossy().into_owned()),
        _ => None,
    }
}

/// Name of the key operand `c` of a table access.
fn key_name(p: &Proto, pc: usize, c: u32) -> String {
    if is_k(c) {
        return string_constant(p, index_k(c)).unwrap_or_else(|| "?".to_string());
    }
    match object_name(p, pc, c) {
        Some(("constant", name)) => name,
        _ => "?".to_string(),
    }
}

fn upvalue_name(p: &Proto, idx: u32) -> String {
    p.upvalues
        .get(idx as usize)
        .and_then(|uv| uv.name.as_ref())
        .map_or_else(|| "?".to_string(), |n| n.to_str_lossy().into_owned())
}

/// Kind and name of whatever register `reg` holds at `lastpc`.
fn object_name(p: &Proto, lastpc: usize, reg: u32) -> Option<(&'static str, String)> {
    if let Some(name) = p.local_name(reg as usize + 1, lastpc) {
        return Some(("local", name.to_str_lossy().into_owned()));
    }
    let pc = find_set_reg(p, lastpc, reg)?;
    let i = p.code[pc];
    match i.opcode() {
        OpCode::Move => {
            let b = i.b();
            if b < i.a() {
                object_name(p, pc, b)
            } else {
                None
            }
        }
        OpCode::GetTabUp => {
            let kind = if upvalue_name(p, i.b()) == "_ENV" { "global" } else { "field" };
            Some((kind, key_name(p, pc, i.c())))
        }
        OpCode::GetTable => {
            let table_is_env = p
                .local_name(i.b() as usize + 1, pc)
                .is_some_and(|n| n.as_bytes() == b"_ENV");
            let kind = if table_is_env { "global" } else { "field" };
            Some((kind, key_name(p, pc, i.c())))
        }
        OpCode::GetUpval => Some(("upvalue", upvalue_name(p, i.b()))),
        OpCode::LoadK => string_constant(p, i.bx()).map(|s| ("constant", s)),
        OpCode::LoadKx => {
            let ax = p.code.get(pc + 1)?.ax_field();
            string_constant(p, ax).map(|s| ("constant", s))
        }
        OpCode::OpSelf => Some(("method", key_name(p, pc, i.c()))),
        _ => None,
    }
}

/// ` (kind 'name')` for register `reg` at `pc`, or an empty string.
pub fn register_info(p: &Proto, pc: usize, reg: u32) -> String {
    match object_name(p, pc, reg) {
        Some((kind, name)) => format!(" ({kind} '{name}')"),
        None => String::new(),
    }
}

pub fn upvalue_info(p: &Proto, idx: u32) -> String {
    format!(" (upvalue '{}')", upvalue_name(p, idx))
}
