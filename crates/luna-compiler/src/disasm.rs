/// Bytecode disassembler (luac -l style output).
use crate::opcode::{index_k, is_k, ArgMode, Instruction, InstructionFormat, OpCode};
use crate::proto::Proto;
use std::fmt;

/// Disassemble a prototype and all nested prototypes into a listing.
pub fn disassemble(proto: &Proto) -> String {
    Listing { proto, full: true }.to_string()
}

/// Listing of one prototype (and, with `full`, its nested ones).
pub struct Listing<'a> {
    pub proto: &'a Proto,
    /// Include constant, local and upvalue tables.
    pub full: bool,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_proto(f, self.proto, self.full)
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn write_proto(f: &mut fmt::Formatter<'_>, p: &Proto, full: bool) -> fmt::Result {
    let source = p
        .source
        .as_ref()
        .map(|s| crate::chunk_id(&s.to_str_lossy()))
        .unwrap_or_else(|| "=?".to_string());
    let kind = if p.line_defined == 0 { "main" } else { "function" };
    let n = p.code.len();
    writeln!(
        f,
        "\n{kind} <{source}:{},{}> ({n} instruction{})",
        p.line_defined,
        p.last_line_defined,
        plural(n)
    )?;
    let vararg = if p.is_vararg { "+" } else { "" };
    writeln!(
        f,
        "{}{vararg} param{}, {} slot{}, {} upvalue{}, {} local{}, {} constant{}, {} function{}",
        p.num_params,
        plural(p.num_params as usize),
        p.max_stack_size,
        plural(p.max_stack_size as usize),
        p.upvalues.len(),
        plural(p.upvalues.len()),
        p.local_vars.len(),
        plural(p.local_vars.len()),
        p.constants.len(),
        plural(p.constants.len()),
        p.protos.len(),
        plural(p.protos.len()),
    )?;

    for (pc, inst) in p.code.iter().enumerate() {
        let line = match p.get_line(pc) {
            0 => "[-]".to_string(),
            l => format!("[{l}]"),
        };
        write!(f, "\t{}\t{}\t{:<9}\t", pc + 1, line, inst.opcode().name())?;
        write_operands(f, *inst)?;
        write_comment(f, p, pc, *inst)?;
        writeln!(f)?;
    }

    if full {
        writeln!(f, "constants ({}):", p.constants.len())?;
        for (i, k) in p.constants.iter().enumerate() {
            writeln!(f, "\t{}\t{k}", i + 1)?;
        }
        writeln!(f, "locals ({}):", p.local_vars.len())?;
        for (i, v) in p.local_vars.iter().enumerate() {
            writeln!(f, "\t{i}\t{}\t{}\t{}", v.name, v.start_pc + 1, v.end_pc + 1)?;
        }
        writeln!(f, "upvalues ({}):", p.upvalues.len())?;
        for (i, uv) in p.upvalues.iter().enumerate() {
            let name = uv.name.as_ref().map_or_else(|| "-".to_string(), |s| s.to_string());
            writeln!(f, "\t{i}\t{name}\t{}\t{}", u8::from(uv.in_stack), uv.index)?;
        }
    }

    for child in &p.protos {
        write_proto(f, child, full)?;
    }
    Ok(())
}

/// RK operands print constants as negative numbers.
fn rk(x: u32) -> i64 {
    if is_k(x) {
        -1 - index_k(x) as i64
    } else {
        x as i64
    }
}

fn write_operands(f: &mut fmt::Formatter<'_>, i: Instruction) -> fmt::Result {
    let op = i.opcode();
    match op.format() {
        InstructionFormat::IABC => {
            write!(f, "{}", i.a())?;
            if op.b_mode() != ArgMode::N {
                let b = if op.b_mode() == ArgMode::K { rk(i.b()) } else { i.b() as i64 };
                write!(f, " {b}")?;
            }
            if op.c_mode() != ArgMode::N {
                let c = if op.c_mode() == ArgMode::K { rk(i.c()) } else { i.c() as i64 };
                write!(f, " {c}")?;
            }
            Ok(())
        }
        InstructionFormat::IABx => {
            write!(f, "{}", i.a())?;
            match op.b_mode() {
                ArgMode::K => write!(f, " {}", -1 - i.bx() as i64),
                ArgMode::U => write!(f, " {}", i.bx()),
                _ => Ok(()),
            }
        }
        InstructionFormat::IAsBx => write!(f, "{} {}", i.a(), i.sbx()),
        InstructionFormat::IAx => write!(f, "{}", -1 - i.ax_field() as i64),
    }
}

fn constant(p: &Proto, idx: u32) -> String {
    p.constants
        .get(idx as usize)
        .map_or_else(|| "?".to_string(), |k| k.to_string())
}

fn rk_constant(p: &Proto, x: u32) -> String {
    if is_k(x) {
        constant(p, index_k(x))
    } else {
        "-".to_string()
    }
}

fn upvalue_name(p: &Proto, idx: u32) -> String {
    p.upvalues
        .get(idx as usize)
        .and_then(|uv| uv.name.as_ref())
        .map_or_else(|| "-".to_string(), |s| s.to_string())
}

fn write_comment(f: &mut fmt::Formatter<'_>, p: &Proto, pc: usize, i: Instruction) -> fmt::Result {
    use OpCode::*;
    match i.opcode() {
        LoadK => write!(f, "\t; {}", constant(p, i.bx())),
        GetUpval | SetUpval => write!(f, "\t; {}", upvalue_name(p, i.b())),
        GetTabUp => {
            write!(f, "\t; {}", upvalue_name(p, i.b()))?;
            if is_k(i.c()) {
                write!(f, " {}", rk_constant(p, i.c()))?;
            }
            Ok(())
        }
        SetTabUp => {
            write!(f, "\t; {}", upvalue_name(p, i.a()))?;
            if is_k(i.b()) {
                write!(f, " {}", rk_constant(p, i.b()))?;
            }
            if is_k(i.c()) {
                write!(f, " {}", rk_constant(p, i.c()))?;
            }
            Ok(())
        }
        GetTable | OpSelf if is_k(i.c()) => write!(f, "\t; {}", rk_constant(p, i.c())),
        SetTable | Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr | BXor | Shl | Shr
        | Eq | Lt | Le
            if is_k(i.b()) || is_k(i.c()) =>
        {
            write!(f, "\t; {} {}", rk_constant(p, i.b()), rk_constant(p, i.c()))
        }
        Jmp | ForLoop | ForPrep | TForLoop => {
            write!(f, "\t; to {}", pc as i64 + i.sbx() as i64 + 2)
        }
        Closure => write!(f, "\t; function [{}]", i.bx()),
        SetList if i.c() == 0 => write!(f, "\t; extra arg"),
        SetList => write!(f, "\t; {}", i.c()),
        ExtraArg => write!(f, "\t; {}", constant(p, i.ax_field())),
        _ => Ok(()),
    }
}
