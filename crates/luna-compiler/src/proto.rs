/// Function prototype: holds compiled bytecode, constants, and debug info.
use crate::opcode::Instruction;
use luna_core::number::fmt_float;
use luna_core::LuaStr;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// A constant value in the constant pool.
///
/// Equality and hashing are by identity of the Lua value *and* its type:
/// `1` and `1.0` are different constants, and floats compare by bit pattern.
#[derive(Clone, Debug)]
pub enum Constant {
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(LuaStr),
}

impl PartialEq for Constant {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Constant::Nil, Constant::Nil) => true,
            (Constant::Boolean(a), Constant::Boolean(b)) => a == b,
            (Constant::Integer(a), Constant::Integer(b)) => a == b,
            (Constant::Float(a), Constant::Float(b)) => a.to_bits() == b.to_bits(),
            (Constant::String(a), Constant::String(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Constant {}

impl Hash for Constant {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Constant::Nil => {}
            Constant::Boolean(b) => b.hash(state),
            Constant::Integer(i) => i.hash(state),
            Constant::Float(f) => f.to_bits().hash(state),
            Constant::String(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Constant {
    /// Listing form: strings quoted, floats in `%.14g`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::Nil => write!(f, "nil"),
            Constant::Boolean(b) => write!(f, "{b}"),
            Constant::Integer(i) => write!(f, "{i}"),
            Constant::Float(x) => f.write_str(&fmt_float(*x)),
            Constant::String(s) => write!(f, "{:?}", s.to_str_lossy()),
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpvalDesc {
    /// Name of the upvalue (debug info; absent in stripped chunks).
    pub name: Option<LuaStr>,
    /// True if the upvalue captures a register of the enclosing function,
    /// false if it re-shares one of the enclosing function's upvalues.
    pub in_stack: bool,
    /// Register index if `in_stack`, upvalue index in the parent otherwise.
    pub index: u8,
}

/// A local variable debug entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalVar {
    pub name: LuaStr,
    /// First PC where the variable is active.
    pub start_pc: u32,
    /// First PC where the variable is dead.
    pub end_pc: u32,
}

/// A compiled function prototype. Immutable once the compiler hands it out.
#[derive(Clone, Debug, PartialEq)]
pub struct Proto {
    pub code: Vec<Instruction>,
    pub constants: Vec<Constant>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    /// Chunk name (`@file`, `=name` or the source text).
    pub source: Option<LuaStr>,
    pub line_defined: u32,
    pub last_line_defined: u32,

    // --- Debug info ---
    /// Absolute source line of each instruction.
    pub line_info: Vec<u32>,
    pub local_vars: Vec<LocalVar>,
}

impl Proto {
    pub fn new() -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2, // registers 0/1 are always valid
            source: None,
            line_defined: 0,
            last_line_defined: 0,
            line_info: Vec::new(),
            local_vars: Vec::new(),
        }
    }

    /// Append an instruction at the given source line, returning its pc.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.line_info.push(line);
        pc
    }

    /// Remove the last instruction together with its line entry.
    pub fn pop_instruction(&mut self) -> Option<Instruction> {
        self.line_info.pop();
        self.code.pop()
    }

    /// Source line of the instruction at `pc`, or 0 without debug info.
    pub fn get_line(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Mutable access for backpatching.
    pub fn get_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.code[pc]
    }

    /// Name of the `n`-th local active at `pc` (1-based, in declaration
    /// order), used to describe registers in runtime error messages.
    pub fn local_name(&self, mut n: usize, pc: usize) -> Option<&LuaStr> {
        for var in &self.local_vars {
            if var.start_pc as usize > pc {
                break;
            }
            if pc < var.end_pc as usize {
                n -= 1;
                if n == 0 {
                    return Some(&var.name);
                }
            }
        }
        None
    }

    /// Drop debug information (line table, local names, upvalue names, source).
    pub fn strip(&mut self) {
        self.line_info.clear();
        self.local_vars.clear();
        self.source = None;
        for uv in &mut self.upvalues {
            uv.name = None;
        }
        for child in &mut self.protos {
            Rc::make_mut(child).strip();
        }
    }
}

impl Default for Proto {
    fn default() -> Self {
        Self::new()
    }
}
