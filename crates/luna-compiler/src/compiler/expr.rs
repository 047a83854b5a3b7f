/// Expression descriptors and operator tables.
use crate::opcode::OpCode;
use crate::token::Token;
use luna_core::ArithOp;

/// Marker terminating a jump list.
pub const NO_JUMP: i32 = -1;

/// `nresults` value meaning "all results".
pub const MULTRET: i32 = -1;

/// Where the table of an indexed expression lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexBase {
    Local,
    Upval,
}

/// Describes where an expression's value currently lives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExpKind {
    /// No value (empty expression list or statement result).
    Void,
    Nil,
    True,
    False,
    /// Constant pool entry.
    K(u32),
    /// Float literal not yet in the pool.
    KFlt(f64),
    /// Integer literal not yet in the pool.
    KInt(i64),
    /// Value fixed in a register that cannot be relocated.
    NonReloc(u32),
    /// Active local variable in a register.
    Local(u32),
    Upval(u32),
    /// `t[idx]` with `t` a register or upvalue and `idx` an RK operand.
    Indexed { t: u32, idx: u32, base: IndexBase },
    /// Result of a comparison; the payload is the pc of its JMP.
    Jmp(usize),
    /// Instruction at pc whose destination register A is still open.
    Reloc(usize),
    /// Function call at pc.
    Call(usize),
    /// VARARG instruction at pc.
    VarArg(usize),
}

/// An expression under construction plus its pending true/false exits.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ExpDesc {
    pub kind: ExpKind,
    /// Patch list of "exit when true".
    pub t: i32,
    /// Patch list of "exit when false".
    pub f: i32,
}

impl ExpDesc {
    pub fn new(kind: ExpKind) -> Self {
        ExpDesc { kind, t: NO_JUMP, f: NO_JUMP }
    }

    pub fn void() -> Self {
        Self::new(ExpKind::Void)
    }

    pub fn has_jumps(&self) -> bool {
        self.t != self.f
    }

    /// Calls and `...` can produce any number of values.
    pub fn has_multret(&self) -> bool {
        matches!(self.kind, ExpKind::Call(_) | ExpKind::VarArg(_))
    }

    /// Can this expression be assigned to?
    pub fn is_var(&self) -> bool {
        matches!(self.kind, ExpKind::Local(_) | ExpKind::Upval(_) | ExpKind::Indexed { .. })
    }

    /// Register holding the value, for `NonReloc` and `Local`.
    pub fn reg(&self) -> Option<u32> {
        match self.kind {
            ExpKind::NonReloc(r) | ExpKind::Local(r) => Some(r),
            _ => None,
        }
    }
}

/// Binary operators, in the order of their left/right priorities.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Mod,
    Pow,
    Div,
    IDiv,
    BAnd,
    BOr,
    BXor,
    Shl,
    Shr,
    Concat,
    Eq,
    Lt,
    Le,
    Ne,
    Gt,
    Ge,
    And,
    Or,
}

impl BinOp {
    pub fn from_token(tok: &Token) -> Option<BinOp> {
        Some(match tok {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::Slash => BinOp::Div,
            Token::FloorDiv => BinOp::IDiv,
            Token::Ampersand => BinOp::BAnd,
            Token::Pipe => BinOp::BOr,
            Token::Tilde => BinOp::BXor,
            Token::ShiftLeft => BinOp::Shl,
            Token::ShiftRight => BinOp::Shr,
            Token::DotDot => BinOp::Concat,
            Token::Equal => BinOp::Eq,
            Token::Less => BinOp::Lt,
            Token::LessEq => BinOp::Le,
            Token::NotEqual => BinOp::Ne,
            Token::Greater => BinOp::Gt,
            Token::GreaterEq => BinOp::Ge,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        })
    }

    /// (left priority, right priority); higher binds tighter.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Eq | BinOp::Lt | BinOp::Le | BinOp::Ne | BinOp::Gt | BinOp::Ge => (3, 3),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::BAnd => (6, 6),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8), // right associative
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
            BinOp::Pow => (14, 13), // right associative
        }
    }

    /// Arithmetic/bitwise operator for folding and code generation.
    pub fn arith(self) -> Option<ArithOp> {
        Some(match self {
            BinOp::Add => ArithOp::Add,
            BinOp::Sub => ArithOp::Sub,
            BinOp::Mul => ArithOp::Mul,
            BinOp::Mod => ArithOp::Mod,
            BinOp::Pow => ArithOp::Pow,
            BinOp::Div => ArithOp::Div,
            BinOp::IDiv => ArithOp::IDiv,
            BinOp::BAnd => ArithOp::BAnd,
            BinOp::BOr => ArithOp::BOr,
            BinOp::BXor => ArithOp::BXor,
            BinOp::Shl => ArithOp::Shl,
            BinOp::Shr => ArithOp::Shr,
            _ => return None,
        })
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Minus,
    BNot,
    Not,
    Len,
}

impl UnOp {
    pub fn from_token(tok: &Token) -> Option<UnOp> {
        Some(match tok {
            Token::Minus => UnOp::Minus,
            Token::Tilde => UnOp::BNot,
            Token::Not => UnOp::Not,
            Token::Hash => UnOp::Len,
            _ => return None,
        })
    }
}

/// Priority of all unary operators.
pub const UNARY_PRIORITY: u8 = 12;

/// Opcode implementing an arithmetic operator.
pub fn arith_opcode(op: ArithOp) -> OpCode {
    match op {
        ArithOp::Add => OpCode::Add,
        ArithOp::Sub => OpCode::Sub,
        ArithOp::Mul => OpCode::Mul,
        ArithOp::Mod => OpCode::Mod,
        ArithOp::Pow => OpCode::Pow,
        ArithOp::Div => OpCode::Div,
        ArithOp::IDiv => OpCode::IDiv,
        ArithOp::BAnd => OpCode::BAnd,
        ArithOp::BOr => OpCode::BOr,
        ArithOp::BXor => OpCode::BXor,
        ArithOp::Shl => OpCode::Shl,
        ArithOp::Shr => OpCode::Shr,
        ArithOp::Unm => OpCode::Unm,
        ArithOp::BNot => OpCode::BNot,
    }
}
