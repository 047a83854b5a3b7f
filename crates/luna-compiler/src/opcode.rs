/// Lua 5.3 opcodes and instruction encoding.
///
/// Instruction format (32 bits):
/// - Bits 0-5: OpCode (6 bits)
/// - Bits 6-13: A (8 bits)
/// - For iABC format:
///   - Bits 14-22: C (9 bits)
///   - Bits 23-31: B (9 bits)
/// - For iABx: Bx = bits 14-31 (unsigned 18 bits)
/// - For iAsBx: sBx = Bx - MAX_SBX (signed, excess-K encoding)
/// - For iAx: Ax = bits 6-31 (26 bits, unsigned)
use std::fmt;

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_B: u32 = 9;
const SIZE_C: u32 = 9;
const SIZE_BX: u32 = SIZE_B + SIZE_C; // 18
const SIZE_AX: u32 = SIZE_A + SIZE_B + SIZE_C; // 26

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP; // 6
const POS_C: u32 = POS_A + SIZE_A; // 14
const POS_B: u32 = POS_C + SIZE_C; // 23
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

const fn mask(n: u32) -> u32 {
    (1 << n) - 1
}

pub const MAX_A: u32 = mask(SIZE_A); // 255
pub const MAX_B: u32 = mask(SIZE_B); // 511
pub const MAX_C: u32 = mask(SIZE_C); // 511
pub const MAX_BX: u32 = mask(SIZE_BX); // 262143
pub const MAX_SBX: i32 = (MAX_BX >> 1) as i32; // 131071
pub const MAX_AX: u32 = mask(SIZE_AX);

/// RK operands with this bit set name a constant.
pub const BIT_RK: u32 = 1 << (SIZE_B - 1);
/// Largest constant index that fits in an RK operand.
pub const MAX_INDEX_RK: u32 = BIT_RK - 1;
/// "No register" marker used while patching TESTSET.
pub const NO_REG: u32 = MAX_A;
/// Number of list items accumulated before a SETLIST flush.
pub const FIELDS_PER_FLUSH: u32 = 50;

pub fn is_k(x: u32) -> bool {
    x & BIT_RK != 0
}

pub fn index_k(x: u32) -> u32 {
    x & !BIT_RK
}

pub fn rk_as_k(x: u32) -> u32 {
    x | BIT_RK
}

/// All 47 Lua 5.3 opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKx,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    OpSelf,
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
    Unm,
    BNot,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    VarArg,
    ExtraArg,
}

/// Instruction layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstructionFormat {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// How an instruction uses its B or C operand.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgMode {
    /// Not used.
    N,
    /// Used, but not a register or constant.
    U,
    /// Register or jump offset.
    R,
    /// Constant or register/constant.
    K,
}

const ALL_OPCODES: [OpCode; OpCode::COUNT] = {
    use OpCode::*;
    [
        Move, LoadK, LoadKx, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp, SetUpval,
        SetTable, NewTable, OpSelf, Add, Sub, Mul, Mod, Pow, Div, IDiv, BAnd, BOr, BXor, Shl, Shr,
        Unm, BNot, Not, Len, Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return,
        ForLoop, ForPrep, TForCall, TForLoop, SetList, Closure, VarArg, ExtraArg,
    ]
};

impl OpCode {
    pub const COUNT: usize = 47;

    /// Decode an opcode number.
    pub fn from_u8(val: u8) -> Option<OpCode> {
        ALL_OPCODES.get(val as usize).copied()
    }

    pub fn format(self) -> InstructionFormat {
        use OpCode::*;
        match self {
            LoadK | LoadKx | Closure => InstructionFormat::IABx,
            Jmp | ForLoop | ForPrep | TForLoop => InstructionFormat::IAsBx,
            ExtraArg => InstructionFormat::IAx,
            _ => InstructionFormat::IABC,
        }
    }

    /// Upper-case mnemonic, as printed by listings.
    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKx => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            OpSelf => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Mod => "MOD",
            Pow => "POW",
            Div => "DIV",
            IDiv => "IDIV",
            BAnd => "BAND",
            BOr => "BOR",
            BXor => "BXOR",
            Shl => "SHL",
            Shr => "SHR",
            Unm => "UNM",
            BNot => "BNOT",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            VarArg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// Test-mode instructions are always followed by a JMP.
    pub fn is_test(self) -> bool {
        matches!(self, OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test | OpCode::TestSet)
    }

    /// True if the instruction writes register A.
    pub fn sets_a(self) -> bool {
        use OpCode::*;
        !matches!(
            self,
            SetTabUp | SetUpval | SetTable | Jmp | Eq | Lt | Le | Test | Return | TForCall | SetList | ExtraArg
        )
    }

    pub fn b_mode(self) -> ArgMode {
        use OpCode::*;
        match self {
            Move | GetTable | OpSelf | Unm | BNot | Not | Len | Concat | Jmp | TestSet | ForLoop
            | ForPrep | TForLoop => ArgMode::R,
            LoadK | SetTabUp | SetTable | Add | Sub | Mul | Mod | Pow | Div | IDiv | BAnd | BOr
            | BXor | Shl | Shr | Eq | Lt | Le => ArgMode::K,
            LoadKx | Test | TForCall => ArgMode::N,
            _ => ArgMode::U,
        }
    }

    pub fn c_mode(self) -> ArgMode {
        use OpCode::*;
        match self {
            GetTabUp | GetTable | SetTabUp | SetTable | OpSelf | Add | Sub | Mul | Mod | Pow | Div
            | IDiv | BAnd | BOr | BXor | Shl | Shr | Eq | Lt | Le => ArgMode::K,
            Concat => ArgMode::R,
            LoadBool | NewTable | Test | TestSet | Call | TailCall | TForCall | SetList
            | ExtraArg => ArgMode::U,
            _ => ArgMode::N,
        }
    }
}

/// A 32-bit Lua 5.3 instruction.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction(pub u32);

impl Instruction {
    pub fn abc(op: OpCode, a: u32, b: u32, c: u32) -> Self {
        debug_assert!(a <= MAX_A && b <= MAX_B && c <= MAX_C);
        Instruction(
            ((op as u32) << POS_OP) | (a << POS_A) | (b << POS_B) | (c << POS_C),
        )
    }

    pub fn abx(op: OpCode, a: u32, bx: u32) -> Self {
        debug_assert!(a <= MAX_A && bx <= MAX_BX);
        Instruction(((op as u32) << POS_OP) | (a << POS_A) | (bx << POS_BX))
    }

    pub fn asbx(op: OpCode, a: u32, sbx: i32) -> Self {
        Self::abx(op, a, (sbx + MAX_SBX) as u32)
    }

    pub fn ax(op: OpCode, ax: u32) -> Self {
        debug_assert!(ax <= MAX_AX);
        Instruction(((op as u32) << POS_OP) | (ax << POS_AX))
    }

    /// Decode the opcode. Undumped code is validated before it runs, so an
    /// unknown number only shows up in listings of corrupt chunks.
    pub fn opcode(&self) -> OpCode {
        OpCode::from_u8(self.raw_opcode()).unwrap_or(OpCode::ExtraArg)
    }

    pub fn raw_opcode(&self) -> u8 {
        ((self.0 >> POS_OP) & mask(SIZE_OP)) as u8
    }

    pub fn a(&self) -> u32 {
        (self.0 >> POS_A) & mask(SIZE_A)
    }

    pub fn b(&self) -> u32 {
        (self.0 >> POS_B) & mask(SIZE_B)
    }

    pub fn c(&self) -> u32 {
        (self.0 >> POS_C) & mask(SIZE_C)
    }

    pub fn bx(&self) -> u32 {
        (self.0 >> POS_BX) & mask(SIZE_BX)
    }

    pub fn sbx(&self) -> i32 {
        self.bx() as i32 - MAX_SBX
    }

    pub fn ax_field(&self) -> u32 {
        (self.0 >> POS_AX) & mask(SIZE_AX)
    }

    // ---- Mutators (for backpatching) ----

    pub fn set_opcode(&mut self, op: OpCode) {
        self.0 = (self.0 & !(mask(SIZE_OP) << POS_OP)) | ((op as u32) << POS_OP);
    }

    pub fn set_a(&mut self, a: u32) {
        self.0 = (self.0 & !(mask(SIZE_A) << POS_A)) | ((a & mask(SIZE_A)) << POS_A);
    }

    pub fn set_b(&mut self, b: u32) {
        self.0 = (self.0 & !(mask(SIZE_B) << POS_B)) | ((b & mask(SIZE_B)) << POS_B);
    }

    pub fn set_c(&mut self, c: u32) {
        self.0 = (self.0 & !(mask(SIZE_C) << POS_C)) | ((c & mask(SIZE_C)) << POS_C);
    }

    pub fn set_sbx(&mut self, sbx: i32) {
        debug_assert!((-MAX_SBX..=MAX_SBX + 1).contains(&sbx));
        let bx = (sbx + MAX_SBX) as u32;
        self.0 = (self.0 & !(mask(SIZE_BX) << POS_BX)) | (bx << POS_BX);
    }
}

impl fmt::Debug for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.opcode();
        write!(f, "{}", op.name())?;
        match op.format() {
            InstructionFormat::IABC => write!(f, " A={} B={} C={}", self.a(), self.b(), self.c()),
            InstructionFormat::IABx => write!(f, " A={} Bx={}", self.a(), self.bx()),
            InstructionFormat::IAsBx => write!(f, " A={} sBx={}", self.a(), self.sbx()),
            InstructionFormat::IAx => write!(f, " Ax={}", self.ax_field()),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Encode an integer as a "floating point byte" (`eeeeexxx`), rounding up.
pub fn int2fb(mut x: u32) -> u32 {
    if x < 8 {
        return x;
    }
    let mut e = 0;
    while x >= 8 << 4 {
        x = (x + 0xf) >> 4;
        e += 4;
    }
    while x >= 8 << 1 {
        x = (x + 1) >> 1;
        e += 1;
    }
    ((e + 1) << 3) | (x - 8)
}

/// Decode a "floating point byte".
pub fn fb2int(x: u32) -> u32 {
    if x < 8 {
        x
    } else {
        ((x & 7) + 8) << ((x >> 3) - 1)
    }
}
