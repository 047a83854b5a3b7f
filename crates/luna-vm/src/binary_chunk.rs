//! Lua 5.3 binary chunks: serialization (dump) and deserialization (undump).
//!
//! The layout follows PUC Lua 5.3 (`luac` output for a 64-bit little-endian
//! build), so chunks written here load in the reference interpreter and
//! vice versa. Loaded code is checked before it can run.

use luna_compiler::opcode::{index_k, is_k, ArgMode, Instruction, OpCode};
use luna_compiler::proto::{Constant, LocalVar, Proto, UpvalDesc};
use luna_core::LuaStr;
use std::rc::Rc;

/// First bytes of every binary chunk.
pub const LUA_SIGNATURE: &[u8] = b"\x1bLua";
const LUAC_VERSION: u8 = 0x53;
const LUAC_FORMAT: u8 = 0;
const LUAC_DATA: &[u8; 6] = b"\x19\x93\r\n\x1a\n";
const INT_SIZE: u8 = 4;
const SIZE_T_SIZE: u8 = 8;
const INSTRUCTION_SIZE: u8 = 4;
const LUA_INTEGER_SIZE: u8 = 8;
const LUA_NUMBER_SIZE: u8 = 8;
const LUAC_INT: i64 = 0x5678;
const LUAC_NUM: f64 = 370.5;

const TAG_NIL: u8 = 0;
const TAG_BOOLEAN: u8 = 1;
const TAG_FLOAT: u8 = 3;
const TAG_INTEGER: u8 = 3 | (1 << 4);
const TAG_SHORT_STRING: u8 = 4;
const TAG_LONG_STRING: u8 = 4 | (1 << 4);

/// Longest string stored with the short-string tag.
const MAX_SHORT_LEN: usize = 40;

/// Deepest function nesting accepted when loading.
const MAX_NESTING: usize = 200;

/// Why a binary chunk was rejected. `chunk` is the display name of the
/// chunk being loaded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UndumpError {
    #[error("{chunk}: truncated precompiled chunk")]
    Truncated { chunk: String },
    #[error("{chunk}: not a precompiled chunk")]
    BadSignature { chunk: String },
    #[error("{chunk}: version mismatch in precompiled chunk")]
    BadVersion { chunk: String },
    #[error("{chunk}: format mismatch in precompiled chunk")]
    BadFormat { chunk: String },
    #[error("{chunk}: corrupted precompiled chunk")]
    BadData { chunk: String },
    #[error("{chunk}: {what} size mismatch in precompiled chunk")]
    BadSizes { chunk: String, what: &'static str },
    #[error("{chunk}: {what} mismatch in precompiled chunk")]
    BadCanary { chunk: String, what: &'static str },
    #[error("{chunk}: bad constant tag {tag} in precompiled chunk")]
    BadConstantTag { chunk: String, tag: u8 },
    #[error("{chunk}: bad code in precompiled chunk ({reason})")]
    BadCode { chunk: String, reason: String },
}

// ─── Dumper ─────────────────────────────────────────────────────────────

/// Serialize a prototype tree. With `strip`, sources, line info, local and
/// upvalue names are left out.
pub fn dump(proto: &Proto, strip: bool) -> Vec<u8> {
    let mut out = Vec::new();
    write_header(&mut out);
    out.push(proto.upvalues.len() as u8);
    write_function(&mut out, proto, strip, None);
    out
}

fn write_header(out: &mut Vec<u8>) {
    out.extend_from_slice(LUA_SIGNATURE);
    out.push(LUAC_VERSION);
    out.push(LUAC_FORMAT);
    out.extend_from_slice(LUAC_DATA);
    out.extend_from_slice(&[
        INT_SIZE,
        SIZE_T_SIZE,
        INSTRUCTION_SIZE,
        LUA_INTEGER_SIZE,
        LUA_NUMBER_SIZE,
    ]);
    out.extend_from_slice(&LUAC_INT.to_le_bytes());
    out.extend_from_slice(&LUAC_NUM.to_le_bytes());
}

fn write_int(out: &mut Vec<u8>, n: usize) {
    out.extend_from_slice(&(n as u32).to_le_bytes());
}

fn write_string(out: &mut Vec<u8>, s: Option<&LuaStr>) {
    let Some(s) = s else {
        out.push(0);
        return;
    };
    let size = s.len() + 1;
    if size < 0xFF {
        out.push(size as u8);
    } else {
        out.push(0xFF);
        out.extend_from_slice(&(size as u64).to_le_bytes());
    }
    out.extend_from_slice(s.as_bytes());
}

fn write_constant(out: &mut Vec<u8>, k: &Constant) {
    match k {
        Constant::Nil => out.push(TAG_NIL),
        Constant::Boolean(b) => {
            out.push(TAG_BOOLEAN);
            out.push(*b as u8);
        }
        Constant::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Constant::Integer(i) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Constant::String(s) => {
            out.push(if s.len() <= MAX_SHORT_LEN {
                TAG_SHORT_STRING
            } else {
                TAG_LONG_STRING
            });
            write_string(out, Some(s));
        }
    }
}

fn write_function(out: &mut Vec<u8>, proto: &Proto, strip: bool, parent_source: Option<&LuaStr>) {
    let source = match &proto.source {
        Some(s) if !strip && Some(s) != parent_source => Some(s),
        _ => None,
    };
    write_string(out, source);
    write_int(out, proto.line_defined as usize);
    write_int(out, proto.last_line_defined as usize);
    out.push(proto.num_params);
    out.push(proto.is_vararg as u8);
    out.push(proto.max_stack_size);

    write_int(out, proto.code.len());
    for inst in &proto.code {
        out.extend_from_slice(&inst.0.to_le_bytes());
    }

    write_int(out, proto.constants.len());
    for k in &proto.constants {
        write_constant(out, k);
    }

    write_int(out, proto.upvalues.len());
    for uv in &proto.upvalues {
        out.push(uv.in_stack as u8);
        out.push(uv.index);
    }

    write_int(out, proto.protos.len());
    for child in &proto.protos {
        write_function(out, child, strip, proto.source.as_ref());
    }

    // debug
    if strip {
        write_int(out, 0);
        write_int(out, 0);
        write_int(out, 0);
        return;
    }
    write_int(out, proto.line_info.len());
    for line in &proto.line_info {
        write_int(out, *line as usize);
    }
    write_int(out, proto.local_vars.len());
    for var in &proto.local_vars {
        write_string(out, Some(&var.name));
        write_int(out, var.start_pc as usize);
        write_int(out, var.end_pc as usize);
    }
    write_int(out, proto.upvalues.len());
    for uv in &proto.upvalues {
        write_string(out, uv.name.as_ref());
    }
}

// ─── Undumper ───────────────────────────────────────────────────────────

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    chunk: String,
}

impl<'a> Reader<'a> {
    fn truncated(&self) -> UndumpError {
        UndumpError::Truncated {
            chunk: self.chunk.clone(),
        }
    }

    fn corrupted(&self) -> UndumpError {
        UndumpError::BadData {
            chunk: self.chunk.clone(),
        }
    }

    fn bad_code(&self, reason: impl Into<String>) -> UndumpError {
        UndumpError::BadCode {
            chunk: self.chunk.clone(),
            reason: reason.into(),
        }
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], UndumpError> {
        let end = self.pos.checked_add(n).ok_or_else(|| self.truncated())?;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| self.truncated())?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], UndumpError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    fn read_byte(&mut self) -> Result<u8, UndumpError> {
        Ok(self.read_array::<1>()?[0])
    }

    fn read_int(&mut self) -> Result<u32, UndumpError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// A count of items that each take at least `min_item` bytes; rejects
    /// counts the remaining input cannot hold.
    fn read_count(&mut self, min_item: usize) -> Result<usize, UndumpError> {
        let n = self.read_int()? as usize;
        if n.saturating_mul(min_item) > self.data.len() - self.pos {
            return Err(self.truncated());
        }
        Ok(n)
    }

    fn read_string(&mut self) -> Result<Option<LuaStr>, UndumpError> {
        let size = match self.read_byte()? {
            0 => return Ok(None),
            0xFF => u64::from_le_bytes(self.read_array()?) as usize,
            n => n as usize,
        };
        if size == 0 {
            return Err(self.corrupted());
        }
        Ok(Some(LuaStr::from(self.read_bytes(size - 1)?)))
    }
}

/// Name used in undump error messages.
fn display_name(chunkname: &str) -> String {
    if let Some(rest) = chunkname.strip_prefix(['@', '=']) {
        rest.to_string()
    } else if chunkname.as_bytes().starts_with(LUA_SIGNATURE) {
        "binary string".to_string()
    } else {
        chunkname.to_string()
    }
}

/// Deserialize and verify a binary chunk.
pub fn undump(data: &[u8], chunkname: &str) -> Result<Proto, UndumpError> {
    let mut reader = Reader {
        data,
        pos: 0,
        chunk: display_name(chunkname),
    };
    verify_header(&mut reader)?;
    let num_upvalues = reader.read_byte()?;
    let proto = read_function(&mut reader, None, 0)?;
    if proto.upvalues.len() != num_upvalues as usize || reader.pos != data.len() {
        return Err(reader.corrupted());
    }
    verify_proto(&reader, &proto)?;
    Ok(proto)
}

fn verify_header(reader: &mut Reader<'_>) -> Result<(), UndumpError> {
    let chunk = reader.chunk.clone();
    if reader.read_bytes(LUA_SIGNATURE.len())? != LUA_SIGNATURE {
        return Err(UndumpError::BadSignature { chunk });
    }
    if reader.read_byte()? != LUAC_VERSION {
        return Err(UndumpError::BadVersion { chunk });
    }
    if reader.read_byte()? != LUAC_FORMAT {
        return Err(UndumpError::BadFormat { chunk });
    }
    if reader.read_bytes(LUAC_DATA.len())? != LUAC_DATA {
        return Err(UndumpError::BadData { chunk });
    }
    let sizes = [
        (INT_SIZE, "int"),
        (SIZE_T_SIZE, "size_t"),
        (INSTRUCTION_SIZE, "Instruction"),
        (LUA_INTEGER_SIZE, "lua_Integer"),
        (LUA_NUMBER_SIZE, "lua_Number"),
    ];
    for (expected, what) in sizes {
        if reader.read_byte()? != expected {
            return Err(UndumpError::BadSizes { chunk, what });
        }
    }
    if i64::from_le_bytes(reader.read_array()?) != LUAC_INT {
        return Err(UndumpError::BadCanary {
            chunk,
            what: "endianness",
        });
    }
    if f64::from_le_bytes(reader.read_array()?) != LUAC_NUM {
        return Err(UndumpError::BadCanary {
            chunk,
            what: "float format",
        });
    }
    Ok(())
}

fn read_constant(reader: &mut Reader<'_>) -> Result<Constant, UndumpError> {
    let tag = reader.read_byte()?;
    Ok(match tag {
        TAG_NIL => Constant::Nil,
        TAG_BOOLEAN => Constant::Boolean(reader.read_byte()? != 0),
        TAG_FLOAT => Constant::Float(f64::from_le_bytes(reader.read_array()?)),
        TAG_INTEGER => Constant::Integer(i64::from_le_bytes(reader.read_array()?)),
        TAG_SHORT_STRING | TAG_LONG_STRING => {
            Constant::String(reader.read_string()?.ok_or_else(|| reader.corrupted())?)
        }
        tag => {
            return Err(UndumpError::BadConstantTag {
                chunk: reader.chunk.clone(),
                tag,
            })
        }
    })
}

fn read_function(
    reader: &mut Reader<'_>,
    parent_source: Option<&LuaStr>,
    depth: usize,
) -> Result<Proto, UndumpError> {
    if depth > MAX_NESTING {
        return Err(reader.corrupted());
    }
    let mut proto = Proto::new();
    proto.source = reader.read_string()?.or_else(|| parent_source.cloned());
    proto.line_defined = reader.read_int()?;
    proto.last_line_defined = reader.read_int()?;
    proto.num_params = reader.read_byte()?;
    proto.is_vararg = reader.read_byte()? != 0;
    proto.max_stack_size = reader.read_byte()?;

    let n = reader.read_count(4)?;
    proto.code = (0..n)
        .map(|_| reader.read_int().map(Instruction))
        .collect::<Result<_, _>>()?;

    let n = reader.read_count(1)?;
    proto.constants = (0..n).map(|_| read_constant(reader)).collect::<Result<_, _>>()?;

    let n = reader.read_count(2)?;
    for _ in 0..n {
        let in_stack = reader.read_byte()? != 0;
        let index = reader.read_byte()?;
        proto.upvalues.push(UpvalDesc {
            name: None,
            in_stack,
            index,
        });
    }

    let n = reader.read_count(1)?;
    for _ in 0..n {
        let child = read_function(reader, proto.source.as_ref(), depth + 1)?;
        proto.protos.push(Rc::new(child));
    }

    let n = reader.read_count(4)?;
    proto.line_info = (0..n).map(|_| reader.read_int()).collect::<Result<_, _>>()?;

    let n = reader.read_count(9)?;
    for _ in 0..n {
        let name = reader.read_string()?.unwrap_or_else(|| LuaStr::from(""));
        let start_pc = reader.read_int()?;
        let end_pc = reader.read_int()?;
        proto.local_vars.push(LocalVar {
            name,
            start_pc,
            end_pc,
        });
    }

    let n = reader.read_count(1)?;
    if n > proto.upvalues.len() {
        return Err(reader.corrupted());
    }
    for i in 0..n {
        proto.upvalues[i].name = reader.read_string()?;
    }
    Ok(proto)
}

/// Check that every instruction only touches registers, constants,
/// upvalues, nested functions and jump targets that exist.
fn verify_proto(reader: &Reader<'_>, p: &Proto) -> Result<(), UndumpError> {
    let max_stack = p.max_stack_size as u32;
    let ncode = p.code.len();
    if p.num_params as u32 > max_stack {
        return Err(reader.bad_code("more parameters than registers"));
    }
    if !p.line_info.is_empty() && p.line_info.len() != ncode {
        return Err(reader.corrupted());
    }
    match p.code.last() {
        Some(last) if last.raw_opcode() == OpCode::Return as u8 => {}
        _ => return Err(reader.bad_code("function does not end with RETURN")),
    }

    let reg = |r: u32, pc: usize| -> Result<(), UndumpError> {
        if r < max_stack {
            Ok(())
        } else {
            Err(reader.bad_code(format!("register {r} out of range at pc {pc}")))
        }
    };
    // registers first..first+n (exclusive) must exist
    let reg_range = |first: u32, n: u32, pc: usize| -> Result<(), UndumpError> {
        if first + n <= max_stack {
            Ok(())
        } else {
            Err(reader.bad_code(format!("register range out of bounds at pc {pc}")))
        }
    };
    let rk = |x: u32, pc: usize| -> Result<(), UndumpError> {
        if is_k(x) {
            if (index_k(x) as usize) < p.constants.len() {
                Ok(())
            } else {
                Err(reader.bad_code(format!("constant {} out of range at pc {pc}", index_k(x))))
            }
        } else {
            reg(x, pc)
        }
    };
    let constant = |k: u32, pc: usize| -> Result<(), UndumpError> {
        if (k as usize) < p.constants.len() {
            Ok(())
        } else {
            Err(reader.bad_code(format!("constant {k} out of range at pc {pc}")))
        }
    };
    let upvalue = |u: u32, pc: usize| -> Result<(), UndumpError> {
        if (u as usize) < p.upvalues.len() {
            Ok(())
        } else {
            Err(reader.bad_code(format!("upvalue {u} out of range at pc {pc}")))
        }
    };
    let jump = |pc: usize, offset: i32| -> Result<(), UndumpError> {
        let dest = pc as i64 + 1 + offset as i64;
        if dest >= 0 && (dest as usize) < ncode {
            Ok(())
        } else {
            Err(reader.bad_code(format!("jump target out of range at pc {pc}")))
        }
    };
    let followed_by = |pc: usize, op: Option<OpCode>| -> Result<(), UndumpError> {
        match (p.code.get(pc + 1), op) {
            (Some(next), Some(op)) if next.opcode() == op => Ok(()),
            (Some(_), None) => Ok(()),
            _ => Err(reader.bad_code(format!("missing follow-up instruction at pc {pc}"))),
        }
    };

    for (pc, inst) in p.code.iter().enumerate() {
        let op = OpCode::from_u8(inst.raw_opcode())
            .ok_or_else(|| reader.bad_code(format!("invalid opcode {} at pc {pc}", inst.raw_opcode())))?;
        let (a, b, c) = (inst.a(), inst.b(), inst.c());
        match op {
            OpCode::SetTabUp => upvalue(a, pc)?,
            OpCode::Jmp => {
                if a > 0 {
                    reg(a - 1, pc)?;
                }
            }
            // RETURN's A may sit one past the last register for `return` with no values
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Return | OpCode::ExtraArg => {}
            _ => reg(a, pc)?,
        }
        if op.b_mode() == ArgMode::K {
            rk(b, pc)?;
        }
        if op.c_mode() == ArgMode::K {
            rk(c, pc)?;
        }
        match op {
            OpCode::Move | OpCode::Unm | OpCode::BNot | OpCode::Not | OpCode::Len => reg(b, pc)?,
            OpCode::GetTable => reg(b, pc)?,
            OpCode::OpSelf => {
                reg(b, pc)?;
                reg_range(a, 2, pc)?;
            }
            OpCode::LoadK => constant(inst.bx(), pc)?,
            OpCode::LoadKx => {
                followed_by(pc, Some(OpCode::ExtraArg))?;
                constant(p.code[pc + 1].ax_field(), pc)?;
            }
            OpCode::LoadBool => {
                if c != 0 {
                    followed_by(pc, None)?;
                }
            }
            OpCode::LoadNil => reg_range(a, b + 1, pc)?,
            OpCode::GetUpval | OpCode::SetUpval | OpCode::GetTabUp => upvalue(b, pc)?,
            OpCode::Concat => {
                if b > c {
                    return Err(reader.bad_code(format!("bad CONCAT range at pc {pc}")));
                }
                reg(c, pc)?;
            }
            OpCode::Jmp | OpCode::ForLoop | OpCode::TForLoop => jump(pc, inst.sbx())?,
            OpCode::ForPrep => {
                jump(pc, inst.sbx())?;
                reg_range(a, 4, pc)?;
            }
            OpCode::Eq | OpCode::Lt | OpCode::Le | OpCode::Test => followed_by(pc, Some(OpCode::Jmp))?,
            OpCode::TestSet => {
                reg(b, pc)?;
                followed_by(pc, Some(OpCode::Jmp))?;
            }
            OpCode::Call | OpCode::TailCall => {
                if b > 0 {
                    reg_range(a, b, pc)?;
                }
                if op == OpCode::Call && c > 1 {
                    reg_range(a, c - 1, pc)?;
                }
            }
            OpCode::Return => {
                if b > 0 {
                    reg_range(a, b - 1, pc)?;
                }
            }
            OpCode::TForCall => {
                reg_range(a, 3 + c.max(3), pc)?;
                followed_by(pc, Some(OpCode::TForLoop))?;
            }
            OpCode::SetList => {
                reg_range(a, b + 1, pc)?;
                if c == 0 {
                    followed_by(pc, Some(OpCode::ExtraArg))?;
                }
            }
            OpCode::Closure => {
                let child = p
                    .protos
                    .get(inst.bx() as usize)
                    .ok_or_else(|| reader.bad_code(format!("function index out of range at pc {pc}")))?;
                for uv in &child.upvalues {
                    if uv.in_stack {
                        reg(uv.index as u32, pc)?;
                    } else {
                        upvalue(uv.index as u32, pc)?;
                    }
                }
            }
            OpCode::VarArg => {
                if b > 1 {
                    reg_range(a, b - 1, pc)?;
                }
            }
            _ => {}
        }
    }
    for child in &p.protos {
        verify_proto(reader, child)?;
    }
    Ok(())
}
