//! Closures and upvalue cells.

use crate::error::LuaError;
use crate::value::Value;
use crate::vm::Vm;
use luna_compiler::proto::Proto;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A captured variable. Open cells alias a live stack slot; closing copies
/// the value out and is one-way.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

pub type UpvalRef = Rc<RefCell<Upvalue>>;

pub fn closed_upvalue(v: Value) -> UpvalRef {
    Rc::new(RefCell::new(Upvalue::Closed(v)))
}

/// Signature of a host function. Results are returned as a vector; the
/// caller adjusts them to the expected count.
pub type NativeFn = fn(&mut NativeContext<'_>) -> Result<Vec<Value>, LuaError>;

pub enum Closure {
    Lua(LuaClosure),
    Native(NativeClosure),
}

pub struct LuaClosure {
    pub proto: Rc<Proto>,
    pub upvals: Vec<UpvalRef>,
}

pub struct NativeClosure {
    pub name: &'static str,
    pub func: NativeFn,
    pub upvals: Vec<Value>,
}

impl Closure {
    pub fn native(name: &'static str, func: NativeFn) -> Self {
        Closure::Native(NativeClosure {
            name,
            func,
            upvals: Vec::new(),
        })
    }
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Closure::Lua(c) => write!(
                f,
                "LuaClosure(line {}, {} upvalues)",
                c.proto.line_defined,
                c.upvals.len()
            ),
            Closure::Native(n) => write!(f, "NativeClosure({})", n.name),
        }
    }
}

/// What a host function sees: its arguments, its own closure and the VM
/// (for re-entrant calls).
pub struct NativeContext<'a> {
    pub vm: &'a mut Vm,
    pub args: Vec<Value>,
    pub name: &'static str,
    pub upvals: &'a [Value],
}

impl NativeContext<'_> {
    pub fn arg(&self, i: usize) -> Value {
        self.args.get(i).cloned().unwrap_or_default()
    }

    pub fn nargs(&self) -> usize {
        self.args.len()
    }

    /// `bad argument #n to 'name' (msg)`, positioned at the calling Lua code.
    pub fn arg_error(&self, i: usize, msg: &str) -> LuaError {
        self.error(format!("bad argument #{} to '{}' ({msg})", i + 1, self.name))
    }

    pub fn error(&self, msg: impl AsRef<str>) -> LuaError {
        LuaError::Runtime(format!("{}{}", self.vm.where_(1), msg.as_ref()))
    }

    fn type_error(&self, i: usize, expected: &str) -> LuaError {
        let got = match self.args.get(i) {
            Some(v) => v.type_name(),
            None => "no value",
        };
        self.arg_error(i, &format!("{expected} expected, got {got}"))
    }

    pub fn check_any(&self, i: usize) -> Result<Value, LuaError> {
        self.args
            .get(i)
            .cloned()
            .ok_or_else(|| self.arg_error(i, "value expected"))
    }

    pub fn check_table(&self, i: usize) -> Result<crate::value::TableRef, LuaError> {
        match self.args.get(i) {
            Some(Value::Table(t)) => Ok(Rc::clone(t)),
            _ => Err(self.type_error(i, "table")),
        }
    }

    pub fn check_integer(&self, i: usize) -> Result<i64, LuaError> {
        match self.args.get(i) {
            Some(v @ (Value::Integer(_) | Value::Float(_) | Value::String(_))) => {
                match v.to_integer() {
                    Some(n) => Ok(n),
                    None if v.to_number().is_some() => {
                        Err(self.arg_error(i, "number has no integer representation"))
                    }
                    None => Err(self.type_error(i, "number")),
                }
            }
            _ => Err(self.type_error(i, "number")),
        }
    }

    pub fn opt_integer(&self, i: usize, default: i64) -> Result<i64, LuaError> {
        match self.args.get(i) {
            None | Some(Value::Nil) => Ok(default),
            Some(_) => self.check_integer(i),
        }
    }

    pub fn check_string(&self, i: usize) -> Result<luna_core::LuaStr, LuaError> {
        match self.args.get(i) {
            Some(Value::String(s)) => Ok(s.clone()),
            Some(v @ (Value::Integer(_) | Value::Float(_))) => Ok(luna_core::LuaStr::from(v.to_string())),
            _ => Err(self.type_error(i, "string")),
        }
    }
}
