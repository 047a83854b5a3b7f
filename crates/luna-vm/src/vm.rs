//! Lua VM state.

use crate::base_lib;
use crate::binary_chunk;
use crate::callinfo::CallInfo;
use crate::closure::{closed_upvalue, Closure, LuaClosure, NativeFn, Upvalue, UpvalRef};
use crate::dispatch;
use crate::error::LuaError;
use crate::table::Table;
use crate::value::{TableRef, Value};
use luna_compiler::proto::Proto;
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Instant;
use tracing::{debug, warn};

/// Limits applied while running code.
#[derive(Clone, Debug)]
pub struct VmConfig {
    /// Maximum number of nested Lua frames.
    pub max_call_depth: usize,
    /// Stop with [`LuaError::Interrupted`] after this many instructions.
    pub instruction_budget: Option<u64>,
    /// Stop with [`LuaError::Interrupted`] once this instant has passed.
    pub deadline: Option<Instant>,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 255,
            instruction_budget: None,
            deadline: None,
        }
    }
}

/// Nesting limit for host-level re-entry (host functions calling back
/// into Lua, which recurses on the Rust stack). Sized so the deepest
/// nesting fits a 2 MiB thread stack in a debug build.
pub const MAX_NATIVE_DEPTH: usize = 100;

/// The Lua virtual machine.
pub struct Vm {
    /// Value stack shared by all frames.
    pub stack: Vec<Value>,
    pub call_stack: Vec<CallInfo>,
    /// End of the values produced by the last open-ended call or vararg.
    pub stack_top: usize,
    /// Open upvalues sorted by stack slot, ascending.
    pub open_upvals: Vec<(usize, UpvalRef)>,
    pub config: VmConfig,
    /// Instructions executed by the running outermost call.
    pub executed: u64,
    /// Current nesting of [`dispatch::call_function`].
    pub native_depth: usize,
    globals: TableRef,
    output: Box<dyn Write>,
}

impl Vm {
    /// Create a VM with the base library loaded.
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut vm = Vm {
            stack: Vec::with_capacity(256),
            call_stack: Vec::new(),
            stack_top: 0,
            open_upvals: Vec::new(),
            config,
            executed: 0,
            native_depth: 0,
            globals: Rc::new(RefCell::new(Table::new())),
            output: Box::new(std::io::stdout()),
        };
        base_lib::open(&mut vm);
        vm
    }

    /// The global table (`_ENV` of every chunk loaded without an explicit env).
    pub fn globals(&self) -> TableRef {
        Rc::clone(&self.globals)
    }

    pub fn get_global(&self, name: &str) -> Value {
        self.globals.borrow().get_str(name)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        self.globals.borrow_mut().set_str(name, value);
    }

    /// Register a host function as a global.
    pub fn register(&mut self, name: &'static str, func: NativeFn) {
        self.set_global(name, Value::Function(Rc::new(Closure::native(name, func))));
    }

    /// Redirect `print` output.
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.output = out;
    }

    pub fn output(&mut self) -> &mut dyn Write {
        self.output.as_mut()
    }

    /// Load a text or binary chunk as a function whose `_ENV` is the global table.
    pub fn load(&mut self, chunk: &[u8], chunkname: &str) -> Result<Value, LuaError> {
        let env = Value::Table(self.globals());
        self.load_with_env(chunk, chunkname, env)
    }

    pub fn load_with_env(
        &mut self,
        chunk: &[u8],
        chunkname: &str,
        env: Value,
    ) -> Result<Value, LuaError> {
        let proto = if chunk.starts_with(binary_chunk::LUA_SIGNATURE) {
            let proto = binary_chunk::undump(chunk, chunkname)?;
            debug!(chunk = %chunkname, instructions = proto.code.len(), "loaded binary chunk");
            proto
        } else {
            let proto = luna_compiler::compile(chunk, chunkname)?;
            debug!(
                chunk = %chunkname,
                instructions = proto.code.len(),
                constants = proto.constants.len(),
                "compiled chunk"
            );
            proto
        };
        Ok(self.wrap_proto(Rc::new(proto), env))
    }

    /// Instantiate a main prototype: its first upvalue (if any) is `env`,
    /// the rest start out nil.
    pub fn wrap_proto(&self, proto: Rc<Proto>, env: Value) -> Value {
        let mut upvals = Vec::with_capacity(proto.upvalues.len());
        for i in 0..proto.upvalues.len() {
            upvals.push(closed_upvalue(if i == 0 { env.clone() } else { Value::Nil }));
        }
        Value::Function(Rc::new(Closure::Lua(LuaClosure { proto, upvals })))
    }

    /// Compile and run a chunk, returning all its results.
    pub fn do_string(&mut self, source: &str, chunkname: &str) -> Result<Vec<Value>, LuaError> {
        let f = self.load(source.as_bytes(), chunkname)?;
        self.call(&f, &[], -1)
    }

    /// Call `func` with `args`. `nresults = -1` returns every result;
    /// otherwise exactly `nresults` values, padded with nil.
    pub fn call(&mut self, func: &Value, args: &[Value], nresults: i32) -> Result<Vec<Value>, LuaError> {
        let outermost = self.call_stack.is_empty() && self.native_depth == 0;
        if outermost {
            self.executed = 0;
        }
        let result = dispatch::call_function(self, func.clone(), args.to_vec());
        match result {
            Ok(mut values) => {
                if nresults >= 0 {
                    values.resize(nresults as usize, Value::Nil);
                }
                Ok(values)
            }
            Err(e) => {
                if outermost {
                    warn!(error = %e, "runtime error");
                }
                Err(e)
            }
        }
    }

    /// Grow the stack so that index `size - 1` is valid.
    pub fn ensure_stack(&mut self, size: usize) {
        if size > self.stack.len() {
            self.stack.resize(size, Value::Nil);
        }
    }

    /// First stack slot not owned by the running frame.
    pub fn frame_top(&self) -> usize {
        match self.call_stack.last() {
            Some(ci) => ci.top.max(self.stack_top),
            None => self.stack_top,
        }
    }

    pub(crate) fn check_native_depth(&self) -> Result<(), LuaError> {
        if self.native_depth >= MAX_NATIVE_DEPTH {
            Err(LuaError::StackOverflow)
        } else {
            Ok(())
        }
    }

    pub fn get_upval(&self, uv: &UpvalRef) -> Value {
        match &*uv.borrow() {
            Upvalue::Open(slot) => self.stack[*slot].clone(),
            Upvalue::Closed(v) => v.clone(),
        }
    }

    pub fn set_upval(&mut self, uv: &UpvalRef, value: Value) {
        let mut cell = uv.borrow_mut();
        match &mut *cell {
            Upvalue::Open(slot) => self.stack[*slot] = value,
            Upvalue::Closed(v) => *v = value,
        }
    }

    /// The open upvalue for `slot`, creating it if no closure captured the
    /// slot yet, so sibling closures share one cell.
    pub fn find_or_create_open_upval(&mut self, slot: usize) -> UpvalRef {
        match self.open_upvals.binary_search_by_key(&slot, |(s, _)| *s) {
            Ok(i) => Rc::clone(&self.open_upvals[i].1),
            Err(i) => {
                let uv = Rc::new(RefCell::new(Upvalue::Open(slot)));
                self.open_upvals.insert(i, (slot, Rc::clone(&uv)));
                uv
            }
        }
    }

    /// Close all open upvalues at or above `level`.
    pub fn close_upvalues(&mut self, level: usize) {
        while let Some((slot, _)) = self.open_upvals.last() {
            if *slot < level {
                break;
            }
            if let Some((slot, uv)) = self.open_upvals.pop() {
                let value = self.stack[slot].clone();
                *uv.borrow_mut() = Upvalue::Closed(value);
            }
        }
    }

    /// `chunk:line: ` for the Lua frame `level` levels down (1 = innermost),
    /// or an empty string when there is no such frame or no line info.
    pub fn where_(&self, level: usize) -> String {
        if level == 0 || level > self.call_stack.len() {
            return String::new();
        }
        let ci = &self.call_stack[self.call_stack.len() - level];
        let line = ci.current_line();
        if line == 0 {
            return String::new();
        }
        let chunk = match &ci.proto.source {
            Some(s) => luna_compiler::chunk_id(&s.to_str_lossy()),
            None => "?".to_string(),
        };
        format!("{chunk}:{line}: ")
    }

    /// A runtime error positioned at the running instruction.
    pub fn runtime_error(&self, msg: impl AsRef<str>) -> LuaError {
        LuaError::Runtime(format!("{}{}", self.where_(1), msg.as_ref()))
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
