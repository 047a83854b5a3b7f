//! Call frame information for the VM.

use crate::closure::{Closure, UpvalRef};
use crate::value::Value;
use luna_compiler::proto::Proto;
use std::rc::Rc;

/// A Lua call frame. Host functions run without a frame of their own.
#[derive(Clone, Debug)]
pub struct CallInfo {
    /// Stack position of the called function; results are written here.
    pub func_idx: usize,
    /// First register of this frame.
    pub base: usize,
    /// One past the last register the prototype may use.
    pub top: usize,
    /// Program counter (index of the next instruction).
    pub pc: usize,
    /// Expected number of results (-1 = all).
    pub num_results: i32,
    pub closure: Rc<Closure>,
    pub proto: Rc<Proto>,
    /// Arguments beyond the fixed parameters.
    pub varargs: Vec<Value>,
    /// Number of tail calls that replaced this frame.
    pub tail_calls: u32,
}

impl CallInfo {
    pub fn new(func_idx: usize, closure: Rc<Closure>, proto: Rc<Proto>) -> Self {
        let base = func_idx + 1;
        CallInfo {
            func_idx,
            base,
            top: base + proto.max_stack_size as usize,
            pc: 0,
            num_results: -1,
            closure,
            proto,
            varargs: Vec::new(),
            tail_calls: 0,
        }
    }

    /// Upvalue `idx` of the running closure.
    pub fn upval(&self, idx: usize) -> Option<&UpvalRef> {
        match &*self.closure {
            Closure::Lua(c) => c.upvals.get(idx),
            Closure::Native(_) => None,
        }
    }

    /// Source line of the instruction being executed.
    pub fn current_line(&self) -> u32 {
        self.proto.get_line(self.pc.saturating_sub(1))
    }
}
