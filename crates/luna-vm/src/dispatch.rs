//! Main bytecode dispatch loop and the call/return protocol.

use crate::arith::{self, ArithFault};
use crate::callinfo::CallInfo;
use crate::closure::{Closure, LuaClosure, NativeClosure, NativeContext, UpvalRef};
use crate::coerce;
use crate::compare;
use crate::error::LuaError;
use crate::table::Table;
use crate::value::Value;
use crate::varinfo;
use crate::vm::Vm;
use luna_compiler::opcode::{fb2int, index_k, is_k, OpCode, FIELDS_PER_FLUSH};
use luna_compiler::proto::Proto;
use luna_core::{ArithOp, LuaStr};
use std::rc::Rc;
use std::time::Instant;
use tracing::trace;

/// Instructions between two deadline checks.
const DEADLINE_INTERVAL: u64 = 1024;

/// Call `func` from host code (or from a host function) and run it to
/// completion, returning every result.
///
/// The callee is placed above the running frame. On error, frames pushed
/// by this call are dropped and their open upvalues closed.
pub fn call_function(vm: &mut Vm, func: Value, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
    vm.check_native_depth()?;
    let func_idx = vm.frame_top();
    let nargs = args.len();
    vm.ensure_stack(func_idx + 1 + nargs);
    vm.stack[func_idx] = func;
    for (i, arg) in args.into_iter().enumerate() {
        vm.stack[func_idx + 1 + i] = arg;
    }

    let depth = vm.call_stack.len();
    let saved_top = vm.stack_top;
    vm.native_depth += 1;
    let result = match precall(vm, func_idx, nargs, -1) {
        Ok(Some(results)) => Ok(results),
        Ok(None) => execute_from(vm, depth + 1),
        Err(e) => Err(e),
    };
    vm.native_depth -= 1;
    if result.is_err() {
        vm.close_upvalues(func_idx);
        vm.call_stack.truncate(depth);
    }
    vm.stack_top = saved_top;
    result
}

/// Start a call of the value at `func_idx` with `nargs` arguments above it.
///
/// Host functions run to completion and their results are returned.
/// For a Lua function a frame is pushed and `None` is returned; the
/// dispatch loop picks the frame up.
pub fn precall(
    vm: &mut Vm,
    func_idx: usize,
    nargs: usize,
    num_results: i32,
) -> Result<Option<Vec<Value>>, LuaError> {
    let closure = match &vm.stack[func_idx] {
        Value::Function(f) => Rc::clone(f),
        _ => return Err(call_error(vm, func_idx)),
    };
    match &*closure {
        Closure::Native(native) => {
            let args = vm.stack[func_idx + 1..func_idx + 1 + nargs].to_vec();
            call_native(vm, native, args).map(Some)
        }
        Closure::Lua(lua) => {
            if vm.call_stack.len() >= vm.config.max_call_depth {
                return Err(LuaError::StackOverflow);
            }
            let proto = Rc::clone(&lua.proto);
            setup_frame(vm, func_idx, nargs, num_results, Rc::clone(&closure), proto);
            Ok(None)
        }
    }
}

fn call_native(vm: &mut Vm, native: &NativeClosure, args: Vec<Value>) -> Result<Vec<Value>, LuaError> {
    let mut ctx = NativeContext {
        vm,
        args,
        name: native.name,
        upvals: &native.upvals,
    };
    (native.func)(&mut ctx)
}

/// Push a frame for a Lua closure whose arguments sit above `func_idx`.
fn setup_frame(
    vm: &mut Vm,
    func_idx: usize,
    nargs: usize,
    num_results: i32,
    closure: Rc<Closure>,
    proto: Rc<Proto>,
) {
    let mut ci = CallInfo::new(func_idx, closure, proto);
    ci.num_results = num_results;
    let num_params = ci.proto.num_params as usize;
    vm.ensure_stack(ci.top.max(ci.base + nargs));
    if ci.proto.is_vararg && nargs > num_params {
        ci.varargs = vm.stack[ci.base + num_params..ci.base + nargs].to_vec();
    }
    for slot in &mut vm.stack[ci.base + nargs.min(num_params)..ci.top] {
        *slot = Value::Nil;
    }
    trace!(
        depth = vm.call_stack.len() + 1,
        line = ci.proto.line_defined,
        nargs,
        "push frame"
    );
    vm.call_stack.push(ci);
}

/// Store `results` at `dest`, adjusted to `wanted` values (`-1` keeps all
/// and records the end in the top tracker).
fn place_results(vm: &mut Vm, dest: usize, results: Vec<Value>, wanted: i32) {
    let n = if wanted < 0 { results.len() } else { wanted as usize };
    vm.ensure_stack(dest + n);
    let mut values = results.into_iter();
    for slot in &mut vm.stack[dest..dest + n] {
        *slot = values.next().unwrap_or_default();
    }
    if wanted < 0 {
        vm.stack_top = dest + n;
    }
}

/// Pop the running frame. Returns the results when the frame was the one
/// `execute_from` was entered for; otherwise hands them to the caller.
fn post_return(vm: &mut Vm, results: Vec<Value>, entry_depth: usize) -> Option<Vec<Value>> {
    let ci = match vm.call_stack.pop() {
        Some(ci) => ci,
        None => return Some(results),
    };
    trace!(depth = vm.call_stack.len() + 1, results = results.len(), "pop frame");
    if vm.call_stack.len() < entry_depth {
        return Some(results);
    }
    place_results(vm, ci.func_idx, results, ci.num_results);
    None
}

fn count_instruction(vm: &mut Vm) -> Result<(), LuaError> {
    vm.executed += 1;
    if let Some(budget) = vm.config.instruction_budget {
        if vm.executed > budget {
            return Err(LuaError::Interrupted);
        }
    }
    if vm.executed % DEADLINE_INTERVAL == 0 {
        if let Some(deadline) = vm.config.deadline {
            if Instant::now() >= deadline {
                return Err(LuaError::Interrupted);
            }
        }
    }
    Ok(())
}

/// `RK(x)`: a register or, with the constant bit set, a constant.
#[inline]
fn rk(vm: &Vm, ci_idx: usize, base: usize, x: u32) -> Value {
    if is_k(x) {
        Value::from(&vm.call_stack[ci_idx].proto.constants[index_k(x) as usize])
    } else {
        vm.stack[base + x as usize].clone()
    }
}

/// Variable info for operand `x` of the running instruction.
fn reg_info(vm: &Vm, ci_idx: usize, x: u32) -> String {
    if is_k(x) {
        return String::new();
    }
    let ci = &vm.call_stack[ci_idx];
    varinfo::register_info(&ci.proto, ci.pc.saturating_sub(1), x)
}

fn upval_ref(vm: &Vm, ci_idx: usize, idx: u32) -> Result<UpvalRef, LuaError> {
    match vm.call_stack[ci_idx].upval(idx as usize) {
        Some(uv) => Ok(Rc::clone(uv)),
        None => Err(vm.runtime_error(format!("invalid upvalue index {idx}"))),
    }
}

fn jump(vm: &mut Vm, ci_idx: usize, offset: i32) {
    let ci = &mut vm.call_stack[ci_idx];
    ci.pc = (ci.pc as i64 + offset as i64) as usize;
}

fn call_error(vm: &Vm, func_idx: usize) -> LuaError {
    let type_name = vm.stack[func_idx].type_name();
    match vm.call_stack.last() {
        Some(ci) if func_idx >= ci.base && func_idx < ci.top => {
            let info = varinfo::register_info(
                &ci.proto,
                ci.pc.saturating_sub(1),
                (func_idx - ci.base) as u32,
            );
            vm.runtime_error(format!("attempt to call a {type_name} value{info}"))
        }
        _ => LuaError::Runtime(format!("attempt to call a {type_name} value")),
    }
}

fn arith_error(vm: &Vm, ci_idx: usize, fault: ArithFault, operands: [(&Value, u32); 2]) -> LuaError {
    let msg = match fault {
        ArithFault::NotNumber { culprit, bitwise } => {
            let (value, reg) = operands[culprit];
            let what = if bitwise {
                "perform bitwise operation on"
            } else {
                "perform arithmetic on"
            };
            format!(
                "attempt to {what} a {} value{}",
                value.type_name(),
                reg_info(vm, ci_idx, reg)
            )
        }
        ArithFault::NoIntegerRep { culprit } => format!(
            "number{} has no integer representation",
            reg_info(vm, ci_idx, operands[culprit].1)
        ),
        ArithFault::Numeric(e) => e.to_string(),
    };
    vm.runtime_error(msg)
}

fn arith_op(
    vm: &mut Vm,
    ci_idx: usize,
    base: usize,
    op: ArithOp,
    a: u32,
    b: u32,
    c: u32,
) -> Result<(), LuaError> {
    let x = rk(vm, ci_idx, base, b);
    let y = rk(vm, ci_idx, base, c);
    match arith::arith(op, &x, &y) {
        Ok(v) => {
            vm.stack[base + a as usize] = v;
            Ok(())
        }
        Err(fault) => Err(arith_error(vm, ci_idx, fault, [(&x, b), (&y, c)])),
    }
}

fn arith_opcode(op: OpCode) -> Option<ArithOp> {
    Some(match op {
        OpCode::Add => ArithOp::Add,
        OpCode::Sub => ArithOp::Sub,
        OpCode::Mul => ArithOp::Mul,
        OpCode::Mod => ArithOp::Mod,
        OpCode::Pow => ArithOp::Pow,
        OpCode::Div => ArithOp::Div,
        OpCode::IDiv => ArithOp::IDiv,
        OpCode::BAnd => ArithOp::BAnd,
        OpCode::BOr => ArithOp::BOr,
        OpCode::BXor => ArithOp::BXor,
        OpCode::Shl => ArithOp::Shl,
        OpCode::Shr => ArithOp::Shr,
        OpCode::Unm => ArithOp::Unm,
        OpCode::BNot => ArithOp::BNot,
        _ => return None,
    })
}

/// `obj[key]` without metamethods.
fn get_indexed(
    vm: &Vm,
    obj: &Value,
    key: &Value,
    info: impl FnOnce() -> String,
) -> Result<Value, LuaError> {
    match obj {
        Value::Table(t) => Ok(t.borrow().get(key)),
        other => Err(vm.runtime_error(format!(
            "attempt to index a {} value{}",
            other.type_name(),
            info()
        ))),
    }
}

/// `obj[key] = value` without metamethods.
fn set_indexed(
    vm: &Vm,
    obj: &Value,
    key: Value,
    value: Value,
    info: impl FnOnce() -> String,
) -> Result<(), LuaError> {
    match obj {
        Value::Table(t) => t
            .borrow_mut()
            .set(key, value)
            .map_err(|e| vm.runtime_error(e.to_string())),
        other => Err(vm.runtime_error(format!(
            "attempt to index a {} value{}",
            other.type_name(),
            info()
        ))),
    }
}

fn is_concatenable(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Integer(_) | Value::Float(_))
}

/// `R(A) := R(B).. ... ..R(C)`.
fn concat(vm: &mut Vm, ci_idx: usize, base: usize, a: u32, b: u32, c: u32) -> Result<(), LuaError> {
    let (first, last) = (base + b as usize, base + c as usize);
    // operands are joined right to left, so a bad right-hand pair is reported first
    let mut order = Vec::with_capacity(last + 1 - first);
    if last > first {
        order.push(last - 1);
    }
    order.push(last);
    order.extend((first..last.saturating_sub(1)).rev());
    if let Some(&bad) = order.iter().find(|&&slot| !is_concatenable(&vm.stack[slot])) {
        let info = reg_info(vm, ci_idx, (bad - base) as u32);
        return Err(vm.runtime_error(format!(
            "attempt to concatenate a {} value{info}",
            vm.stack[bad].type_name()
        )));
    }
    let mut bytes = Vec::new();
    for slot in first..=last {
        if let Some(part) = vm.stack[slot].to_concat_bytes() {
            bytes.extend_from_slice(&part);
        }
    }
    vm.stack[base + a as usize] = Value::String(LuaStr::from(bytes));
    Ok(())
}

/// Numeric `for` preparation. Returns the error message for a bad operand.
fn for_prep(vm: &mut Vm, ra: usize) -> Result<(), &'static str> {
    let init = vm.stack[ra].clone();
    let limit = vm.stack[ra + 1].clone();
    let step = vm.stack[ra + 2].clone();
    if let (Value::Integer(i), Value::Integer(s)) = (&init, &step) {
        if let Some((lim, skip)) = coerce::for_limit(&limit, *s) {
            let start = if skip { 0 } else { *i };
            vm.stack[ra + 1] = Value::Integer(lim);
            vm.stack[ra] = Value::Integer(start.wrapping_sub(*s));
            return Ok(());
        }
    }
    let limit = limit.to_number().ok_or("'for' limit must be a number")?;
    let step = step.to_number().ok_or("'for' step must be a number")?;
    let init = init.to_number().ok_or("'for' initial value must be a number")?;
    vm.stack[ra + 1] = Value::Float(limit.to_f64());
    vm.stack[ra + 2] = Value::Float(step.to_f64());
    vm.stack[ra] = Value::Float(init.to_f64() - step.to_f64());
    Ok(())
}

/// Numeric `for` step. Returns the new control value while the loop runs.
fn for_loop(vm: &Vm, ra: usize) -> Option<Value> {
    match (&vm.stack[ra], &vm.stack[ra + 1], &vm.stack[ra + 2]) {
        (Value::Integer(idx), Value::Integer(limit), Value::Integer(step)) => {
            let next = idx.checked_add(*step)?;
            let running = if *step > 0 { next <= *limit } else { *limit <= next };
            running.then_some(Value::Integer(next))
        }
        (idx, limit, step) => {
            let step = step.as_number()?.to_f64();
            let limit = limit.as_number()?.to_f64();
            let next = idx.as_number()?.to_f64() + step;
            let running = if step > 0.0 { next <= limit } else { limit <= next };
            running.then_some(Value::Float(next))
        }
    }
}

/// Run the dispatch loop until the frame at `entry_depth - 1` returns.
pub fn execute_from(vm: &mut Vm, entry_depth: usize) -> Result<Vec<Value>, LuaError> {
    loop {
        count_instruction(vm)?;
        let ci_idx = vm.call_stack.len() - 1;
        let ci = &mut vm.call_stack[ci_idx];
        let fetched = ci.proto.code.get(ci.pc).copied();
        ci.pc += 1;
        let base = ci.base;
        let Some(inst) = fetched else {
            return Err(vm.runtime_error("execution ran past the end of the function"));
        };
        let op = inst.opcode();
        let a = inst.a();
        let ra = base + a as usize;

        match op {
            OpCode::Move => {
                vm.stack[ra] = vm.stack[base + inst.b() as usize].clone();
            }

            OpCode::LoadK => {
                let v = Value::from(&vm.call_stack[ci_idx].proto.constants[inst.bx() as usize]);
                vm.stack[ra] = v;
            }

            OpCode::LoadKx => {
                let ci = &mut vm.call_stack[ci_idx];
                let extra = ci.proto.code.get(ci.pc).map(|i| i.ax_field());
                ci.pc += 1;
                let v = match extra {
                    Some(ax) => Value::from(&ci.proto.constants[ax as usize]),
                    None => return Err(vm.runtime_error("LOADKX without EXTRAARG")),
                };
                vm.stack[ra] = v;
            }

            OpCode::LoadBool => {
                vm.stack[ra] = Value::Boolean(inst.b() != 0);
                if inst.c() != 0 {
                    vm.call_stack[ci_idx].pc += 1;
                }
            }

            OpCode::LoadNil => {
                for slot in &mut vm.stack[ra..=ra + inst.b() as usize] {
                    *slot = Value::Nil;
                }
            }

            OpCode::GetUpval => {
                let uv = upval_ref(vm, ci_idx, inst.b())?;
                vm.stack[ra] = vm.get_upval(&uv);
            }

            OpCode::SetUpval => {
                let uv = upval_ref(vm, ci_idx, inst.b())?;
                let v = vm.stack[ra].clone();
                vm.set_upval(&uv, v);
            }

            OpCode::GetTabUp => {
                let uv = upval_ref(vm, ci_idx, inst.b())?;
                let table = vm.get_upval(&uv);
                let key = rk(vm, ci_idx, base, inst.c());
                let v = get_indexed(vm, &table, &key, || {
                    varinfo::upvalue_info(&vm.call_stack[ci_idx].proto, inst.b())
                })?;
                vm.stack[ra] = v;
            }

            OpCode::GetTable => {
                let table = vm.stack[base + inst.b() as usize].clone();
                let key = rk(vm, ci_idx, base, inst.c());
                let v = get_indexed(vm, &table, &key, || reg_info(vm, ci_idx, inst.b()))?;
                vm.stack[ra] = v;
            }

            OpCode::SetTabUp => {
                let uv = upval_ref(vm, ci_idx, a)?;
                let table = vm.get_upval(&uv);
                let key = rk(vm, ci_idx, base, inst.b());
                let value = rk(vm, ci_idx, base, inst.c());
                set_indexed(vm, &table, key, value, || {
                    varinfo::upvalue_info(&vm.call_stack[ci_idx].proto, a)
                })?;
            }

            OpCode::SetTable => {
                let table = vm.stack[ra].clone();
                let key = rk(vm, ci_idx, base, inst.b());
                let value = rk(vm, ci_idx, base, inst.c());
                set_indexed(vm, &table, key, value, || reg_info(vm, ci_idx, a))?;
            }

            OpCode::NewTable => {
                let t = Table::with_capacity(fb2int(inst.b()) as usize, fb2int(inst.c()) as usize);
                vm.stack[ra] = Value::from(t);
            }

            OpCode::OpSelf => {
                let obj = vm.stack[base + inst.b() as usize].clone();
                let key = rk(vm, ci_idx, base, inst.c());
                let method = get_indexed(vm, &obj, &key, || reg_info(vm, ci_idx, inst.b()))?;
                vm.stack[ra + 1] = obj;
                vm.stack[ra] = method;
            }

            OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Mod
            | OpCode::Pow
            | OpCode::Div
            | OpCode::IDiv
            | OpCode::BAnd
            | OpCode::BOr
            | OpCode::BXor
            | OpCode::Shl
            | OpCode::Shr => {
                if let Some(aop) = arith_opcode(op) {
                    arith_op(vm, ci_idx, base, aop, a, inst.b(), inst.c())?;
                }
            }

            OpCode::Unm | OpCode::BNot => {
                if let Some(aop) = arith_opcode(op) {
                    arith_op(vm, ci_idx, base, aop, a, inst.b(), inst.b())?;
                }
            }

            OpCode::Not => {
                vm.stack[ra] = Value::Boolean(vm.stack[base + inst.b() as usize].is_falsy());
            }

            OpCode::Len => {
                let v = match &vm.stack[base + inst.b() as usize] {
                    Value::Table(t) => Value::Integer(t.borrow().length()),
                    Value::String(s) => Value::Integer(s.len() as i64),
                    other => {
                        let info = reg_info(vm, ci_idx, inst.b());
                        return Err(vm.runtime_error(format!(
                            "attempt to get length of a {} value{info}",
                            other.type_name()
                        )));
                    }
                };
                vm.stack[ra] = v;
            }

            OpCode::Concat => {
                concat(vm, ci_idx, base, a, inst.b(), inst.c())?;
            }

            OpCode::Jmp => {
                if a > 0 {
                    vm.close_upvalues(base + a as usize - 1);
                }
                jump(vm, ci_idx, inst.sbx());
            }

            OpCode::Eq => {
                let x = rk(vm, ci_idx, base, inst.b());
                let y = rk(vm, ci_idx, base, inst.c());
                if x.raw_equal(&y) != (a != 0) {
                    vm.call_stack[ci_idx].pc += 1;
                }
            }

            OpCode::Lt | OpCode::Le => {
                let x = rk(vm, ci_idx, base, inst.b());
                let y = rk(vm, ci_idx, base, inst.c());
                let ordered = if op == OpCode::Lt {
                    compare::less_than(&x, &y)
                } else {
                    compare::less_equal(&x, &y)
                };
                match ordered {
                    Some(res) if res != (a != 0) => vm.call_stack[ci_idx].pc += 1,
                    Some(_) => {}
                    None => return Err(vm.runtime_error(compare::compare_error(&x, &y))),
                }
            }

            OpCode::Test => {
                let skip = if inst.c() != 0 {
                    vm.stack[ra].is_falsy()
                } else {
                    vm.stack[ra].truthy()
                };
                if skip {
                    vm.call_stack[ci_idx].pc += 1;
                }
            }

            OpCode::TestSet => {
                let rb = &vm.stack[base + inst.b() as usize];
                let skip = if inst.c() != 0 { rb.is_falsy() } else { rb.truthy() };
                if skip {
                    vm.call_stack[ci_idx].pc += 1;
                } else {
                    vm.stack[ra] = rb.clone();
                }
            }

            OpCode::Call => {
                let b = inst.b() as usize;
                let nargs = if b == 0 {
                    vm.stack_top.saturating_sub(ra + 1)
                } else {
                    b - 1
                };
                let num_results = inst.c() as i32 - 1;
                if let Some(results) = precall(vm, ra, nargs, num_results)? {
                    place_results(vm, ra, results, num_results);
                }
            }

            OpCode::TailCall => {
                let b = inst.b() as usize;
                let nargs = if b == 0 {
                    vm.stack_top.saturating_sub(ra + 1)
                } else {
                    b - 1
                };
                let closure = match &vm.stack[ra] {
                    Value::Function(f) => Rc::clone(f),
                    _ => return Err(call_error(vm, ra)),
                };
                match &*closure {
                    Closure::Lua(_) => {
                        vm.close_upvalues(base);
                        let tail_calls = vm.call_stack[ci_idx].tail_calls;
                        let (func_idx, num_results) = match vm.call_stack.pop() {
                            Some(ci) => (ci.func_idx, ci.num_results),
                            None => return Err(LuaError::Runtime("no frame for tail call".into())),
                        };
                        for i in 0..=nargs {
                            vm.stack[func_idx + i] = std::mem::take(&mut vm.stack[ra + i]);
                        }
                        precall(vm, func_idx, nargs, num_results)?;
                        if let Some(ci) = vm.call_stack.last_mut() {
                            ci.tail_calls = tail_calls + 1;
                        }
                    }
                    Closure::Native(native) => {
                        let args = vm.stack[ra + 1..ra + 1 + nargs].to_vec();
                        let results = call_native(vm, native, args)?;
                        vm.close_upvalues(base);
                        if let Some(results) = post_return(vm, results, entry_depth) {
                            return Ok(results);
                        }
                    }
                }
            }

            OpCode::Return => {
                let b = inst.b() as usize;
                let n = if b == 0 {
                    vm.stack_top.saturating_sub(ra)
                } else {
                    b - 1
                };
                let results = vm.stack[ra..ra + n].to_vec();
                vm.close_upvalues(base);
                if let Some(results) = post_return(vm, results, entry_depth) {
                    return Ok(results);
                }
            }

            OpCode::ForPrep => {
                if let Err(msg) = for_prep(vm, ra) {
                    return Err(vm.runtime_error(msg));
                }
                jump(vm, ci_idx, inst.sbx());
            }

            OpCode::ForLoop => {
                if let Some(next) = for_loop(vm, ra) {
                    vm.stack[ra] = next.clone();
                    vm.stack[ra + 3] = next;
                    jump(vm, ci_idx, inst.sbx());
                }
            }

            OpCode::TForCall => {
                let cb = ra + 3;
                vm.stack[cb + 2] = vm.stack[ra + 2].clone();
                vm.stack[cb + 1] = vm.stack[ra + 1].clone();
                vm.stack[cb] = vm.stack[ra].clone();
                let num_results = inst.c() as i32;
                if let Some(results) = precall(vm, cb, 2, num_results)? {
                    place_results(vm, cb, results, num_results);
                }
            }

            OpCode::TForLoop => {
                if !vm.stack[ra + 1].is_nil() {
                    vm.stack[ra] = vm.stack[ra + 1].clone();
                    jump(vm, ci_idx, inst.sbx());
                }
            }

            OpCode::SetList => {
                let b = inst.b() as usize;
                let n = if b == 0 {
                    vm.stack_top.saturating_sub(ra + 1)
                } else {
                    b
                };
                let block = match inst.c() {
                    0 => {
                        let ci = &mut vm.call_stack[ci_idx];
                        let extra = ci.proto.code.get(ci.pc).map(|i| i.ax_field());
                        ci.pc += 1;
                        match extra {
                            Some(ax) => ax,
                            None => return Err(vm.runtime_error("SETLIST without EXTRAARG")),
                        }
                    }
                    c => c,
                };
                let first = (block as i64 - 1) * FIELDS_PER_FLUSH as i64;
                let table = match &vm.stack[ra] {
                    Value::Table(t) => Rc::clone(t),
                    other => {
                        return Err(vm.runtime_error(format!(
                            "attempt to index a {} value",
                            other.type_name()
                        )))
                    }
                };
                let mut t = table.borrow_mut();
                for i in 1..=n {
                    t.set_int(first + i as i64, vm.stack[ra + i].clone());
                }
            }

            OpCode::Closure => {
                let proto = match vm.call_stack[ci_idx].proto.protos.get(inst.bx() as usize) {
                    Some(p) => Rc::clone(p),
                    None => return Err(vm.runtime_error("invalid function index")),
                };
                let mut upvals = Vec::with_capacity(proto.upvalues.len());
                for desc in &proto.upvalues {
                    let cell = if desc.in_stack {
                        vm.find_or_create_open_upval(base + desc.index as usize)
                    } else {
                        upval_ref(vm, ci_idx, desc.index as u32)?
                    };
                    upvals.push(cell);
                }
                vm.stack[ra] = Value::Function(Rc::new(Closure::Lua(LuaClosure { proto, upvals })));
            }

            OpCode::VarArg => {
                let varargs = vm.call_stack[ci_idx].varargs.clone();
                place_results(vm, ra, varargs, inst.b() as i32 - 1);
            }

            OpCode::ExtraArg => {}
        }
    }
}
