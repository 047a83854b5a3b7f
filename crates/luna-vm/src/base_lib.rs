//! The base library: `print`, `type`, `pcall`, `load` and friends.

use crate::closure::{Closure, NativeContext, NativeFn};
use crate::coerce;
use crate::error::LuaError;
use crate::table::Table;
use crate::value::Value;
use crate::vm::Vm;
use luna_core::number::str_to_number;
use luna_core::LuaStr;
use std::rc::Rc;

type NativeResult = Result<Vec<Value>, LuaError>;

/// Upper bound on the values `unpack` may produce.
const MAX_UNPACK: i128 = 1_000_000;

/// Register the base library in the VM's global table.
pub fn open(vm: &mut Vm) {
    let functions: [(&'static str, NativeFn); 18] = [
        ("print", lua_print),
        ("type", lua_type),
        ("tostring", lua_tostring),
        ("tonumber", lua_tonumber),
        ("ipairs", lua_ipairs),
        ("pairs", lua_pairs),
        ("next", lua_next),
        ("select", lua_select),
        ("rawget", lua_rawget),
        ("rawset", lua_rawset),
        ("rawequal", lua_rawequal),
        ("rawlen", lua_rawlen),
        ("assert", lua_assert),
        ("error", lua_error),
        ("pcall", lua_pcall),
        ("unpack", lua_unpack),
        ("load", lua_load),
        ("collectgarbage", lua_collectgarbage),
    ];
    for (name, func) in functions {
        vm.register(name, func);
    }

    let mut table_lib = Table::new();
    table_lib.set_str("unpack", native_value("unpack", lua_unpack));
    vm.set_global("table", Value::from(table_lib));
    vm.set_global("_G", Value::Table(vm.globals()));
    vm.set_global("_VERSION", Value::from("Lua 5.3"));
}

fn native_value(name: &'static str, func: NativeFn) -> Value {
    Value::Function(Rc::new(Closure::native(name, func)))
}

/// `tostring` text of a value, byte-exact for strings.
fn tostring_bytes(v: &Value) -> Vec<u8> {
    match v {
        Value::String(s) => s.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

fn lua_print(ctx: &mut NativeContext<'_>) -> NativeResult {
    let mut line = Vec::new();
    for (i, arg) in ctx.args.iter().enumerate() {
        if i > 0 {
            line.push(b'\t');
        }
        line.extend_from_slice(&tostring_bytes(arg));
    }
    line.push(b'\n');
    let written = ctx.vm.output().write_all(&line);
    written.map_err(|e| ctx.error(format!("cannot write output: {e}")))?;
    Ok(vec![])
}

fn lua_type(ctx: &mut NativeContext<'_>) -> NativeResult {
    let v = ctx.check_any(0)?;
    Ok(vec![Value::from(v.type_name())])
}

fn lua_tostring(ctx: &mut NativeContext<'_>) -> NativeResult {
    let v = ctx.check_any(0)?;
    Ok(vec![Value::String(LuaStr::from(tostring_bytes(&v)))])
}

fn lua_tonumber(ctx: &mut NativeContext<'_>) -> NativeResult {
    if matches!(ctx.args.get(1), None | Some(Value::Nil)) {
        let v = ctx.check_any(0)?;
        let n = match &v {
            Value::Integer(_) | Value::Float(_) => v,
            Value::String(s) => str_to_number(s.as_bytes()).map_or(Value::Nil, Value::from),
            _ => Value::Nil,
        };
        return Ok(vec![n]);
    }
    let base = ctx.check_integer(1)?;
    let s = match ctx.args.first() {
        Some(Value::String(s)) => s.clone(),
        other => {
            let got = other.map_or("no value", |v| v.type_name());
            return Err(ctx.arg_error(0, &format!("string expected, got {got}")));
        }
    };
    if !(2..=36).contains(&base) {
        return Err(ctx.arg_error(1, "base out of range"));
    }
    let n = coerce::parse_int_base(s.as_bytes(), base as u32);
    Ok(vec![n.map_or(Value::Nil, Value::Integer)])
}

fn ipairs_step(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    let i = ctx.check_integer(1)?.wrapping_add(1);
    let v = t.borrow().get_int(i);
    if v.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Integer(i), v])
    }
}

fn lua_ipairs(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    Ok(vec![
        native_value("ipairs_step", ipairs_step),
        Value::Table(t),
        Value::Integer(0),
    ])
}

fn lua_pairs(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    Ok(vec![native_value("next", lua_next), Value::Table(t), Value::Nil])
}

fn lua_next(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    let key = ctx.arg(1);
    let entry = t.borrow().next(&key);
    match entry {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(e) => Err(ctx.error(e.to_string())),
    }
}

fn lua_select(ctx: &mut NativeContext<'_>) -> NativeResult {
    let top = ctx.nargs() as i64;
    if let Some(Value::String(s)) = ctx.args.first() {
        if s.as_bytes() == b"#" {
            return Ok(vec![Value::Integer(top - 1)]);
        }
    }
    let mut n = ctx.check_integer(0)?;
    if n < 0 {
        n += top;
    } else if n > top {
        n = top;
    }
    if n < 1 {
        return Err(ctx.arg_error(0, "index out of range"));
    }
    Ok(ctx.args[n as usize..].to_vec())
}

fn lua_rawget(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    let key = ctx.check_any(1)?;
    let v = t.borrow().get(&key);
    Ok(vec![v])
}

fn lua_rawset(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    let key = ctx.check_any(1)?;
    let value = ctx.check_any(2)?;
    let stored = t.borrow_mut().set(key, value);
    stored.map_err(|e| ctx.error(e.to_string()))?;
    Ok(vec![Value::Table(t)])
}

fn lua_rawequal(ctx: &mut NativeContext<'_>) -> NativeResult {
    let a = ctx.check_any(0)?;
    let b = ctx.check_any(1)?;
    Ok(vec![Value::Boolean(a.raw_equal(&b))])
}

fn lua_rawlen(ctx: &mut NativeContext<'_>) -> NativeResult {
    match ctx.args.first() {
        Some(Value::Table(t)) => Ok(vec![Value::Integer(t.borrow().length())]),
        Some(Value::String(s)) => Ok(vec![Value::Integer(s.len() as i64)]),
        _ => Err(ctx.arg_error(0, "table or string expected")),
    }
}

/// Raise `value`, prefixing string messages with the position `level`
/// frames up.
fn raise(ctx: &NativeContext<'_>, value: Value, level: i64) -> LuaError {
    match value {
        Value::String(s) if level > 0 => {
            let mut msg = ctx.vm.where_(level as usize).into_bytes();
            msg.extend_from_slice(s.as_bytes());
            LuaError::Value(Value::String(LuaStr::from(msg)))
        }
        other => LuaError::Value(other),
    }
}

fn lua_assert(ctx: &mut NativeContext<'_>) -> NativeResult {
    let cond = ctx.check_any(0)?;
    if cond.truthy() {
        return Ok(std::mem::take(&mut ctx.args));
    }
    let msg = match ctx.args.get(1) {
        Some(v) => v.clone(),
        None => Value::from("assertion failed!"),
    };
    Err(raise(ctx, msg, 1))
}

fn lua_error(ctx: &mut NativeContext<'_>) -> NativeResult {
    let level = ctx.opt_integer(1, 1)?;
    Err(raise(ctx, ctx.arg(0), level))
}

fn lua_pcall(ctx: &mut NativeContext<'_>) -> NativeResult {
    let f = ctx.check_any(0)?;
    let args = ctx.args.get(1..).unwrap_or_default().to_vec();
    match ctx.vm.call(&f, &args, -1) {
        Ok(mut results) => {
            results.insert(0, Value::Boolean(true));
            Ok(results)
        }
        Err(e) if !e.is_catchable() => Err(e),
        Err(e) => Ok(vec![Value::Boolean(false), e.to_value()]),
    }
}

fn lua_unpack(ctx: &mut NativeContext<'_>) -> NativeResult {
    let t = ctx.check_table(0)?;
    let first = ctx.opt_integer(1, 1)?;
    let last = match ctx.args.get(2) {
        None | Some(Value::Nil) => t.borrow().length(),
        Some(_) => ctx.check_integer(2)?,
    };
    if first > last {
        return Ok(vec![]);
    }
    if last as i128 - first as i128 + 1 > MAX_UNPACK {
        return Err(ctx.error("too many results to unpack"));
    }
    let t = t.borrow();
    Ok((first..=last).map(|i| t.get_int(i)).collect())
}

fn lua_collectgarbage(ctx: &mut NativeContext<'_>) -> NativeResult {
    // memory is reference counted; only the queries are meaningful
    let opt = match ctx.args.first() {
        None | Some(Value::Nil) => LuaStr::from("collect"),
        Some(_) => ctx.check_string(0)?,
    };
    match opt.as_bytes() {
        b"collect" | b"step" | b"incremental" | b"generational" => Ok(vec![Value::Integer(0)]),
        b"count" => Ok(vec![Value::Float(0.0), Value::Integer(0)]),
        b"isrunning" => Ok(vec![Value::Boolean(true)]),
        b"stop" | b"restart" | b"setpause" | b"setstepmul" => Ok(vec![Value::Integer(0)]),
        _ => Err(ctx.arg_error(0, &format!("invalid option '{}'", opt.to_str_lossy()))),
    }
}

/// Collect the pieces returned by a `load` reader function.
fn read_chunk_pieces(ctx: &mut NativeContext<'_>, reader: &Value) -> Result<Result<Vec<u8>, String>, LuaError> {
    let mut chunk = Vec::new();
    loop {
        let piece = ctx.vm.call(reader, &[], 1)?;
        match piece.first() {
            None | Some(Value::Nil) => return Ok(Ok(chunk)),
            Some(Value::String(s)) if s.is_empty() => return Ok(Ok(chunk)),
            Some(Value::String(s)) => chunk.extend_from_slice(s.as_bytes()),
            Some(_) => return Ok(Err("reader function must return a string".to_string())),
        }
    }
}

fn lua_load(ctx: &mut NativeContext<'_>) -> NativeResult {
    let (chunk, default_name) = match ctx.args.first() {
        Some(Value::String(s)) => (s.as_bytes().to_vec(), s.to_str_lossy().into_owned()),
        Some(reader @ Value::Function(_)) => {
            let reader = reader.clone();
            match read_chunk_pieces(ctx, &reader)? {
                Ok(bytes) => (bytes, "=(load)".to_string()),
                Err(msg) => return Ok(vec![Value::Nil, Value::from(msg)]),
            }
        }
        other => {
            let got = other.map_or("no value", |v| v.type_name());
            return Err(ctx.arg_error(0, &format!("string expected, got {got}")));
        }
    };
    let chunkname = match ctx.args.get(1) {
        None | Some(Value::Nil) => default_name,
        Some(_) => ctx.check_string(1)?.to_str_lossy().into_owned(),
    };
    let mode = match ctx.args.get(2) {
        None | Some(Value::Nil) => LuaStr::from("bt"),
        Some(_) => ctx.check_string(2)?,
    };
    let is_binary = chunk.starts_with(crate::binary_chunk::LUA_SIGNATURE);
    let (kind, allowed) = if is_binary { ("binary", b'b') } else { ("text", b't') };
    if !mode.as_bytes().contains(&allowed) {
        let msg = format!(
            "attempt to load a {kind} chunk (mode is '{}')",
            mode.to_str_lossy()
        );
        return Ok(vec![Value::Nil, Value::from(msg)]);
    }
    let env = if ctx.nargs() >= 4 {
        ctx.arg(3)
    } else {
        Value::Table(ctx.vm.globals())
    };
    match ctx.vm.load_with_env(&chunk, &chunkname, env) {
        Ok(f) => Ok(vec![f]),
        Err(e) => Ok(vec![Value::Nil, Value::from(e.to_string())]),
    }
}
