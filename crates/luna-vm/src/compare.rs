//! Ordering comparisons with Lua 5.3 semantics. Equality is
//! [`Value::raw_equal`], as there are no metamethods.

use crate::value::Value;

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// `i < f` without rounding `i` through a float.
fn lt_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f < -TWO_POW_63 {
        false
    } else {
        i < f.ceil() as i64
    }
}

/// `i <= f`.
fn le_int_float(i: i64, f: f64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        true
    } else if f < -TWO_POW_63 {
        false
    } else {
        i <= f.floor() as i64
    }
}

/// `f < i`.
fn lt_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f < -TWO_POW_63 {
        true
    } else {
        (f.floor() as i64) < i
    }
}

/// `f <= i`.
fn le_float_int(f: f64, i: i64) -> bool {
    if f.is_nan() {
        false
    } else if f >= TWO_POW_63 {
        false
    } else if f < -TWO_POW_63 {
        true
    } else {
        (f.ceil() as i64) <= i
    }
}

/// `a < b`; `None` when the operands cannot be ordered.
pub fn less_than(a: &Value, b: &Value) -> Option<bool> {
    Some(match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x < y,
        (Value::Float(x), Value::Float(y)) => x < y,
        (Value::Integer(x), Value::Float(y)) => lt_int_float(*x, *y),
        (Value::Float(x), Value::Integer(y)) => lt_float_int(*x, *y),
        (Value::String(x), Value::String(y)) => x.as_bytes() < y.as_bytes(),
        _ => return None,
    })
}

/// `a <= b`; `None` when the operands cannot be ordered.
pub fn less_equal(a: &Value, b: &Value) -> Option<bool> {
    Some(match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => x <= y,
        (Value::Float(x), Value::Float(y)) => x <= y,
        (Value::Integer(x), Value::Float(y)) => le_int_float(*x, *y),
        (Value::Float(x), Value::Integer(y)) => le_float_int(*x, *y),
        (Value::String(x), Value::String(y)) => x.as_bytes() <= y.as_bytes(),
        _ => return None,
    })
}

/// Message for operands [`less_than`] / [`less_equal`] rejected.
pub fn compare_error(a: &Value, b: &Value) -> String {
    let (t1, t2) = (a.type_name(), b.type_name());
    if t1 == t2 {
        format!("attempt to compare two {t1} values")
    } else {
        format!("attempt to compare {t1} with {t2}")
    }
}
