//! Numeric primitives with Lua 5.3 semantics.
//!
//! The lexer, the constant folder and the VM all go through these
//! functions so that `2^53 // 3` computes the same value at compile time
//! and at run time.

use std::fmt;

/// A Lua number: either a 64-bit integer or a double.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Exact integer view: integers as-is, floats only when integral and in range.
    pub fn to_integer(self) -> Option<i64> {
        match self {
            Number::Int(i) => Some(i),
            Number::Float(f) => float_to_integer(f),
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, Number::Float(_))
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => f.write_str(&fmt_float(x)),
        }
    }
}

/// Arithmetic and bitwise operators, in opcode order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ArithOp {
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
}

impl ArithOp {
    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            ArithOp::BAnd | ArithOp::BOr | ArithOp::BXor | ArithOp::Shl | ArithOp::Shr | ArithOp::BNot
        )
    }

    pub fn is_unary(self) -> bool {
        matches!(self, ArithOp::Unm | ArithOp::BNot)
    }
}

/// Failures of raw numeric arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ArithError {
    #[error("attempt to perform 'n%%0'")]
    ModByZero,
    #[error("attempt to perform 'n//0'")]
    DivByZero,
    #[error("number has no integer representation")]
    NoIntegerRep,
}

const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

/// Convert a float to an integer only if it is integral and fits in i64.
pub fn float_to_integer(f: f64) -> Option<i64> {
    if f.floor() == f && (-TWO_POW_63..TWO_POW_63).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

/// Floor a float into an integer, if the result fits.
pub fn float_floor_to_integer(f: f64) -> Option<i64> {
    float_to_integer(f.floor())
}

/// Ceil a float into an integer, if the result fits.
pub fn float_ceil_to_integer(f: f64) -> Option<i64> {
    float_to_integer(f.ceil())
}

/// Apply `op` to two numbers. Unary operators ignore `b`.
pub fn arith(op: ArithOp, a: Number, b: Number) -> Result<Number, ArithError> {
    if op.is_bitwise() {
        let x = a.to_integer().ok_or(ArithError::NoIntegerRep)?;
        let y = b.to_integer().ok_or(ArithError::NoIntegerRep)?;
        return Ok(Number::Int(int_bitwise(op, x, y)));
    }
    match (op, a, b) {
        (ArithOp::Div | ArithOp::Pow, _, _) => Ok(Number::Float(float_arith(op, a.to_f64(), b.to_f64()))),
        (_, Number::Int(x), Number::Int(y)) => int_arith(op, x, y).map(Number::Int),
        _ => Ok(Number::Float(float_arith(op, a.to_f64(), b.to_f64()))),
    }
}

fn int_arith(op: ArithOp, a: i64, b: i64) -> Result<i64, ArithError> {
    Ok(match op {
        ArithOp::Add => a.wrapping_add(b),
        ArithOp::Sub => a.wrapping_sub(b),
        ArithOp::Mul => a.wrapping_mul(b),
        ArithOp::Mod => int_mod(a, b)?,
        ArithOp::IDiv => int_idiv(a, b)?,
        ArithOp::Unm => a.wrapping_neg(),
        _ => int_bitwise(op, a, b),
    })
}

fn int_bitwise(op: ArithOp, a: i64, b: i64) -> i64 {
    match op {
        ArithOp::BAnd => a & b,
        ArithOp::BOr => a | b,
        ArithOp::BXor => a ^ b,
        ArithOp::Shl => shift_left(a, b),
        ArithOp::Shr => shift_left(a, b.wrapping_neg()),
        ArithOp::BNot => !a,
        _ => unreachable!("not a bitwise operator: {op:?}"),
    }
}

fn float_arith(op: ArithOp, a: f64, b: f64) -> f64 {
    match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => a / b,
        ArithOp::Pow => a.powf(b),
        ArithOp::IDiv => (a / b).floor(),
        ArithOp::Mod => float_mod(a, b),
        ArithOp::Unm => -a,
        _ => unreachable!("not a float operator: {op:?}"),
    }
}

/// Integer modulo: the result takes the sign of the divisor.
pub fn int_mod(a: i64, b: i64) -> Result<i64, ArithError> {
    match b {
        0 => Err(ArithError::ModByZero),
        -1 => Ok(0),
        _ => {
            let r = a % b;
            Ok(if r != 0 && (r ^ b) < 0 { r + b } else { r })
        }
    }
}

/// Integer floor division.
pub fn int_idiv(a: i64, b: i64) -> Result<i64, ArithError> {
    match b {
        0 => Err(ArithError::DivByZero),
        -1 => Ok(a.wrapping_neg()),
        _ => {
            let q = a / b;
            Ok(if (a % b != 0) && ((a ^ b) < 0) { q - 1 } else { q })
        }
    }
}

/// Float modulo: `fmod` adjusted so the result takes the divisor's sign.
pub fn float_mod(a: f64, b: f64) -> f64 {
    let m = a % b;
    if m * b < 0.0 {
        m + b
    } else {
        m
    }
}

/// Logical left shift; negative counts shift right, |count| >= 64 yields 0.
pub fn shift_left(x: i64, n: i64) -> i64 {
    if n <= -64 || n >= 64 {
        0
    } else if n >= 0 {
        ((x as u64) << n) as i64
    } else {
        ((x as u64) >> (-n)) as i64
    }
}

// ---------------------------------------------------------------------------
// String -> number
// ---------------------------------------------------------------------------

fn is_space(c: u8) -> bool {
    matches!(c, b' ' | b'\t' | b'\n' | b'\r' | 0x0b | 0x0c)
}

fn trim_spaces(s: &[u8]) -> &[u8] {
    let start = s.iter().position(|&c| !is_space(c)).unwrap_or(s.len());
    let end = s.iter().rposition(|&c| !is_space(c)).map_or(start, |p| p + 1);
    &s[start..end]
}

fn hex_digit(c: u8) -> Option<u32> {
    (c as char).to_digit(16)
}

/// Convert a numeral (with optional surrounding whitespace and sign) the
/// way Lua does: integers when they fit, decimal overflow becomes a float,
/// hexadecimal integers wrap around.
pub fn str_to_number(s: &[u8]) -> Option<Number> {
    let s = trim_spaces(s);
    if s.is_empty() {
        return None;
    }
    if let Some(i) = str_to_int(s) {
        return Some(Number::Int(i));
    }
    str_to_float(s).map(Number::Float)
}

/// Integer conversion, accepting floats with an exact integer value.
pub fn str_to_integer(s: &[u8]) -> Option<i64> {
    str_to_number(s)?.to_integer()
}

fn split_sign(s: &[u8]) -> (bool, &[u8]) {
    match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    }
}

fn strip_hex_prefix(s: &[u8]) -> Option<&[u8]> {
    if s.len() >= 2 && s[0] == b'0' && (s[1] == b'x' || s[1] == b'X') {
        Some(&s[2..])
    } else {
        None
    }
}

fn str_to_int(s: &[u8]) -> Option<i64> {
    let (neg, body) = split_sign(s);
    let mut acc: u64 = 0;
    if let Some(hex) = strip_hex_prefix(body) {
        if hex.is_empty() {
            return None;
        }
        for &c in hex {
            acc = acc.wrapping_mul(16).wrapping_add(hex_digit(c)? as u64);
        }
    } else {
        if body.is_empty() {
            return None;
        }
        for &c in body {
            if !c.is_ascii_digit() {
                return None;
            }
            // overflow: the numeral is read as a float instead
            acc = acc.checked_mul(10)?.checked_add((c - b'0') as u64)?;
        }
        if acc > i64::MAX as u64 + u64::from(neg) {
            return None;
        }
    }
    let v = acc as i64;
    Some(if neg { v.wrapping_neg() } else { v })
}

fn str_to_float(s: &[u8]) -> Option<f64> {
    let (neg, body) = split_sign(s);
    let v = match strip_hex_prefix(body) {
        Some(hex) => parse_hex_float(hex)?,
        None => parse_dec_float(body)?,
    };
    Some(if neg { -v } else { v })
}

/// Decimal float: `digits [. digits] [e [sign] digits]` with at least one
/// mantissa digit. Rejects `inf`/`nan` spellings.
fn parse_dec_float(s: &[u8]) -> Option<f64> {
    let mut i = 0;
    let mut mantissa_digits = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        i += 1;
        mantissa_digits += 1;
    }
    if i < s.len() && s[i] == b'.' {
        i += 1;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
            mantissa_digits += 1;
        }
    }
    if mantissa_digits == 0 {
        return None;
    }
    if i < s.len() && (s[i] == b'e' || s[i] == b'E') {
        i += 1;
        if i < s.len() && (s[i] == b'+' || s[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < s.len() && s[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
    }
    if i != s.len() {
        return None;
    }
    std::str::from_utf8(s).ok()?.parse::<f64>().ok()
}

/// Hexadecimal float body (after `0x`): `hex [. hex] [p [sign] digits]`.
fn parse_hex_float(s: &[u8]) -> Option<f64> {
    let mut mantissa = 0.0f64;
    let mut exp: i64 = 0;
    let mut any_digit = false;
    let mut seen_dot = false;
    let mut i = 0;
    while i < s.len() {
        let c = s[i];
        if c == b'.' {
            if seen_dot {
                return None;
            }
            seen_dot = true;
        } else if let Some(d) = hex_digit(c) {
            mantissa = mantissa * 16.0 + d as f64;
            if seen_dot {
                exp -= 4;
            }
            any_digit = true;
        } else {
            break;
        }
        i += 1;
    }
    if !any_digit {
        return None;
    }
    if i < s.len() && (s[i] == b'p' || s[i] == b'P') {
        i += 1;
        let (neg, rest) = split_sign(&s[i..]);
        i = s.len() - rest.len();
        let start = i;
        let mut e: i64 = 0;
        while i < s.len() && s[i].is_ascii_digit() {
            e = e.saturating_mul(10).saturating_add((s[i] - b'0') as i64);
            i += 1;
        }
        if i == start {
            return None;
        }
        exp = exp.saturating_add(if neg { -e } else { e });
    }
    if i != s.len() {
        return None;
    }
    Some(mantissa * 2f64.powi(exp.clamp(-2200, 2200) as i32))
}

// ---------------------------------------------------------------------------
// Number -> string
// ---------------------------------------------------------------------------

/// Format a float like C's `%.14g`, appending `.0` when the result would
/// otherwise read as an integer.
pub fn fmt_float(f: f64) -> String {
    if f.is_nan() {
        return if f.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if f.is_infinite() {
        return if f < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    let mut s = fmt_g14(f);
    if s.bytes().all(|c| c == b'-' || c.is_ascii_digit()) {
        s.push_str(".0");
    }
    s
}

const PRECISION: i32 = 14;

fn fmt_g14(f: f64) -> String {
    let sci = format!("{:.*e}", (PRECISION - 1) as usize, f);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= PRECISION {
        let m = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{m}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (PRECISION - 1 - exp) as usize;
        trim_fraction(&format!("{f:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}
