//! Conversions between strings and numbers used outside plain arithmetic.

use crate::value::Value;
use luna_core::number::float_to_integer;
use luna_core::Number;

/// `tonumber(s, base)`: an optionally signed run of base-`base` digits,
/// surrounded by optional whitespace. Wraps around on overflow.
pub fn parse_int_base(s: &[u8], base: u32) -> Option<i64> {
    let s = s.trim_ascii();
    let (neg, digits) = match s.first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    if digits.is_empty() {
        return None;
    }
    let mut n: i64 = 0;
    for &c in digits {
        let d = (c as char).to_digit(base)?;
        n = n.wrapping_mul(base as i64).wrapping_add(d as i64);
    }
    Some(if neg { n.wrapping_neg() } else { n })
}

/// Integer limit for a numeric `for` with integer start and step.
/// Returns the clipped limit and whether the loop must not run at all,
/// or `None` when the limit is not a number.
pub fn for_limit(limit: &Value, step: i64) -> Option<(i64, bool)> {
    let f = match limit.to_number()? {
        Number::Int(i) => return Some((i, false)),
        Number::Float(f) => f,
    };
    let rounded = if step < 0 { f.ceil() } else { f.floor() };
    if let Some(i) = float_to_integer(rounded) {
        return Some((i, false));
    }
    // out of range: clip, and skip the loop when even the first step cannot run
    if f > 0.0 {
        Some((i64::MAX, step < 0))
    } else {
        Some((i64::MIN, step > 0))
    }
}
