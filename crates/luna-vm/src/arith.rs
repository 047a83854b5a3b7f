//! Arithmetic and bitwise operators on values, with string coercion.

use crate::value::Value;
use luna_core::number::{arith as num_arith, ArithError};
use luna_core::{ArithOp, Number};

/// Why an operator could not be applied. `culprit` is the operand
/// (0 or 1) the error message should describe.
#[derive(Debug, Clone, PartialEq)]
pub enum ArithFault {
    /// Operand is not a number (nor a numeric string).
    NotNumber { culprit: usize, bitwise: bool },
    /// Bitwise operand is a number without an exact integer value.
    NoIntegerRep { culprit: usize },
    /// Raw numeric failure such as integer division by zero.
    Numeric(ArithError),
}

/// Apply `op` to `a` and `b`. Unary operators ignore `b`.
pub fn arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value, ArithFault> {
    if op.is_bitwise() {
        return bitwise(op, a, b);
    }
    let x = a.to_number();
    let y = if op.is_unary() { x } else { b.to_number() };
    match (x, y) {
        (Some(x), Some(y)) => num_arith(op, x, y).map(Value::from).map_err(ArithFault::Numeric),
        (None, _) => Err(ArithFault::NotNumber { culprit: 0, bitwise: false }),
        (Some(_), None) => Err(ArithFault::NotNumber { culprit: 1, bitwise: false }),
    }
}

fn bitwise(op: ArithOp, a: &Value, b: &Value) -> Result<Value, ArithFault> {
    let b = if op.is_unary() { a } else { b };
    match (a.to_integer(), b.to_integer()) {
        (Some(x), Some(y)) => num_arith(op, Number::Int(x), Number::Int(y))
            .map(Value::from)
            .map_err(ArithFault::Numeric),
        (x, _) => {
            let both_numbers = a.to_number().is_some() && b.to_number().is_some();
            if both_numbers {
                Err(ArithFault::NoIntegerRep {
                    culprit: if x.is_none() { 0 } else { 1 },
                })
            } else {
                Err(ArithFault::NotNumber {
                    culprit: if a.to_number().is_none() { 0 } else { 1 },
                    bitwise: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(i: i64) -> Value {
        Value::Integer(i)
    }

    #[test]
    fn test_integer_and_float_results() {
        assert_eq!(arith(ArithOp::Add, &int(2), &int(3)), Ok(int(5)));
        assert!(matches!(arith(ArithOp::Div, &int(7), &int(2)), Ok(Value::Float(f)) if f == 3.5));
        assert!(matches!(arith(ArithOp::Add, &int(1), &Value::Float(0.5)), Ok(Value::Float(f)) if f == 1.5));
        assert!(matches!(arith(ArithOp::Pow, &int(2), &int(10)), Ok(Value::Float(f)) if f == 1024.0));
    }

    #[test]
    fn test_string_operands_convert() {
        assert!(matches!(arith(ArithOp::Add, &Value::from("10"), &int(1)), Ok(Value::Integer(11))));
        assert!(matches!(arith(ArithOp::Mul, &Value::from("1.5"), &int(2)), Ok(Value::Float(f)) if f == 3.0));
        assert!(matches!(arith(ArithOp::BAnd, &Value::from("7"), &int(3)), Ok(Value::Integer(3))));
    }

    #[test]
    fn test_integer_division_by_zero() {
        assert_eq!(
            arith(ArithOp::IDiv, &int(1), &int(0)),
            Err(ArithFault::Numeric(ArithError::DivByZero))
        );
        assert_eq!(
            arith(ArithOp::Mod, &int(1), &int(0)),
            Err(ArithFault::Numeric(ArithError::ModByZero))
        );
        assert!(matches!(arith(ArithOp::IDiv, &Value::Float(1.0), &int(0)), Ok(Value::Float(f)) if f.is_infinite()));
    }

    #[test]
    fn test_faults_name_the_culprit() {
        assert_eq!(
            arith(ArithOp::Add, &Value::Nil, &int(1)),
            Err(ArithFault::NotNumber { culprit: 0, bitwise: false })
        );
        assert_eq!(
            arith(ArithOp::Sub, &int(1), &Value::from("x")),
            Err(ArithFault::NotNumber { culprit: 1, bitwise: false })
        );
        assert_eq!(
            arith(ArithOp::BOr, &int(1), &Value::Float(1.5)),
            Err(ArithFault::NoIntegerRep { culprit: 1 })
        );
        assert_eq!(
            arith(ArithOp::Shl, &Value::Boolean(true), &int(1)),
            Err(ArithFault::NotNumber { culprit: 0, bitwise: true })
        );
    }

    #[test]
    fn test_unary() {
        assert_eq!(arith(ArithOp::Unm, &int(5), &Value::Nil), Ok(int(-5)));
        assert_eq!(arith(ArithOp::BNot, &int(0), &Value::Nil), Ok(int(-1)));
        assert_eq!(
            arith(ArithOp::Unm, &Value::Nil, &Value::Nil),
            Err(ArithFault::NotNumber { culprit: 0, bitwise: false })
        );
    }
}
