//! Dynamically typed Lua values.

use crate::closure::Closure;
use crate::table::Table;
use luna_compiler::proto::Constant;
use luna_core::number::{float_to_integer, fmt_float, str_to_number};
use luna_core::{LuaStr, Number};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type TableRef = Rc<RefCell<Table>>;

/// A Lua value. Tables and functions are shared references compared by
/// identity; everything else is compared by value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(LuaStr),
    Table(TableRef),
    Function(Rc<Closure>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::Float(_) => "number",
            Value::String(_) => "string",
            Value::Table(_) => "table",
            Value::Function(_) => "function",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// `nil` and `false` are false; everything else is true.
    pub fn is_falsy(&self) -> bool {
        matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn truthy(&self) -> bool {
        !self.is_falsy()
    }

    /// Numeric view without string coercion.
    pub fn as_number(&self) -> Option<Number> {
        match *self {
            Value::Integer(i) => Some(Number::Int(i)),
            Value::Float(f) => Some(Number::Float(f)),
            _ => None,
        }
    }

    /// Numeric view, converting numeric strings the way arithmetic does.
    pub fn to_number(&self) -> Option<Number> {
        match self {
            Value::String(s) => str_to_number(s.as_bytes()),
            other => other.as_number(),
        }
    }

    /// Exact integer view (floats with integral values and numeric strings convert).
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) => float_to_integer(*f),
            Value::String(s) => str_to_number(s.as_bytes())?.to_integer(),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Value::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&LuaStr> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// String form used by concatenation: strings as-is, numbers formatted.
    pub fn to_concat_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Value::String(s) => Some(s.as_bytes().to_vec()),
            Value::Integer(i) => Some(i.to_string().into_bytes()),
            Value::Float(f) => Some(fmt_float(*f).into_bytes()),
            _ => None,
        }
    }

    /// Primitive equality: no metamethods, `1 == 1.0`, identity for
    /// tables and functions.
    pub fn raw_equal(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Integer(i), Value::Float(f)) | (Value::Float(f), Value::Integer(i)) => {
                float_to_integer(*f) == Some(*i)
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address used by `tostring` for reference types.
    fn address(&self) -> Option<*const ()> {
        match self {
            Value::Table(t) => Some(Rc::as_ptr(t) as *const ()),
            Value::Function(f) => Some(Rc::as_ptr(f) as *const ()),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.raw_equal(other)
    }
}

impl fmt::Display for Value {
    /// `tostring` form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str("nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => f.write_str(&fmt_float(*x)),
            Value::String(s) => write!(f, "{s}"),
            Value::Table(_) | Value::Function(_) => {
                let addr = self.address().unwrap_or(std::ptr::null());
                write!(f, "{}: {addr:p}", self.type_name())
            }
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{:?}", s.to_str_lossy()),
            Value::Float(x) => write!(f, "{}", fmt_float(*x)),
            other => write!(f, "{other}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int(i) => Value::Integer(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(LuaStr::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(LuaStr::from(s))
    }
}

impl From<LuaStr> for Value {
    fn from(s: LuaStr) -> Self {
        Value::String(s)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(t)))
    }
}

impl From<&Constant> for Value {
    fn from(k: &Constant) -> Self {
        match k {
            Constant::Nil => Value::Nil,
            Constant::Boolean(b) => Value::Boolean(*b),
            Constant::Integer(i) => Value::Integer(*i),
            Constant::Float(f) => Value::Float(*f),
            Constant::String(s) => Value::String(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Nil.is_falsy());
        assert!(Value::Boolean(false).is_falsy());
        assert!(Value::Integer(0).truthy());
        assert!(Value::from("").truthy());
    }

    #[test]
    fn test_raw_equal_mixes_int_and_float() {
        assert_eq!(Value::Integer(1), Value::Float(1.0));
        assert_ne!(Value::Integer(1), Value::Float(1.5));
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_ne!(Value::from("1"), Value::Integer(1));
    }

    #[test]
    fn test_tables_compare_by_identity() {
        let a = Value::from(Table::new());
        let b = Value::from(Table::new());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Integer(-7).to_string(), "-7");
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(0.1).to_string(), "0.1");
        assert_eq!(Value::Float(1e100).to_string(), "1e+100");
        assert_eq!(Value::Float(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::Boolean(true).to_string(), "true");
        let t = Value::from(Table::new()).to_string();
        assert!(t.starts_with("table: 0x"), "{t}");
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(Value::from(" 10 ").to_number(), Some(Number::Int(10)));
        assert_eq!(Value::from("0x10").to_integer(), Some(16));
        assert_eq!(Value::from("2.0").to_integer(), Some(2));
        assert_eq!(Value::from("2.5").to_integer(), None);
        assert_eq!(Value::from("abc").to_number(), None);
        assert_eq!(Value::Nil.to_number(), None);
    }
}
