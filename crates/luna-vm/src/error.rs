//! Runtime error types.

use crate::binary_chunk::UndumpError;
use crate::value::Value;
use luna_compiler::CompileError;

/// An error raised while loading or running Lua code.
#[derive(Clone, Debug, thiserror::Error)]
pub enum LuaError {
    /// Runtime error whose message already carries its `chunk:line:` prefix.
    #[error("{0}")]
    Runtime(String),
    /// Value raised by `error(v)`.
    #[error("{}", describe_value(.0))]
    Value(Value),
    #[error("stack overflow")]
    StackOverflow,
    /// The instruction budget or deadline ran out.
    #[error("execution interrupted")]
    Interrupted,
    // Boxed to keep `LuaError` small; it travels through every frame of
    // host re-entry.
    #[error(transparent)]
    Compile(Box<CompileError>),
    #[error(transparent)]
    Undump(Box<UndumpError>),
}

impl From<CompileError> for LuaError {
    fn from(e: CompileError) -> Self {
        LuaError::Compile(Box::new(e))
    }
}

impl From<UndumpError> for LuaError {
    fn from(e: UndumpError) -> Self {
        LuaError::Undump(Box::new(e))
    }
}

fn describe_value(v: &Value) -> String {
    match v {
        Value::String(s) => s.to_str_lossy().into_owned(),
        Value::Integer(_) | Value::Float(_) => v.to_string(),
        other => format!("(error object is a {} value)", other.type_name()),
    }
}

impl LuaError {
    /// The value `pcall` hands back for this error.
    pub fn to_value(&self) -> Value {
        match self {
            LuaError::Value(v) => v.clone(),
            other => Value::from(other.to_string()),
        }
    }

    /// Whether a protected call may catch this error.
    pub fn is_catchable(&self) -> bool {
        !matches!(self, LuaError::Interrupted)
    }
}
