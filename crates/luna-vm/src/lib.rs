//! Luna virtual machine: values, tables, closures and the bytecode
//! interpreter for prototypes produced by `luna-compiler`.

pub mod arith;
pub mod base_lib;
pub mod binary_chunk;
pub mod callinfo;
pub mod closure;
pub mod coerce;
pub mod compare;
pub mod dispatch;
pub mod error;
pub mod table;
pub mod value;
pub mod varinfo;
pub mod vm;

pub use closure::{Closure, NativeContext, NativeFn};
pub use error::LuaError;
pub use table::Table;
pub use value::{TableRef, Value};
pub use vm::{Vm, VmConfig};

/// Compile and run `source` in a fresh VM, returning its results.
pub fn execute_source(source: &str) -> Result<Vec<Value>, LuaError> {
    Vm::new().do_string(source, "=input")
}
