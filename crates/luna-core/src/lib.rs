//! Primitives shared by the Luna compiler and virtual machine.

pub mod number;
pub mod string;

pub use number::{ArithError, ArithOp, Number};
pub use string::LuaStr;
