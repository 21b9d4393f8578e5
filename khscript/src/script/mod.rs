//! The language core: values, expressions, variables, and the statement
//! compiler. Everything here is host-independent; execution lives in
//! `crate::task`.

pub mod compile;
pub mod expr;
pub mod value;
pub mod vars;

pub use compile::{compile, AssignKind, CompileDiagnostic, FunctionDef, Instruction, Program};
pub use expr::{evaluate, evaluate_condition, substitute, Resolver};
pub use value::Value;
pub use vars::{VarError, VarKind, VarStore};
