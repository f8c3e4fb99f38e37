// clcore: Common Lisp Runtime Core
//
// Readtable-driven reader, packages and symbols, lexical and dynamic
// environments, and a tree-walking evaluator with multiple values, macros,
// autoload, thread interrupts and non-local control transfer.

pub mod types;
pub mod symbol;
pub mod function;
pub mod lambda_list;
pub mod conditions;
pub mod environment;
pub mod eval;
pub mod special_forms;
pub mod control;
pub mod macros;
pub mod readtable;
pub mod reader;
pub mod streams;
pub mod printer;
pub mod numbers;
pub mod primitives;
pub mod threads;
pub mod debug;
pub mod config;
pub mod context;

pub use conditions::{Condition, ErrorKind};
pub use config::RuntimeConfig;
pub use context::Runtime;
pub use environment::Environment;
pub use eval::{ControlSignal, EvalResult, Interpreter};
pub use types::Value;
