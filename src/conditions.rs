// clcore Conditions - Error Taxonomy
//
// Errors raised by the reader and evaluator. Handling (HANDLER-BIND,
// restarts) belongs to an outer layer; this module only describes what went
// wrong, with enough structure for that layer to dispatch on.

use std::fmt;

use serde::Serialize;

use crate::debug::Backtrace;
use crate::function::Arity;
use crate::types::Value;

/// Kind of a signalled error, named after the standard condition type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    EndOfFile,
    ReaderError,
    PackageError,
    UnboundVariable,
    UndefinedFunction,
    ProgramError,
    TypeError,
    /// Argument count mismatch. Treated as a TYPE-ERROR.
    WrongNumberOfArguments,
    ControlError,
    StreamError,
    SimpleError,
    StorageCondition,
}

impl ErrorKind {
    pub fn lisp_name(self) -> &'static str {
        match self {
            Self::EndOfFile => "END-OF-FILE",
            Self::ReaderError => "READER-ERROR",
            Self::PackageError => "PACKAGE-ERROR",
            Self::UnboundVariable => "UNBOUND-VARIABLE",
            Self::UndefinedFunction => "UNDEFINED-FUNCTION",
            Self::ProgramError => "PROGRAM-ERROR",
            Self::TypeError => "TYPE-ERROR",
            Self::WrongNumberOfArguments => "WRONG-NUMBER-OF-ARGUMENTS",
            Self::ControlError => "CONTROL-ERROR",
            Self::StreamError => "STREAM-ERROR",
            Self::SimpleError => "SIMPLE-ERROR",
            Self::StorageCondition => "STORAGE-CONDITION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.lisp_name())
    }
}

/// A signalled error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Condition {
    kind: ErrorKind,
    message: String,
    datum: Option<Value>,
    operands: Vec<Value>,
    backtrace: Option<Backtrace>,
}

impl Condition {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            datum: None,
            operands: Vec::new(),
            backtrace: None,
        }
    }

    pub fn with_datum(mut self, datum: Value) -> Self {
        self.datum = Some(datum);
        self
    }

    pub fn with_operands(mut self, operands: Vec<Value>) -> Self {
        self.operands = operands;
        self
    }

    pub(crate) fn set_backtrace(&mut self, backtrace: Backtrace) {
        self.backtrace = Some(backtrace);
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The offending object, when there is one.
    pub fn datum(&self) -> Option<&Value> {
        self.datum.as_ref()
    }

    pub fn operands(&self) -> &[Value] {
        &self.operands
    }

    /// Evaluation stack at the point of failure, innermost frame first.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        self.backtrace.as_ref()
    }

    pub fn is_type_error(&self) -> bool {
        matches!(self.kind, ErrorKind::TypeError | ErrorKind::WrongNumberOfArguments)
    }

    // ------------------------------------------------------------------
    // Constructors for the common cases
    // ------------------------------------------------------------------

    pub fn end_of_file() -> Self {
        Self::new(ErrorKind::EndOfFile, "Unexpected end of input")
    }

    pub fn reader_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ReaderError, message)
    }

    pub fn package_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PackageError, message)
    }

    pub fn unbound_variable(name: Value) -> Self {
        Self::new(
            ErrorKind::UnboundVariable,
            format!("The variable {} is unbound.", name),
        )
        .with_datum(name)
    }

    pub fn undefined_function(name: Value) -> Self {
        Self::new(
            ErrorKind::UndefinedFunction,
            format!("The function {} is undefined.", name),
        )
        .with_datum(name)
    }

    pub fn program_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProgramError, message)
    }

    pub fn type_error(datum: Value, expected: &str) -> Self {
        Self::new(
            ErrorKind::TypeError,
            format!("The value {} is not of type {}.", datum, expected),
        )
        .with_datum(datum)
    }

    pub fn wrong_number_of_arguments(name: &str, got: usize, arity: Arity) -> Self {
        let expected = match arity.max {
            Some(max) if max == arity.min => format!("{}", max),
            Some(max) => format!("{} to {}", arity.min, max),
            None => format!("at least {}", arity.min),
        };
        Self::new(
            ErrorKind::WrongNumberOfArguments,
            format!(
                "Wrong number of arguments for {}: got {}, expected {}.",
                name, got, expected
            ),
        )
    }

    pub fn control_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ControlError, message)
    }

    pub fn stream_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StreamError, message)
    }

    pub fn simple_error(message: impl Into<String>, arguments: Vec<Value>) -> Self {
        Self::new(ErrorKind::SimpleError, message).with_operands(arguments)
    }

    pub fn storage_condition(depth: usize) -> Self {
        Self::new(
            ErrorKind::StorageCondition,
            format!("Evaluation depth limit of {} exceeded.", depth),
        )
    }

    pub fn stack_exhausted(budget: usize) -> Self {
        Self::new(
            ErrorKind::StorageCondition,
            format!("Evaluation used more than {} bytes of stack.", budget),
        )
    }
}
