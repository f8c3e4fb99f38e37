// Shared helpers for the integration tests.
#![allow(dead_code)]

use clcore::{ControlSignal, ErrorKind, Interpreter, Runtime};

pub fn interpreter() -> Interpreter {
    Runtime::new().interpreter()
}

/// Evaluate every form in `source`; the printed primary value of the last.
pub fn eval_str(interp: &mut Interpreter, source: &str) -> String {
    match interp.eval_string(source) {
        Ok(value) => interp.prin1(&value),
        Err(e) => panic!("evaluating {:?} failed: {:?}", source, e),
    }
}

/// Read one datum and print it back.
pub fn read_str(interp: &mut Interpreter, source: &str) -> String {
    match interp.read_from_string(source) {
        Ok(value) => interp.prin1(&value),
        Err(e) => panic!("reading {:?} failed: {:?}", source, e),
    }
}

/// The kind of error evaluating `source` signals.
pub fn eval_error(interp: &mut Interpreter, source: &str) -> ErrorKind {
    match interp.eval_string(source) {
        Err(ControlSignal::Error(c)) => c.kind(),
        Err(other) => panic!("expected an error from {:?}, got exit {:?}", source, other),
        Ok(v) => panic!("expected an error from {:?}, got {}", source, interp.prin1(&v)),
    }
}

pub fn read_error(interp: &mut Interpreter, source: &str) -> ErrorKind {
    match interp.read_from_string(source) {
        Err(ControlSignal::Error(c)) => c.kind(),
        Err(other) => panic!("expected a reader error from {:?}, got exit {:?}", source, other),
        Ok(v) => panic!("expected a reader error from {:?}, got {}", source, interp.prin1(&v)),
    }
}
