mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clcore::context::AutoloadHook;
use clcore::function::{Autoload, Function};
use clcore::{ControlSignal, ErrorKind, Interpreter, Runtime};
use common::{eval_error, eval_str};

#[test]
fn test_autoload_loads_exactly_once() {
    let runtime = Runtime::new();
    runtime.register_deferred_source(
        "geometry",
        "(setq *loads* (+ *loads* 1))
         (defun square (x) (* x x))",
    );
    let mut interp = runtime.interpreter();
    interp
        .eval_string("(defvar *loads* 0) (autoload 'square \"geometry\")")
        .unwrap();

    let square = runtime.packages().cl_user().find_symbol("SQUARE").unwrap().0;
    assert!(matches!(square.function(), Some(Function::Autoload(_))));

    assert_eq!(eval_str(&mut interp, "(square 3)"), "9");
    assert_eq!(eval_str(&mut interp, "(square 4)"), "16");
    assert_eq!(eval_str(&mut interp, "(funcall 'square 5)"), "25");
    assert_eq!(eval_str(&mut interp, "*loads*"), "1");
    assert!(matches!(square.function(), Some(Function::Closure(_))));
}

#[test]
fn test_custom_autoload_hook() {
    let runtime = Runtime::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let hook: AutoloadHook = Arc::new(
        move |interp: &mut Interpreter, placeholder: &Autoload| -> Result<(), ControlSignal> {
            counter.fetch_add(1, Ordering::SeqCst);
            assert_eq!(placeholder.source, "greetings");
            interp.eval_string("(defun greet (name) (list 'hello name))")?;
            Ok(())
        },
    );
    runtime.set_autoload_hook(hook);
    let mut interp = runtime.interpreter();
    interp.eval_string("(autoload 'greet \"greetings\")").unwrap();
    assert_eq!(eval_str(&mut interp, "(greet 'world)"), "(HELLO WORLD)");
    assert_eq!(eval_str(&mut interp, "(greet 'again)"), "(HELLO AGAIN)");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_autoload_that_defines_nothing() {
    let runtime = Runtime::new();
    runtime.register_deferred_source("empty-module", "(defvar *nothing-here* t)");
    let mut interp = runtime.interpreter();
    interp.eval_string("(autoload 'phantom \"empty-module\")").unwrap();
    assert_eq!(eval_error(&mut interp, "(phantom)"), ErrorKind::UndefinedFunction);
}

#[test]
fn test_failed_autoload_can_be_retried() {
    let runtime = Runtime::new();
    let mut interp = runtime.interpreter();
    interp.eval_string("(autoload 'later \"later-module\")").unwrap();
    assert_eq!(eval_error(&mut interp, "(later)"), ErrorKind::StreamError);
    runtime.register_deferred_source("later-module", "(defun later () :finally)");
    assert_eq!(eval_str(&mut interp, "(later)"), ":FINALLY");
}
