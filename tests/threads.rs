mod common;

use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

use clcore::{Runtime, Value};
use common::eval_str;

#[test]
fn test_each_host_thread_gets_its_own_lisp_thread() {
    let runtime = Runtime::new();
    let main = runtime.interpreter();
    let main_thread = Arc::clone(main.thread());

    let worker_runtime = Arc::clone(&runtime);
    let worker_thread = thread::spawn(move || Arc::clone(worker_runtime.interpreter().thread()))
        .join()
        .unwrap();

    assert_ne!(main_thread.number(), worker_thread.number());
    assert_eq!(runtime.threads().find(worker_thread.number()).unwrap().number(), worker_thread.number());
}

#[test]
fn test_dynamic_bindings_are_per_thread() {
    let runtime = Runtime::new();
    let mut interp = runtime.interpreter();
    interp.eval_string("(defvar *where* :global)").unwrap();

    let (bound_tx, bound_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let worker_runtime = Arc::clone(&runtime);
    let worker = thread::spawn(move || {
        let mut interp = worker_runtime.interpreter();
        interp.eval_string("(defun report-binding () *where*)").unwrap();
        let inside = interp
            .with_dynamic_extent(|interp| {
                let sym = interp.runtime().packages().cl_user().find_symbol("*WHERE*").unwrap().0;
                interp.push_special(sym, Value::Fixnum(1));
                let seen = interp.eval_string("(report-binding)")?;
                bound_tx.send(()).unwrap();
                done_rx.recv().unwrap();
                Ok(seen)
            })
            .unwrap();
        interp.prin1(&inside)
    });

    bound_rx.recv().unwrap();
    // The worker is inside its binding; this thread still sees the global value.
    assert_eq!(eval_str(&mut interp, "*where*"), ":GLOBAL");
    done_tx.send(()).unwrap();
    assert_eq!(worker.join().unwrap(), "1");
}

#[test]
fn test_interrupt_from_another_thread() {
    let runtime = Runtime::new();
    let mut interp = runtime.interpreter();
    interp.eval_string("(defvar *stop* nil)").unwrap();

    let (thread_tx, thread_rx) = mpsc::channel();
    let worker_runtime = Arc::clone(&runtime);
    let worker = thread::spawn(move || {
        let mut interp = worker_runtime.interpreter();
        thread_tx.send(Arc::clone(interp.thread())).unwrap();
        let result = interp
            .eval_string("(dotimes (i 5000000 :timed-out) (when *stop* (return :stopped)))")
            .unwrap();
        interp.prin1(&result)
    });

    let target = thread_rx.recv().unwrap();
    let Value::Function(stopper) = interp.eval_string("(lambda () (setq *stop* t))").unwrap() else {
        panic!("expected a function");
    };
    target.interrupt(stopper, Vec::new());
    assert_eq!(worker.join().unwrap(), ":STOPPED");
}

#[test]
fn test_finished_workers_leave_the_registry() {
    let runtime = Runtime::new();
    let main = runtime.interpreter();
    for _ in 0..4 {
        let worker_runtime = Arc::clone(&runtime);
        thread::spawn(move || {
            let mut interp = worker_runtime.interpreter();
            interp.eval_string("(+ 1 2)").unwrap();
        })
        .join()
        .unwrap();
    }
    assert_eq!(runtime.threads().len(), 1);
    assert!(runtime.threads().find(main.thread().number()).is_some());
}
