mod common;

use clcore::ErrorKind;
use common::{eval_error, eval_str, interpreter};

#[test]
fn test_let_shadowing() {
    let mut interp = interpreter();
    assert_eq!(eval_str(&mut interp, "(let ((x 1)) (let ((x 2)) x))"), "2");
    assert_eq!(eval_str(&mut interp, "(let ((x 1)) (let ((x 2)) x) x)"), "1");
    assert_eq!(eval_str(&mut interp, "(let ((x 1)) (let ((x 2) (y x)) y))"), "1");
    assert_eq!(eval_str(&mut interp, "(let* ((x 1) (y (+ x 1))) y)"), "2");
}

#[test]
fn test_special_binding_seen_by_callee() {
    let mut interp = interpreter();
    interp
        .eval_string("(defvar *depth* 0) (defun observe () *depth*)")
        .unwrap();
    assert_eq!(eval_str(&mut interp, "(let ((*depth* 5)) (observe))"), "5");
    assert_eq!(eval_str(&mut interp, "*depth*"), "0");
}

#[test]
fn test_special_binding_restored_after_throw() {
    let mut interp = interpreter();
    interp
        .eval_string("(defvar *depth* 0) (defun observe () *depth*)")
        .unwrap();
    assert_eq!(
        eval_str(&mut interp, "(catch 'out (let ((*depth* 5)) (throw 'out (observe))))"),
        "5"
    );
    assert_eq!(eval_str(&mut interp, "*depth*"), "0");
    assert_eq!(
        eval_error(&mut interp, "(let ((*depth* 9)) (car 'oops))"),
        ErrorKind::TypeError
    );
    assert_eq!(eval_str(&mut interp, "*depth*"), "0");
}

#[test]
fn test_local_special_declaration() {
    let mut interp = interpreter();
    interp.eval_string("(defun peek-z () (symbol-value 'z))").unwrap();
    assert_eq!(
        eval_str(&mut interp, "(let ((z 7)) (declare (special z)) (peek-z))"),
        "7"
    );
    assert_eq!(eval_error(&mut interp, "(peek-z)"), ErrorKind::UnboundVariable);
}

#[test]
fn test_closures_capture_bindings() {
    let mut interp = interpreter();
    interp
        .eval_string(
            "(defun make-counter ()
               (let ((n 0)) (lambda () (setq n (+ n 1)))))
             (defvar *c* (make-counter))",
        )
        .unwrap();
    eval_str(&mut interp, "(funcall *c*)");
    eval_str(&mut interp, "(funcall *c*)");
    assert_eq!(eval_str(&mut interp, "(funcall *c*)"), "3");
}

#[test]
fn test_lambda_lists() {
    let mut interp = interpreter();
    interp
        .eval_string(
            "(defun opt (a &optional (b 10 b-p) &rest more) (list a b b-p more))
             (defun keys (&key (x 1) ((:why y) 2) (z 3 z-p)) (list x y z z-p))",
        )
        .unwrap();
    assert_eq!(eval_str(&mut interp, "(opt 1)"), "(1 10 NIL NIL)");
    assert_eq!(eval_str(&mut interp, "(opt 1 2 3 4)"), "(1 2 T (3 4))");
    assert_eq!(eval_str(&mut interp, "(keys :z 9)"), "(1 2 9 T)");
    assert_eq!(eval_str(&mut interp, "(keys :why 5 :x 0)"), "(0 5 3 NIL)");
    assert_eq!(eval_error(&mut interp, "(keys :bogus 1)"), ErrorKind::ProgramError);
    assert_eq!(eval_str(&mut interp, "(keys :bogus 1 :allow-other-keys t)"), "(1 2 3 NIL)");
    assert_eq!(eval_error(&mut interp, "(opt)"), ErrorKind::WrongNumberOfArguments);
}

#[test]
fn test_macroexpand_of_non_macro_is_identity() {
    let mut interp = interpreter();
    assert_eq!(
        eval_str(&mut interp, "(multiple-value-list (macroexpand '(car x)))"),
        "((CAR X) NIL)"
    );
    assert_eq!(eval_str(&mut interp, "(multiple-value-list (macroexpand 'x))"), "(X NIL)");
    interp
        .eval_string("(defmacro twice (f) (list 'progn f f))")
        .unwrap();
    assert_eq!(
        eval_str(&mut interp, "(multiple-value-list (macroexpand-1 '(twice (foo))))"),
        "((PROGN (FOO) (FOO)) T)"
    );
}

#[test]
fn test_macro_destructuring_lambda_list() {
    let mut interp = interpreter();
    interp
        .eval_string(
            "(defmacro with-pair (((a b) pair) &body body)
               `(let ((,a (car ,pair)) (,b (cdr ,pair))) ,@body))",
        )
        .unwrap();
    assert_eq!(eval_str(&mut interp, "(with-pair ((x y) '(1 . 2)) (+ x y))"), "3");
}

#[test]
fn test_multiple_values() {
    let mut interp = interpreter();
    assert_eq!(
        eval_str(&mut interp, "(multiple-value-bind (q r) (values 7 3) (list r q))"),
        "(3 7)"
    );
    assert_eq!(eval_str(&mut interp, "(multiple-value-list (values))"), "NIL");
    assert_eq!(eval_str(&mut interp, "(multiple-value-call #'list (values 1 2) (values 3))"), "(1 2 3)");
    assert_eq!(eval_str(&mut interp, "(list (values 1 2))"), "(1)");
    assert_eq!(eval_str(&mut interp, "(nth-value 1 (values 'a 'b 'c))"), "B");
}

#[test]
fn test_recursion_and_self_evaluation() {
    let mut interp = interpreter();
    interp
        .eval_string("(defun fact (n) (if (<= n 1) 1 (* n (fact (- n 1)))))")
        .unwrap();
    assert_eq!(eval_str(&mut interp, "(fact 25)"), "15511210043330985984000000");
    assert_eq!(eval_str(&mut interp, ":kw"), ":KW");
    assert_eq!(eval_str(&mut interp, "\"s\""), "\"s\"");
}

#[test]
fn test_depth_limit() {
    let runtime = clcore::Runtime::with_config(clcore::RuntimeConfig::default().with_max_eval_depth(200));
    let mut interp = runtime.interpreter();
    interp.eval_string("(defun forever (n) (+ 1 (forever n)))").unwrap();
    assert_eq!(eval_error(&mut interp, "(forever 0)"), ErrorKind::StorageCondition);
    // The interpreter is usable afterwards.
    assert_eq!(eval_str(&mut interp, "(+ 1 2)"), "3");
}

#[test]
fn test_unbounded_recursion_on_small_thread() {
    let worker = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(|| {
            let mut interp = interpreter();
            interp.eval_string("(defun down (n) (down (+ n 1)))").unwrap();
            let kind = eval_error(&mut interp, "(down 0)");
            (kind, eval_str(&mut interp, "(+ 1 2)"))
        })
        .unwrap();
    let (kind, after) = worker.join().unwrap();
    assert_eq!(kind, ErrorKind::StorageCondition);
    assert_eq!(after, "3");
}

#[test]
fn test_evaluation_errors() {
    let mut interp = interpreter();
    assert_eq!(eval_error(&mut interp, "no-such-variable"), ErrorKind::UnboundVariable);
    assert_eq!(eval_error(&mut interp, "(no-such-function 1)"), ErrorKind::UndefinedFunction);
    assert_eq!(eval_error(&mut interp, "(setq t 3)"), ErrorKind::ProgramError);
    assert_eq!(eval_error(&mut interp, "(let ((1 2)) 3)"), ErrorKind::ProgramError);
    assert_eq!(eval_error(&mut interp, "((lambda (x) x))"), ErrorKind::WrongNumberOfArguments);
}

#[test]
fn test_error_carries_backtrace() {
    let mut interp = interpreter();
    interp.eval_string("(defun explode (x) (car x))").unwrap();
    match interp.eval_string("(explode 5)") {
        Err(clcore::ControlSignal::Error(condition)) => {
            let backtrace = condition.backtrace().expect("backtrace captured");
            assert!(backtrace.frames.iter().any(|f| f.operator == "EXPLODE"));
            assert!(backtrace.to_json().unwrap().contains("EXPLODE"));
        }
        other => panic!("expected an error, got {:?}", other),
    }
}

#[test]
fn test_in_package_mid_string() {
    let mut interp = interpreter();
    let printed = eval_str(
        &mut interp,
        "(make-package \"SHAPES\" :use '(\"COMMON-LISP\"))
         (in-package \"SHAPES\")
         (defun area (w h) (* w h))
         (list (area 2 3) (package-name (symbol-package 'area)))",
    );
    assert_eq!(printed, "(6 \"SHAPES\")");
    assert_eq!(eval_str(&mut interp, "(package-name *package*)"), "\"SHAPES\"");
}
