// clcore Control Transfer
//
// BLOCK/RETURN-FROM, TAGBODY/GO, CATCH/THROW and UNWIND-PROTECT. Exits are
// `ControlSignal` values carrying the identity of the activation they
// target; each establishing operator matches on that identity alone, so
// nested blocks of the same name and recursive catches resolve correctly.

use std::sync::Arc;

use crate::conditions::Condition;
use crate::context::Runtime;
use crate::environment::{Environment, TagbodyTag};
use crate::eval::{ControlSignal, EvalResult, Interpreter};
use crate::function::SpecialFn;
use crate::special_forms::{check_args, malformed};
use crate::symbol::Symbol;
use crate::types::Value;

/// Leave the innermost visible BLOCK named `name` with the values of
/// `value_form` (NIL when absent).
pub(crate) fn return_from(
    interp: &mut Interpreter,
    name: &Symbol,
    value_form: Option<&Value>,
    env: &Environment,
) -> EvalResult {
    let Some(block) = env.find_block(name) else {
        return Err(Condition::control_error(format!("RETURN-FROM unknown block {}", name))
            .with_datum(Value::Symbol(name.clone()))
            .into());
    };
    if !block.is_active() {
        return Err(Condition::control_error(format!("Block {} is no longer active", name))
            .with_datum(Value::Symbol(name.clone()))
            .into());
    }
    let primary = match value_form {
        Some(form) => interp.eval(form, env)?,
        None => {
            interp.clear_values();
            Value::Nil
        }
    };
    let values = interp.capture_values(primary);
    Err(ControlSignal::ReturnFrom { block, values })
}

fn sf_block(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("BLOCK", args, 1, None)?;
    let name = interp.require_symbol(&forms[0])?;
    interp.run_block(&name, &forms[1..], env)
}

fn sf_return_from(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("RETURN-FROM", args, 1, Some(2))?;
    let name = interp.require_symbol(&forms[0])?;
    return_from(interp, &name, forms.get(1), env)
}

fn is_go_tag(item: &Value) -> bool {
    matches!(item, Value::Symbol(_) | Value::Nil | Value::Fixnum(_) | Value::Bignum(_))
}

fn sf_tagbody(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let items = interp.form_list(args)?;
    let tagbody = TagbodyTag::new();
    let body_env = env.extend();
    for (index, item) in items.iter().enumerate() {
        if is_go_tag(item) {
            body_env.add_tag(item.clone(), &tagbody, index);
        }
    }

    let mut pc = 0;
    let outcome = loop {
        let Some(item) = items.get(pc) else {
            break Ok(());
        };
        pc += 1;
        if !item.is_cons() {
            continue;
        }
        match interp.eval(item, &body_env) {
            Ok(_) => {}
            Err(ControlSignal::Go { tagbody: target, index }) if Arc::ptr_eq(&target, &tagbody) => {
                pc = index + 1;
            }
            Err(signal) => break Err(signal),
        }
    };
    tagbody.deactivate();
    outcome?;
    interp.clear_values();
    Ok(Value::Nil)
}

fn sf_go(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("GO", args, 1, Some(1))?;
    let tag = &forms[0];
    if !is_go_tag(tag) {
        return Err(malformed("GO", args).into());
    }
    let Some((tagbody, index)) = env.find_tag(tag) else {
        return Err(Condition::control_error(format!("GO to unknown tag {}", interp.prin1(tag)))
            .with_datum(tag.clone())
            .into());
    };
    if !tagbody.is_active() {
        return Err(Condition::control_error(format!("Tag {} is no longer active", interp.prin1(tag)))
            .with_datum(tag.clone())
            .into());
    }
    Err(ControlSignal::Go { tagbody, index })
}

fn sf_catch(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("CATCH", args, 1, None)?;
    let tag = interp.eval(&forms[0], env)?;
    let id = interp.push_catch(tag);
    let result = interp.eval_sequence(&forms[1..], env);
    interp.pop_catch(id);
    match result {
        Err(ControlSignal::Throw { target, values, .. }) if target == id => Ok(interp.restore_values(values)),
        other => other,
    }
}

fn sf_throw(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("THROW", args, 2, Some(2))?;
    let tag = interp.eval(&forms[0], env)?;
    let primary = interp.eval(&forms[1], env)?;
    let values = interp.capture_values(primary);
    match interp.find_catch(&tag) {
        Some(target) => Err(ControlSignal::Throw { target, tag, values }),
        None => Err(Condition::control_error(format!("No catch for tag {}", interp.prin1(&tag)))
            .with_datum(tag)
            .into()),
    }
}

fn sf_unwind_protect(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("UNWIND-PROTECT", args, 1, None)?;
    let protected = match interp.eval(&forms[0], env) {
        Ok(primary) => Ok(interp.capture_values(primary)),
        Err(signal) => Err(signal),
    };
    // A non-local exit out of the cleanup replaces the pending one.
    interp.eval_sequence(&forms[1..], env)?;
    match protected {
        Ok(values) => Ok(interp.restore_values(values)),
        Err(signal) => Err(signal),
    }
}

pub fn install(runtime: &Runtime) {
    let operators: [(&str, SpecialFn); 7] = [
        ("BLOCK", sf_block),
        ("RETURN-FROM", sf_return_from),
        ("TAGBODY", sf_tagbody),
        ("GO", sf_go),
        ("CATCH", sf_catch),
        ("THROW", sf_throw),
        ("UNWIND-PROTECT", sf_unwind_protect),
    ];
    for (name, func) in operators {
        let sym = runtime.packages().intern_cl(name);
        runtime.define_special_operator(&sym, func, None);
    }
}

#[cfg(test)]
mod tests {
    use crate::conditions::ErrorKind;
    use crate::context::Runtime;
    use crate::eval::{ControlSignal, Interpreter};

    fn setup() -> Interpreter {
        Runtime::new().interpreter()
    }

    fn eval_print(interp: &mut Interpreter, source: &str) -> String {
        let value = interp.eval_string(source).unwrap();
        interp.prin1(&value)
    }

    fn eval_error(interp: &mut Interpreter, source: &str) -> ErrorKind {
        match interp.eval_string(source) {
            Err(ControlSignal::Error(c)) => c.kind(),
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_block_return_from() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(block nil (return-from nil 7) 8)"), "7");
        assert_eq!(eval_print(&mut interp, "(block b 1 2)"), "2");
        assert_eq!(eval_print(&mut interp, "(block b (return-from b))"), "NIL");
    }

    #[test]
    fn test_nested_blocks_same_name() {
        let mut interp = setup();
        let source = "(block a (+ 10 (block a (return-from a 1))))";
        assert_eq!(eval_print(&mut interp, source), "11");
    }

    #[test]
    fn test_return_from_through_function() {
        let mut interp = setup();
        interp.eval_string("(defun call-it (f) (funcall f) 99)").unwrap();
        assert_eq!(
            eval_print(&mut interp, "(block out (call-it (lambda () (return-from out 5))))"),
            "5"
        );
    }

    #[test]
    fn test_return_from_carries_values() {
        let mut interp = setup();
        let v = interp.eval_string("(block b (return-from b (values 1 2 3)))").unwrap();
        assert_eq!(interp.capture_values(v).len(), 3);
    }

    #[test]
    fn test_unknown_block() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(return-from nowhere 1)"), ErrorKind::ControlError);
    }

    #[test]
    fn test_tagbody_loop() {
        let mut interp = setup();
        let source = "(let ((n 0) (hits 0))
                       (tagbody
                        top
                          (setq hits (+ hits 1))
                          (setq n (+ n 1))
                          (if (< n 5) (go top)))
                       hits)";
        assert_eq!(eval_print(&mut interp, source), "5");
        assert_eq!(eval_print(&mut interp, "(tagbody 1 2)"), "NIL");
    }

    #[test]
    fn test_go_to_outer_tagbody() {
        let mut interp = setup();
        let source = "(let ((trace nil))
                       (tagbody
                          (tagbody
                             (setq trace (cons 1 trace))
                             (go out)
                             (setq trace (cons 2 trace)))
                        out
                          (setq trace (cons 3 trace)))
                       trace)";
        assert_eq!(eval_print(&mut interp, source), "(3 1)");
    }

    #[test]
    fn test_go_escaped_tagbody() {
        let mut interp = setup();
        interp
            .eval_string("(defvar *jump* nil) (tagbody (setq *jump* (lambda () (go end))) end)")
            .unwrap();
        assert_eq!(eval_error(&mut interp, "(funcall *jump*)"), ErrorKind::ControlError);
        assert_eq!(eval_error(&mut interp, "(go nowhere)"), ErrorKind::ControlError);
    }

    #[test]
    fn test_catch_throw() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(catch 'done (throw 'done 42) 0)"), "42");
        assert_eq!(eval_print(&mut interp, "(catch 'a (catch 'b (throw 'a 1)) 2)"), "1");
        let v = interp.eval_string("(catch 'm (throw 'm (values 1 2)))").unwrap();
        assert_eq!(interp.capture_values(v).len(), 2);
    }

    #[test]
    fn test_throw_is_dynamic() {
        let mut interp = setup();
        interp.eval_string("(defun bail (x) (throw 'bail x))").unwrap();
        assert_eq!(eval_print(&mut interp, "(catch 'bail (bail 3) 4)"), "3");
    }

    #[test]
    fn test_throw_without_catch() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(throw 'nobody 1)"), ErrorKind::ControlError);
        // A catch that has exited is no longer a target.
        assert_eq!(eval_error(&mut interp, "(progn (catch 'x 1) (throw 'x 2))"), ErrorKind::ControlError);
    }

    #[test]
    fn test_unwind_protect_runs_cleanup_once() {
        let mut interp = setup();
        interp.eval_string("(defvar *count* 0)").unwrap();
        assert_eq!(
            eval_print(&mut interp, "(catch 'tag (unwind-protect (throw 'tag 42) (setq *count* (+ *count* 1))))"),
            "42"
        );
        assert_eq!(eval_print(&mut interp, "*count*"), "1");
    }

    #[test]
    fn test_unwind_protect_preserves_values() {
        let mut interp = setup();
        let v = interp.eval_string("(unwind-protect (values 1 2) (values 3 4 5))").unwrap();
        assert_eq!(interp.capture_values(v).len(), 2);
    }

    #[test]
    fn test_unwind_protect_on_error() {
        let mut interp = setup();
        interp.eval_string("(defvar *cleaned* nil)").unwrap();
        assert_eq!(
            eval_error(&mut interp, "(unwind-protect (car 1) (setq *cleaned* t))"),
            ErrorKind::TypeError
        );
        assert_eq!(eval_print(&mut interp, "*cleaned*"), "T");
    }

    #[test]
    fn test_cleanup_exit_supersedes() {
        let mut interp = setup();
        let source = "(block b (catch 'tag (unwind-protect (throw 'tag 1) (return-from b 2))))";
        assert_eq!(eval_print(&mut interp, source), "2");
    }
}
