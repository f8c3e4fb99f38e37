// clcore Special Forms
//
// Operators that receive their argument forms unevaluated. Each validates
// its own shape and signals PROGRAM-ERROR when it is malformed. AND, OR,
// COND, WHEN, UNLESS and RETURN are special operators here for speed, but
// also carry an equivalent macro expansion so MACROEXPAND sees through them.

use std::sync::Arc;

use crate::conditions::Condition;
use crate::context::Runtime;
use crate::control;
use crate::environment::Environment;
use crate::eval::{ControlSignal, EvalResult, Interpreter};
use crate::function::{Expander, ExpanderFn, Function, Macro, SpecialFn};
use crate::lambda_list::LambdaListKind;
use crate::symbol::Symbol;
use crate::types::Value;

/// The argument forms of `operator`, checked against a count range.
pub(crate) fn check_args(
    operator: &str,
    args: &Value,
    min: usize,
    max: Option<usize>,
) -> Result<Vec<Value>, ControlSignal> {
    let forms = args.list_to_vec().ok_or_else(|| malformed(operator, args))?;
    if forms.len() < min || max.is_some_and(|max| forms.len() > max) {
        return Err(malformed(operator, args).into());
    }
    Ok(forms)
}

pub(crate) fn malformed(operator: &str, args: &Value) -> Condition {
    Condition::program_error(format!("Malformed {} form: {}", operator, args))
        .with_datum(args.clone())
}

/// A COMMON-LISP symbol as a datum, for building expansions.
pub(crate) fn cl(interp: &Interpreter, name: &str) -> Value {
    Value::Symbol(interp.runtime().packages().intern_cl(name))
}

pub(crate) fn sys(interp: &Interpreter, name: &str) -> Value {
    Value::Symbol(interp.runtime().packages().intern_sys(name))
}

/// `(QUOTE x)`
pub(crate) fn quoted(interp: &Interpreter, value: Value) -> Value {
    Value::list(vec![Value::Symbol(interp.symbols().quote.clone()), value])
}

fn rest_of(form: &Value) -> Value {
    form.cdr().unwrap_or(Value::Nil)
}

// ============================================================================
// QUOTE, IF, PROGN
// ============================================================================

fn sf_quote(_interp: &mut Interpreter, args: &Value, _env: &Environment) -> EvalResult {
    let forms = check_args("QUOTE", args, 1, Some(1))?;
    Ok(forms[0].clone())
}

fn sf_if(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("IF", args, 2, Some(3))?;
    let test = interp.eval(&forms[0], env)?;
    if test.is_true() {
        interp.eval(&forms[1], env)
    } else if let Some(else_form) = forms.get(2) {
        interp.eval(else_form, env)
    } else {
        interp.clear_values();
        Ok(Value::Nil)
    }
}

fn sf_progn(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    interp.eval_body(args, env)
}

// ============================================================================
// Assignment and binding
// ============================================================================

/// Assign a variable as SETQ does.
pub(crate) fn assign(interp: &mut Interpreter, sym: &Symbol, value: Value, env: &Environment) -> Result<(), ControlSignal> {
    if sym.is_constant() {
        return Err(Condition::program_error(format!("Cannot assign constant {}", sym))
            .with_datum(Value::Symbol(sym.clone()))
            .into());
    }
    if !env.set_variable(sym, value.clone()) {
        interp.set_dynamic_value(sym, value);
    }
    Ok(())
}

fn sf_setq(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("SETQ", args, 0, None)?;
    if forms.len() % 2 != 0 {
        return Err(malformed("SETQ", args).into());
    }
    let mut result = Value::Nil;
    for pair in forms.chunks(2) {
        let sym = interp.require_symbol(&pair[0])?;
        result = interp.eval(&pair[1], env)?;
        assign(interp, &sym, result.clone(), env)?;
    }
    interp.clear_values();
    Ok(result)
}

/// Split a LET binding spec into its variable and init form.
fn binding_parts(interp: &Interpreter, operator: &str, spec: &Value) -> Result<(Symbol, Value), ControlSignal> {
    match spec {
        Value::Symbol(_) | Value::Nil => Ok((interp.require_symbol(spec)?, Value::Nil)),
        Value::Cons(_) => {
            let parts = check_args(operator, spec, 1, Some(2))?;
            let sym = interp.require_symbol(&parts[0])?;
            Ok((sym, parts.get(1).cloned().unwrap_or(Value::Nil)))
        }
        other => Err(malformed(operator, other).into()),
    }
}

fn sf_let(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let bindings = args.car().ok_or_else(|| malformed("LET", args))?;
    let specs = interp.form_list(&bindings)?;
    let (body, specials) = interp.parse_body(&rest_of(args), false)?;

    let mut values = Vec::with_capacity(specs.len());
    for spec in &specs {
        let (sym, init) = binding_parts(interp, "LET", spec)?;
        let value = interp.eval(&init, env)?;
        values.push((sym, value));
    }

    let new_env = env.extend();
    interp.with_dynamic_extent(|interp| {
        for (sym, value) in values {
            interp.bind_variable(&sym, value, &new_env, &specials)?;
        }
        for sym in &specials {
            new_env.declare_special(sym);
        }
        interp.eval_sequence(&body, &new_env)
    })
}

fn sf_let_star(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let bindings = args.car().ok_or_else(|| malformed("LET*", args))?;
    let specs = interp.form_list(&bindings)?;
    let (body, specials) = interp.parse_body(&rest_of(args), false)?;

    interp.with_dynamic_extent(|interp| {
        let mut current = env.clone();
        for spec in &specs {
            let (sym, init) = binding_parts(interp, "LET*", spec)?;
            let value = interp.eval(&init, &current)?;
            let scope = current.extend();
            interp.bind_variable(&sym, value, &scope, &specials)?;
            current = scope;
        }
        let body_env = current.extend();
        for sym in &specials {
            body_env.declare_special(sym);
        }
        interp.eval_sequence(&body, &body_env)
    })
}

fn sf_progv(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("PROGV", args, 2, None)?;
    let symbols = interp.eval(&forms[0], env)?;
    let values = interp.eval(&forms[1], env)?;
    let symbols = interp.form_list(&symbols)?;
    let values = interp.form_list(&values)?;
    interp.with_dynamic_extent(|interp| {
        for (i, designator) in symbols.iter().enumerate() {
            let sym = interp.require_symbol(designator)?;
            match values.get(i) {
                Some(value) => interp.push_special(sym, value.clone()),
                None => interp.push_unbound_special(sym),
            }
        }
        interp.eval_sequence(&forms[2..], env)
    })
}

fn sf_locally(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let (body, specials) = interp.parse_body(args, false)?;
    let new_env = env.extend();
    for sym in &specials {
        new_env.declare_special(sym);
    }
    interp.eval_sequence(&body, &new_env)
}

fn sf_the(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("THE", args, 2, Some(2))?;
    interp.eval(&forms[1], env)
}

fn sf_eval_when(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let situations = args.car().ok_or_else(|| malformed("EVAL-WHEN", args))?;
    let situations = interp.form_list(&situations)?;
    let execute = situations.iter().any(|s| {
        matches!(s, Value::Symbol(sym) if matches!(sym.name(), "EXECUTE" | "EVAL"))
    });
    if execute {
        interp.eval_body(&rest_of(args), env)
    } else {
        interp.clear_values();
        Ok(Value::Nil)
    }
}

fn sf_load_time_value(interp: &mut Interpreter, args: &Value, _env: &Environment) -> EvalResult {
    let forms = check_args("LOAD-TIME-VALUE", args, 1, Some(2))?;
    let value = interp.eval(&forms[0], &Environment::new())?;
    interp.clear_values();
    Ok(value)
}

// ============================================================================
// Functions
// ============================================================================

/// `(head name lambda-list . body)` for NAMED-LAMBDA and MACRO-LAMBDA.
fn named_parts(interp: &Interpreter, operator: &str, form: &Value) -> Result<(Symbol, Value, Value), ControlSignal> {
    let rest = rest_of(form);
    let name = rest.car().ok_or_else(|| malformed(operator, form))?;
    let name = interp.require_symbol(&name)?;
    let tail = rest_of(&rest);
    let Some(ll) = tail.car() else {
        return Err(malformed(operator, form).into());
    };
    Ok((name, ll, rest_of(&tail)))
}

fn sf_function(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("FUNCTION", args, 1, Some(1))?;
    let target = &forms[0];
    match target {
        Value::Symbol(_) | Value::Nil => {
            let sym = interp.require_symbol(target)?;
            match interp.function_binding(&sym, env) {
                Some(Function::Autoload(placeholder)) => {
                    Ok(Value::Function(interp.resolve_autoload(&placeholder)?))
                }
                Some(f) if f.is_callable() => Ok(Value::Function(f)),
                _ => Err(Condition::undefined_function(target.clone()).into()),
            }
        }
        Value::Cons(c) => {
            let head = c.car();
            let symbols = interp.symbols();
            let is = |s: &Symbol| matches!(&head, Value::Symbol(h) if h == s);
            if is(&symbols.lambda) {
                Ok(Value::Function(interp.make_lambda(target, env)?))
            } else if is(&symbols.named_lambda) {
                let (name, ll, body) = named_parts(interp, "NAMED-LAMBDA", target)?;
                let f = interp.make_closure(Some(name.clone()), Some(name), &ll, &body, env, LambdaListKind::Ordinary)?;
                Ok(Value::Function(f))
            } else if is(&symbols.macro_lambda) {
                let (name, ll, body) = named_parts(interp, "MACRO-LAMBDA", target)?;
                let f = interp.make_closure(Some(name.clone()), Some(name), &ll, &body, env, LambdaListKind::Macro)?;
                Ok(Value::Function(f))
            } else {
                Err(Condition::undefined_function(target.clone()).into())
            }
        }
        other => Err(Condition::type_error(other.clone(), "(OR SYMBOL CONS)").into()),
    }
}

/// One `(name lambda-list . body)` definition of FLET, LABELS or MACROLET.
fn local_definition(
    interp: &Interpreter,
    operator: &str,
    def: &Value,
    env: &Environment,
    kind: LambdaListKind,
) -> Result<(Symbol, Function), ControlSignal> {
    let name = def.car().ok_or_else(|| malformed(operator, def))?;
    let name = interp.require_symbol(&name)?;
    let tail = rest_of(def);
    let Some(ll) = tail.car() else {
        return Err(malformed(operator, def).into());
    };
    let closure = interp.make_closure(Some(name.clone()), Some(name.clone()), &ll, &rest_of(&tail), env, kind)?;
    Ok((name, closure))
}

fn eval_with_local_specials(interp: &mut Interpreter, body: &Value, env: &Environment) -> EvalResult {
    let (forms, specials) = interp.parse_body(body, false)?;
    for sym in &specials {
        env.declare_special(sym);
    }
    interp.eval_sequence(&forms, env)
}

fn sf_flet(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let defs = args.car().ok_or_else(|| malformed("FLET", args))?;
    let new_env = env.extend();
    for def in interp.form_list(&defs)? {
        let (name, f) = local_definition(interp, "FLET", &def, env, LambdaListKind::Ordinary)?;
        new_env.bind_function(name, f);
    }
    eval_with_local_specials(interp, &rest_of(args), &new_env)
}

fn sf_labels(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let defs = args.car().ok_or_else(|| malformed("LABELS", args))?;
    let new_env = env.extend();
    for def in interp.form_list(&defs)? {
        let (name, f) = local_definition(interp, "LABELS", &def, &new_env, LambdaListKind::Ordinary)?;
        new_env.bind_function(name, f);
    }
    eval_with_local_specials(interp, &rest_of(args), &new_env)
}

fn sf_macrolet(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let defs = args.car().ok_or_else(|| malformed("MACROLET", args))?;
    let new_env = env.extend();
    for def in interp.form_list(&defs)? {
        let (name, expander) = local_definition(interp, "MACROLET", &def, env, LambdaListKind::Macro)?;
        let m = Function::Macro(Arc::new(Macro {
            name: Some(name.clone()),
            expander: Expander::Lisp(expander),
        }));
        new_env.bind_function(name, m);
    }
    eval_with_local_specials(interp, &rest_of(args), &new_env)
}

// ============================================================================
// Multiple values
// ============================================================================

fn sf_multiple_value_call(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("MULTIPLE-VALUE-CALL", args, 1, None)?;
    let designator = interp.eval(&forms[0], env)?;
    let function = interp.designated_function(&designator)?;
    let mut argv = Vec::new();
    for form in &forms[1..] {
        let primary = interp.eval(form, env)?;
        argv.extend(interp.capture_values(primary));
    }
    interp.apply_function(&function, &argv)
}

fn sf_multiple_value_prog1(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("MULTIPLE-VALUE-PROG1", args, 1, None)?;
    let primary = interp.eval(&forms[0], env)?;
    let values = interp.capture_values(primary);
    for form in &forms[1..] {
        interp.eval(form, env)?;
    }
    Ok(interp.restore_values(values))
}

// ============================================================================
// Conditionals with macro equivalents
// ============================================================================

fn sf_and(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("AND", args, 0, None)?;
    let Some((last, init)) = forms.split_last() else {
        return Ok(interp.t());
    };
    for form in init {
        if interp.eval(form, env)?.is_nil() {
            interp.clear_values();
            return Ok(Value::Nil);
        }
    }
    interp.eval(last, env)
}

fn expand_and(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let forms = check_args("AND", &rest_of(form), 0, None)?;
    Ok(match forms.as_slice() {
        [] => interp.t(),
        [only] => only.clone(),
        [first, rest @ ..] => {
            let inner = Value::list_with_tail(vec![cl(interp, "AND")], Value::list(rest.to_vec()));
            Value::list(vec![cl(interp, "IF"), first.clone(), inner, Value::Nil])
        }
    })
}

fn sf_or(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("OR", args, 0, None)?;
    let Some((last, init)) = forms.split_last() else {
        return Ok(Value::Nil);
    };
    for form in init {
        let value = interp.eval(form, env)?;
        interp.clear_values();
        if value.is_true() {
            return Ok(value);
        }
    }
    interp.eval(last, env)
}

fn expand_or(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let forms = check_args("OR", &rest_of(form), 0, None)?;
    Ok(match forms.as_slice() {
        [] => Value::Nil,
        [only] => only.clone(),
        [first, rest @ ..] => {
            let g = Value::Symbol(interp.gensym("OR"));
            let inner = Value::list_with_tail(vec![cl(interp, "OR")], Value::list(rest.to_vec()));
            Value::list(vec![
                cl(interp, "LET"),
                Value::list(vec![Value::list(vec![g.clone(), first.clone()])]),
                Value::list(vec![cl(interp, "IF"), g.clone(), g, inner]),
            ])
        }
    })
}

fn sf_cond(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    for clause in interp.form_list(args)? {
        let test = clause.car().ok_or_else(|| malformed("COND", &clause))?;
        let value = interp.eval(&test, env)?;
        if value.is_true() {
            let body = rest_of(&clause);
            if body.is_nil() {
                interp.clear_values();
                return Ok(value);
            }
            return interp.eval_body(&body, env);
        }
    }
    interp.clear_values();
    Ok(Value::Nil)
}

fn expand_cond(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let clauses = check_args("COND", &rest_of(form), 0, None)?;
    let Some((first, rest)) = clauses.split_first() else {
        return Ok(Value::Nil);
    };
    let test = first.car().ok_or_else(|| malformed("COND", first))?;
    let body = rest_of(first);
    let more = Value::list_with_tail(vec![cl(interp, "COND")], Value::list(rest.to_vec()));
    if body.is_nil() {
        return Ok(Value::list(vec![cl(interp, "OR"), test, more]));
    }
    let progn = Value::cons(cl(interp, "PROGN"), body);
    Ok(Value::list(vec![cl(interp, "IF"), test, progn, more]))
}

fn sf_when(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let test = args.car().ok_or_else(|| malformed("WHEN", args))?;
    if interp.eval(&test, env)?.is_true() {
        interp.eval_body(&rest_of(args), env)
    } else {
        interp.clear_values();
        Ok(Value::Nil)
    }
}

fn expand_when(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = rest_of(form);
    let test = args.car().ok_or_else(|| malformed("WHEN", &args))?;
    let progn = Value::cons(cl(interp, "PROGN"), rest_of(&args));
    Ok(Value::list(vec![cl(interp, "IF"), test, progn, Value::Nil]))
}

fn sf_unless(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let test = args.car().ok_or_else(|| malformed("UNLESS", args))?;
    if interp.eval(&test, env)?.is_nil() {
        interp.eval_body(&rest_of(args), env)
    } else {
        interp.clear_values();
        Ok(Value::Nil)
    }
}

fn expand_unless(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = rest_of(form);
    let test = args.car().ok_or_else(|| malformed("UNLESS", &args))?;
    let progn = Value::cons(cl(interp, "PROGN"), rest_of(&args));
    Ok(Value::list(vec![cl(interp, "IF"), test, Value::Nil, progn]))
}

fn sf_return(interp: &mut Interpreter, args: &Value, env: &Environment) -> EvalResult {
    let forms = check_args("RETURN", args, 0, Some(1))?;
    let nil = interp.symbols().nil.clone();
    control::return_from(interp, &nil, forms.first(), env)
}

fn expand_return(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let forms = check_args("RETURN", &rest_of(form), 0, Some(1))?;
    let value = forms.into_iter().next().unwrap_or(Value::Nil);
    Ok(Value::list(vec![cl(interp, "RETURN-FROM"), Value::Nil, value]))
}

// ============================================================================
// Registration
// ============================================================================

pub fn install(runtime: &Runtime) {
    let operators: [(&str, SpecialFn, Option<ExpanderFn>); 24] = [
        ("QUOTE", sf_quote, None),
        ("IF", sf_if, None),
        ("PROGN", sf_progn, None),
        ("SETQ", sf_setq, None),
        ("LET", sf_let, None),
        ("LET*", sf_let_star, None),
        ("PROGV", sf_progv, None),
        ("LOCALLY", sf_locally, None),
        ("THE", sf_the, None),
        ("EVAL-WHEN", sf_eval_when, None),
        ("LOAD-TIME-VALUE", sf_load_time_value, None),
        ("FUNCTION", sf_function, None),
        ("FLET", sf_flet, None),
        ("LABELS", sf_labels, None),
        ("MACROLET", sf_macrolet, None),
        ("MULTIPLE-VALUE-CALL", sf_multiple_value_call, None),
        ("MULTIPLE-VALUE-PROG1", sf_multiple_value_prog1, None),
        ("AND", sf_and, Some(expand_and)),
        ("OR", sf_or, Some(expand_or)),
        ("COND", sf_cond, Some(expand_cond)),
        ("WHEN", sf_when, Some(expand_when)),
        ("UNLESS", sf_unless, Some(expand_unless)),
        ("RETURN", sf_return, Some(expand_return)),
        ("DECLARE", sf_declare, None),
    ];
    for (name, func, expander) in operators {
        let sym = runtime.packages().intern_cl(name);
        runtime.define_special_operator(&sym, func, expander);
    }
}

/// Declarations are only valid where a body allows them.
fn sf_declare(_interp: &mut Interpreter, args: &Value, _env: &Environment) -> EvalResult {
    Err(Condition::program_error(format!("Misplaced declaration: (DECLARE . {})", args)).into())
}

#[cfg(test)]
mod tests {
    use crate::conditions::ErrorKind;
    use crate::context::Runtime;
    use crate::environment::Environment;
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
    fn test_let_shadowing() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (let ((x 2)) x))"), "2");
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (let ((x 2)) x) x)"), "1");
    }

    #[test]
    fn test_let_inits_see_outer_scope() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (let ((x 2) (y x)) y))"), "1");
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (let* ((x 2) (y x)) y))"), "2");
    }

    #[test]
    fn test_setq_lexical_and_global() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (setq x 5) x)"), "5");
        interp.eval_string("(setq *global-thing* 3)").unwrap();
        assert_eq!(eval_print(&mut interp, "*global-thing*"), "3");
        assert_eq!(eval_error(&mut interp, "(setq t 1)"), ErrorKind::ProgramError);
        assert_eq!(eval_error(&mut interp, "(setq x)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_if_shapes() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(if nil 1)"), "NIL");
        assert_eq!(eval_print(&mut interp, "(if 0 1 2)"), "1");
        assert_eq!(eval_error(&mut interp, "(if)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_flet_and_labels() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(flet ((f (x) (+ x 1))) (f 2))"), "3");
        assert_eq!(
            eval_print(&mut interp, "(labels ((f (n) (if (= n 0) 0 (+ 1 (f (- n 1)))))) (f 5))"),
            "5"
        );
        assert_eq!(eval_print(&mut interp, "(funcall (flet ((g () 7)) #'g))"), "7");
    }

    #[test]
    fn test_macrolet() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(macrolet ((twice (x) (list '+ x x))) (twice 4))"), "8");
    }

    #[test]
    fn test_multiple_value_forms() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(multiple-value-call #'list (values 1 2) (values) 3)"), "(1 2 3)");
        let v = interp.eval_string("(multiple-value-prog1 (values 1 2) (values 3 4 5))").unwrap();
        assert_eq!(interp.capture_values(v).len(), 2);
    }

    #[test]
    fn test_and_or_values() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(and)"), "T");
        assert_eq!(eval_print(&mut interp, "(or)"), "NIL");
        assert_eq!(eval_print(&mut interp, "(and 1 nil 3)"), "NIL");
        assert_eq!(eval_print(&mut interp, "(or nil 2 3)"), "2");
        let v = interp.eval_string("(or nil (values 1 2))").unwrap();
        assert_eq!(interp.capture_values(v).len(), 2);
        let v = interp.eval_string("(or (values 1 2) nil)").unwrap();
        assert_eq!(interp.capture_values(v).len(), 1);
    }

    #[test]
    fn test_cond() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(cond (nil 1) (5) (t 3))"), "5");
        assert_eq!(eval_print(&mut interp, "(cond (nil 1))"), "NIL");
        assert_eq!(eval_print(&mut interp, "(cond ((= 1 1) 2 3))"), "3");
    }

    #[test]
    fn test_expanders_agree_with_operators() {
        let mut interp = setup();
        let form = interp.read_from_string("(cond ((car x) 1) (y))").unwrap();
        let (expansion, changed) = interp.macroexpand_1(&form, &Environment::new()).unwrap();
        assert!(changed);
        assert_eq!(interp.prin1(&expansion), "(IF (CAR X) (PROGN 1) (COND (Y)))");
        let form = interp.read_from_string("(return 3)").unwrap();
        let (expansion, _) = interp.macroexpand_1(&form, &Environment::new()).unwrap();
        assert_eq!(interp.prin1(&expansion), "(RETURN-FROM NIL 3)");
    }

    #[test]
    fn test_function_forms() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(funcall #'(lambda (x) (* x x)) 5)"), "25");
        assert_eq!(eval_error(&mut interp, "#'if"), ErrorKind::UndefinedFunction);
        assert_eq!(eval_error(&mut interp, "#'no-such-fn"), ErrorKind::UndefinedFunction);
    }

    #[test]
    fn test_progv_binds_dynamically() {
        let mut interp = setup();
        interp.eval_string("(defvar *pv* 1) (defun read-pv () *pv*)").unwrap();
        assert_eq!(eval_print(&mut interp, "(progv '(*pv*) '(9) (read-pv))"), "9");
        assert_eq!(eval_print(&mut interp, "*pv*"), "1");
    }

    #[test]
    fn test_local_special_declaration() {
        let mut interp = setup();
        interp.eval_string("(defun peek-z () (symbol-value 'z))").unwrap();
        assert_eq!(eval_print(&mut interp, "(let ((z 4)) (declare (special z)) (peek-z))"), "4");
        assert_eq!(eval_error(&mut interp, "(peek-z)"), ErrorKind::UnboundVariable);
    }

    #[test]
    fn test_eval_when_and_the() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(eval-when (:execute) 1 2)"), "2");
        assert_eq!(eval_print(&mut interp, "(eval-when (:compile-toplevel) 1)"), "NIL");
        assert_eq!(eval_print(&mut interp, "(the fixnum 3)"), "3");
        assert_eq!(eval_print(&mut interp, "(load-time-value (+ 1 2))"), "3");
    }
}
