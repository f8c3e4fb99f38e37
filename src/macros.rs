// clcore Built-in Macros
//
// Native expanders for the defining forms, the iteration and place macros,
// and backquote. Each expander receives the whole form and returns its
// expansion; the evaluator then evaluates that in the caller's environment.
// Expansions only reference COMMON-LISP operators and a few SYSTEM
// primitives (named with a leading %).

use crate::conditions::Condition;
use crate::context::Runtime;
use crate::environment::Environment;
use crate::eval::{ControlSignal, EvalResult, Interpreter};
use crate::function::ExpanderFn;
use crate::special_forms::{check_args, cl, malformed, quoted, sys};
use crate::symbol::Symbol;
use crate::types::Value;

fn rest_of(form: &Value) -> Value {
    form.cdr().unwrap_or(Value::Nil)
}

fn list(items: Vec<Value>) -> Value {
    Value::list(items)
}

/// `(head . tail)` where `tail` is already a list.
fn form_with(head: Value, leading: Vec<Value>, tail: Value) -> Value {
    Value::cons(head, Value::list_with_tail(leading, tail))
}

/// Leading `(DECLARE ...)` forms and the remaining body.
fn split_declarations(interp: &Interpreter, body: &[Value]) -> (Vec<Value>, Vec<Value>) {
    let declare = &interp.symbols().declare;
    let count = body
        .iter()
        .take_while(|f| matches!(f.car(), Some(Value::Symbol(s)) if s == *declare))
        .count();
    (body[..count].to_vec(), body[count..].to_vec())
}

fn symbol_arg(interp: &Interpreter, operator: &str, form: &Value, v: &Value) -> Result<Symbol, ControlSignal> {
    match v {
        Value::Symbol(_) | Value::Nil => interp.require_symbol(v),
        _ => Err(malformed(operator, form).into()),
    }
}

// ============================================================================
// Defining forms
// ============================================================================

/// `(DEFUN name lambda-list . body)`
fn expand_defun(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DEFUN", &rest_of(form), 2, None)?;
    let name = interp.require_symbol(&args[0])?;
    let lambda = form_with(
        sys(interp, "NAMED-LAMBDA"),
        vec![Value::Symbol(name.clone()), args[1].clone()],
        list(args[2..].to_vec()),
    );
    Ok(list(vec![
        sys(interp, "%DEFUN"),
        quoted(interp, Value::Symbol(name)),
        list(vec![cl(interp, "FUNCTION"), lambda]),
    ]))
}

/// `(DEFMACRO name lambda-list . body)`
fn expand_defmacro(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DEFMACRO", &rest_of(form), 2, None)?;
    let name = interp.require_symbol(&args[0])?;
    let lambda = form_with(
        sys(interp, "MACRO-LAMBDA"),
        vec![Value::Symbol(name.clone()), args[1].clone()],
        list(args[2..].to_vec()),
    );
    Ok(list(vec![
        sys(interp, "%DEFMACRO"),
        quoted(interp, Value::Symbol(name)),
        list(vec![cl(interp, "FUNCTION"), lambda]),
    ]))
}

/// `(DEFVAR name [init [doc]])`: assigns only when unbound.
fn expand_defvar(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DEFVAR", &rest_of(form), 1, Some(3))?;
    let name = symbol_arg(interp, "DEFVAR", form, &args[0])?;
    let qname = quoted(interp, Value::Symbol(name));
    let mut body = vec![cl(interp, "PROGN"), list(vec![sys(interp, "%PROCLAIM-SPECIAL"), qname.clone()])];
    if let Some(init) = args.get(1) {
        body.push(list(vec![
            cl(interp, "UNLESS"),
            list(vec![cl(interp, "BOUNDP"), qname.clone()]),
            list(vec![cl(interp, "SET"), qname.clone(), init.clone()]),
        ]));
    }
    body.push(qname);
    Ok(list(body))
}

/// `(DEFPARAMETER name init [doc])`: always assigns.
fn expand_defparameter(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DEFPARAMETER", &rest_of(form), 2, Some(3))?;
    let name = symbol_arg(interp, "DEFPARAMETER", form, &args[0])?;
    let qname = quoted(interp, Value::Symbol(name));
    Ok(list(vec![
        cl(interp, "PROGN"),
        list(vec![sys(interp, "%PROCLAIM-SPECIAL"), qname.clone()]),
        list(vec![cl(interp, "SET"), qname.clone(), args[1].clone()]),
        qname,
    ]))
}

fn expand_defconstant(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DEFCONSTANT", &rest_of(form), 2, Some(3))?;
    let name = symbol_arg(interp, "DEFCONSTANT", form, &args[0])?;
    Ok(list(vec![
        sys(interp, "%DEFCONSTANT"),
        quoted(interp, Value::Symbol(name)),
        args[1].clone(),
    ]))
}

fn expand_declaim(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let specs = check_args("DECLAIM", &rest_of(form), 0, None)?;
    let mut body = vec![cl(interp, "PROGN")];
    for spec in specs {
        body.push(list(vec![cl(interp, "PROCLAIM"), quoted(interp, spec)]));
    }
    body.push(Value::Nil);
    Ok(list(body))
}

fn expand_in_package(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("IN-PACKAGE", &rest_of(form), 1, Some(1))?;
    let name = match &args[0] {
        Value::String(s) => s.to_string(),
        Value::Symbol(s) => s.name().to_string(),
        Value::Char(c) => c.to_string(),
        _ => return Err(malformed("IN-PACKAGE", form).into()),
    };
    Ok(list(vec![sys(interp, "%IN-PACKAGE"), Value::string(name)]))
}

/// `(LAMBDA ...)` as a form means `#'(LAMBDA ...)`.
fn expand_lambda(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    Ok(list(vec![cl(interp, "FUNCTION"), form.clone()]))
}

// ============================================================================
// Sequencing and values
// ============================================================================

fn expand_prog1(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("PROG1", &rest_of(form), 1, None)?;
    let g = Value::Symbol(interp.gensym("PROG1-"));
    let mut body = vec![
        cl(interp, "LET"),
        list(vec![list(vec![g.clone(), args[0].clone()])]),
    ];
    body.extend(args[1..].iter().cloned());
    body.push(g);
    Ok(list(body))
}

fn expand_prog2(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("PROG2", &rest_of(form), 2, None)?;
    let prog1 = form_with(cl(interp, "PROG1"), vec![args[1].clone()], list(args[2..].to_vec()));
    Ok(list(vec![cl(interp, "PROGN"), args[0].clone(), prog1]))
}

/// `(MULTIPLE-VALUE-BIND vars form . body)`
fn expand_multiple_value_bind(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("MULTIPLE-VALUE-BIND", &rest_of(form), 2, None)?;
    let vars = interp.form_list(&args[0])?;
    let mut ll = vec![cl(interp, "&OPTIONAL")];
    ll.extend(vars);
    ll.push(cl(interp, "&REST"));
    ll.push(Value::Symbol(interp.gensym("IGNORE-")));
    let lambda = form_with(cl(interp, "LAMBDA"), vec![list(ll)], list(args[2..].to_vec()));
    Ok(list(vec![
        cl(interp, "MULTIPLE-VALUE-CALL"),
        list(vec![cl(interp, "FUNCTION"), lambda]),
        args[1].clone(),
    ]))
}

fn expand_multiple_value_list(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("MULTIPLE-VALUE-LIST", &rest_of(form), 1, Some(1))?;
    Ok(list(vec![
        cl(interp, "MULTIPLE-VALUE-CALL"),
        list(vec![cl(interp, "FUNCTION"), cl(interp, "LIST")]),
        args[0].clone(),
    ]))
}

fn expand_nth_value(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("NTH-VALUE", &rest_of(form), 2, Some(2))?;
    Ok(list(vec![
        cl(interp, "NTH"),
        args[0].clone(),
        list(vec![cl(interp, "MULTIPLE-VALUE-LIST"), args[1].clone()]),
    ]))
}

// ============================================================================
// CASE
// ============================================================================

fn is_default_key(interp: &Interpreter, keys: &Value) -> bool {
    match keys {
        Value::Symbol(s) => *s == interp.symbols().t || s.name() == "OTHERWISE",
        _ => false,
    }
}

/// COND clauses for CASE-style dispatch on the variable `key`, plus every
/// key seen (for ECASE's error).
fn case_clauses(
    interp: &Interpreter,
    operator: &str,
    key: &Value,
    clauses: &[Value],
    allow_default: bool,
) -> Result<(Vec<Value>, Vec<Value>), ControlSignal> {
    let mut out = Vec::new();
    let mut all_keys = Vec::new();
    for clause in clauses {
        let keys = clause.car().ok_or_else(|| malformed(operator, clause))?;
        let body = Value::cons(cl(interp, "PROGN"), rest_of(clause));
        let test = if allow_default && is_default_key(interp, &keys) {
            interp.t()
        } else {
            match &keys {
                Value::Nil => continue,
                Value::Cons(_) => {
                    let items = interp.form_list(&keys)?;
                    all_keys.extend(items.iter().cloned());
                    list(vec![cl(interp, "MEMBER"), key.clone(), quoted(interp, keys.clone())])
                }
                atom => {
                    all_keys.push(atom.clone());
                    list(vec![cl(interp, "EQL"), key.clone(), quoted(interp, atom.clone())])
                }
            }
        };
        out.push(list(vec![test, body]));
    }
    Ok((out, all_keys))
}

/// `(CASE keyform . clauses)`: NIL when no clause matches.
fn expand_case(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("CASE", &rest_of(form), 1, None)?;
    let g = Value::Symbol(interp.gensym("KEY-"));
    let (clauses, _) = case_clauses(interp, "CASE", &g, &args[1..], true)?;
    Ok(list(vec![
        cl(interp, "LET"),
        list(vec![list(vec![g, args[0].clone()])]),
        Value::cons(cl(interp, "COND"), list(clauses)),
    ]))
}

/// `(ECASE keyform . clauses)`: a TYPE-ERROR when no clause matches.
fn expand_ecase(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("ECASE", &rest_of(form), 1, None)?;
    let g = Value::Symbol(interp.gensym("KEY-"));
    let (mut clauses, keys) = case_clauses(interp, "ECASE", &g, &args[1..], false)?;
    clauses.push(list(vec![
        interp.t(),
        list(vec![sys(interp, "%ECASE-FAILURE"), g.clone(), quoted(interp, list(keys))]),
    ]));
    Ok(list(vec![
        cl(interp, "LET"),
        list(vec![list(vec![g, args[0].clone()])]),
        Value::cons(cl(interp, "COND"), list(clauses)),
    ]))
}

// ============================================================================
// Iteration
// ============================================================================

/// `(DOTIMES (var count [result]) . body)`
fn expand_dotimes(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DOTIMES", &rest_of(form), 1, None)?;
    let spec = check_args("DOTIMES", &args[0], 2, Some(3))?;
    let var = symbol_arg(interp, "DOTIMES", form, &spec[0])?;
    let var = Value::Symbol(var);
    let limit = Value::Symbol(interp.gensym("LIMIT-"));
    let top = Value::Symbol(interp.gensym("TOP-"));
    let end = Value::Symbol(interp.gensym("END-"));
    let (decls, body) = split_declarations(interp, &args[1..]);

    let mut tagbody = vec![
        cl(interp, "TAGBODY"),
        top.clone(),
        list(vec![
            cl(interp, "IF"),
            list(vec![cl(interp, ">="), var.clone(), limit.clone()]),
            list(vec![cl(interp, "GO"), end.clone()]),
        ]),
    ];
    tagbody.extend(body);
    tagbody.push(list(vec![
        cl(interp, "SETQ"),
        var.clone(),
        list(vec![cl(interp, "1+"), var.clone()]),
    ]));
    tagbody.push(list(vec![cl(interp, "GO"), top]));
    tagbody.push(end);

    let mut let_form = vec![
        cl(interp, "LET"),
        list(vec![
            list(vec![limit, spec[1].clone()]),
            list(vec![var, Value::Fixnum(0)]),
        ]),
    ];
    let_form.extend(decls);
    let_form.push(list(tagbody));
    let_form.push(spec.get(2).cloned().unwrap_or(Value::Nil));
    Ok(list(vec![cl(interp, "BLOCK"), Value::Nil, list(let_form)]))
}

/// `(DOLIST (var list [result]) . body)`
fn expand_dolist(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DOLIST", &rest_of(form), 1, None)?;
    let spec = check_args("DOLIST", &args[0], 2, Some(3))?;
    let var = Value::Symbol(symbol_arg(interp, "DOLIST", form, &spec[0])?);
    let tail = Value::Symbol(interp.gensym("TAIL-"));
    let top = Value::Symbol(interp.gensym("TOP-"));
    let end = Value::Symbol(interp.gensym("END-"));
    let (decls, body) = split_declarations(interp, &args[1..]);

    let mut tagbody = vec![
        cl(interp, "TAGBODY"),
        top.clone(),
        list(vec![
            cl(interp, "IF"),
            list(vec![cl(interp, "ATOM"), tail.clone()]),
            list(vec![cl(interp, "GO"), end.clone()]),
        ]),
        list(vec![
            cl(interp, "SETQ"),
            var.clone(),
            list(vec![cl(interp, "CAR"), tail.clone()]),
        ]),
    ];
    tagbody.extend(body);
    tagbody.push(list(vec![
        cl(interp, "SETQ"),
        tail.clone(),
        list(vec![cl(interp, "CDR"), tail.clone()]),
    ]));
    tagbody.push(list(vec![cl(interp, "GO"), top]));
    tagbody.push(end);

    let mut let_form = vec![
        cl(interp, "LET"),
        list(vec![list(vec![tail, spec[1].clone()]), list(vec![var.clone(), Value::Nil])]),
    ];
    let_form.extend(decls);
    let_form.push(list(tagbody));
    let_form.push(list(vec![cl(interp, "SETQ"), var, Value::Nil]));
    let_form.push(spec.get(2).cloned().unwrap_or(Value::Nil));
    Ok(list(vec![cl(interp, "BLOCK"), Value::Nil, list(let_form)]))
}

/// `(PSETQ var form ...)`: every form is evaluated before any assignment.
fn expand_psetq(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("PSETQ", &rest_of(form), 0, None)?;
    if args.len() % 2 != 0 {
        return Err(malformed("PSETQ", form).into());
    }
    let mut bindings = Vec::new();
    let mut body = Vec::new();
    for pair in args.chunks(2) {
        let var = symbol_arg(interp, "PSETQ", form, &pair[0])?;
        let temp = Value::Symbol(interp.gensym("NEW-"));
        bindings.push(list(vec![temp.clone(), pair[1].clone()]));
        body.push(list(vec![cl(interp, "SETQ"), Value::Symbol(var), temp]));
    }
    let mut out = vec![cl(interp, "LET"), list(bindings)];
    out.extend(body);
    out.push(Value::Nil);
    Ok(list(out))
}

/// `(DO ((var init [step])*) (end-test result*) . body)`
fn expand_do(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("DO", &rest_of(form), 2, None)?;
    let mut bindings = Vec::new();
    let mut steps = vec![cl(interp, "PSETQ")];
    for spec in interp.form_list(&args[0])? {
        let parts = match &spec {
            Value::Symbol(_) => vec![spec.clone()],
            _ => check_args("DO", &spec, 1, Some(3))?,
        };
        let var = Value::Symbol(symbol_arg(interp, "DO", form, &parts[0])?);
        bindings.push(list(vec![var.clone(), parts.get(1).cloned().unwrap_or(Value::Nil)]));
        if let Some(step) = parts.get(2) {
            steps.push(var);
            steps.push(step.clone());
        }
    }
    let end_clause = check_args("DO", &args[1], 1, None)?;
    let top = Value::Symbol(interp.gensym("TOP-"));
    let end = Value::Symbol(interp.gensym("END-"));
    let (decls, body) = split_declarations(interp, &args[2..]);

    let mut tagbody = vec![
        cl(interp, "TAGBODY"),
        top.clone(),
        list(vec![
            cl(interp, "IF"),
            end_clause[0].clone(),
            list(vec![cl(interp, "GO"), end.clone()]),
        ]),
    ];
    tagbody.extend(body);
    tagbody.push(list(steps));
    tagbody.push(list(vec![cl(interp, "GO"), top]));
    tagbody.push(end);

    let mut let_form = vec![cl(interp, "LET"), list(bindings)];
    let_form.extend(decls);
    let_form.push(list(tagbody));
    let_form.push(Value::cons(cl(interp, "PROGN"), list(end_clause[1..].to_vec())));
    Ok(list(vec![cl(interp, "BLOCK"), Value::Nil, list(let_form)]))
}

/// Simple LOOP: `(LOOP form*)` repeats until a RETURN.
fn expand_loop(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let body = check_args("LOOP", &rest_of(form), 0, None)?;
    if let Some(keyword) = body.iter().find(|f| !f.is_cons()) {
        return Err(Condition::program_error(format!(
            "Extended LOOP syntax is not supported: {}",
            interp.prin1(keyword)
        ))
        .with_datum(form.clone())
        .into());
    }
    let top = Value::Symbol(interp.gensym("LOOP-"));
    let mut tagbody = vec![cl(interp, "TAGBODY"), top.clone()];
    tagbody.extend(body);
    tagbody.push(list(vec![cl(interp, "GO"), top]));
    Ok(list(vec![cl(interp, "BLOCK"), Value::Nil, list(tagbody)]))
}

// ============================================================================
// Places
// ============================================================================

/// Expansion storing `value` into `place`.
fn setf_expansion(interp: &mut Interpreter, place: &Value, value: Value, env: &Environment) -> EvalResult {
    let head = match place {
        Value::Symbol(_) => return Ok(list(vec![cl(interp, "SETQ"), place.clone(), value])),
        Value::Cons(c) => c.car(),
        _ => return Err(Condition::program_error(format!("Invalid SETF place: {}", place)).into()),
    };
    let args = interp.form_list(&rest_of(place))?;
    let name = match &head {
        Value::Symbol(s) if s.package().is_some_and(|p| p.name() == "COMMON-LISP") => s.name().to_string(),
        _ => String::new(),
    };
    let arg = |i: usize| args.get(i).cloned().unwrap_or(Value::Nil);
    let expansion = match (name.as_str(), args.len()) {
        ("CAR" | "FIRST", 1) => list(vec![sys(interp, "%SET-CAR"), arg(0), value]),
        ("CDR" | "REST", 1) => list(vec![sys(interp, "%SET-CDR"), arg(0), value]),
        ("SECOND", 1) => list(vec![
            sys(interp, "%SET-CAR"),
            list(vec![cl(interp, "CDR"), arg(0)]),
            value,
        ]),
        ("NTH", 2) => list(vec![
            sys(interp, "%SET-CAR"),
            list(vec![cl(interp, "NTHCDR"), arg(0), arg(1)]),
            value,
        ]),
        ("SYMBOL-VALUE", 1) => list(vec![cl(interp, "SET"), arg(0), value]),
        ("SYMBOL-FUNCTION", 1) => list(vec![sys(interp, "%SET-SYMBOL-FUNCTION"), arg(0), value]),
        ("SYMBOL-PLIST", 1) => list(vec![sys(interp, "%SET-SYMBOL-PLIST"), arg(0), value]),
        ("MACRO-FUNCTION", 1) => list(vec![sys(interp, "%SET-MACRO-FUNCTION"), arg(0), value]),
        ("READTABLE-CASE", 1) => list(vec![sys(interp, "%SET-READTABLE-CASE"), arg(0), value]),
        ("GET", 2 | 3) => list(vec![sys(interp, "%PUT"), arg(0), arg(1), value]),
        ("SVREF" | "AREF", n) if n >= 2 => {
            let mut call = vec![sys(interp, "%SET-AREF")];
            call.extend(args.iter().cloned());
            call.push(value);
            list(call)
        }
        _ => {
            let (expanded, changed) = interp.macroexpand_1(place, env)?;
            if !changed {
                return Err(Condition::undefined_function(list(vec![cl(interp, "SETF"), head.clone()]))
                    .with_datum(place.clone())
                    .into());
            }
            return setf_expansion(interp, &expanded, value, env);
        }
    };
    Ok(expansion)
}

fn expand_setf(interp: &mut Interpreter, form: &Value, env: &Environment) -> EvalResult {
    let args = check_args("SETF", &rest_of(form), 0, None)?;
    if args.len() % 2 != 0 {
        return Err(malformed("SETF", form).into());
    }
    match args.len() {
        0 => Ok(Value::Nil),
        2 => setf_expansion(interp, &args[0], args[1].clone(), env),
        _ => {
            let mut body = vec![cl(interp, "PROGN")];
            for pair in args.chunks(2) {
                body.push(setf_expansion(interp, &pair[0], pair[1].clone(), env)?);
            }
            Ok(list(body))
        }
    }
}

/// `(PUSH item place)`
fn expand_push(interp: &mut Interpreter, form: &Value, env: &Environment) -> EvalResult {
    let args = check_args("PUSH", &rest_of(form), 2, Some(2))?;
    let value = list(vec![cl(interp, "CONS"), args[0].clone(), args[1].clone()]);
    setf_expansion(interp, &args[1], value, env)
}

/// `(POP place)`
fn expand_pop(interp: &mut Interpreter, form: &Value, env: &Environment) -> EvalResult {
    let args = check_args("POP", &rest_of(form), 1, Some(1))?;
    let store = setf_expansion(interp, &args[0], list(vec![cl(interp, "CDR"), args[0].clone()]), env)?;
    Ok(list(vec![
        cl(interp, "PROG1"),
        list(vec![cl(interp, "CAR"), args[0].clone()]),
        store,
    ]))
}

fn expand_increment(interp: &mut Interpreter, form: &Value, env: &Environment, operator: &str) -> EvalResult {
    let args = check_args(operator, &rest_of(form), 1, Some(2))?;
    let delta = args.get(1).cloned().unwrap_or(Value::Fixnum(1));
    let op = if operator == "INCF" { "+" } else { "-" };
    let value = list(vec![cl(interp, op), args[0].clone(), delta]);
    setf_expansion(interp, &args[0], value, env)
}

fn expand_incf(interp: &mut Interpreter, form: &Value, env: &Environment) -> EvalResult {
    expand_increment(interp, form, env, "INCF")
}

fn expand_decf(interp: &mut Interpreter, form: &Value, env: &Environment) -> EvalResult {
    expand_increment(interp, form, env, "DECF")
}

// ============================================================================
// Backquote
// ============================================================================

#[derive(Clone, Copy, PartialEq, Eq)]
enum Marker {
    Comma,
    CommaAt,
    CommaDot,
    Backquote,
}

/// `(marker x)` forms produced by the reader's backquote syntax.
fn marker(interp: &Interpreter, v: &Value) -> Option<(Marker, Value)> {
    let Value::Cons(c) = v else { return None };
    let Value::Symbol(head) = c.car() else { return None };
    let s = interp.symbols();
    let kind = if head == s.comma {
        Marker::Comma
    } else if head == s.comma_at {
        Marker::CommaAt
    } else if head == s.comma_dot {
        Marker::CommaDot
    } else if head == s.backquote {
        Marker::Backquote
    } else {
        return None;
    };
    let rest = c.cdr();
    match rest.list_to_vec().as_deref() {
        Some([arg]) => Some((kind, arg.clone())),
        _ => None,
    }
}

fn marker_symbol(interp: &Interpreter, kind: Marker) -> Value {
    let s = interp.symbols();
    Value::Symbol(match kind {
        Marker::Comma => s.comma.clone(),
        Marker::CommaAt => s.comma_at.clone(),
        Marker::CommaDot => s.comma_dot.clone(),
        Marker::Backquote => s.backquote.clone(),
    })
}

fn contains_unquote(interp: &Interpreter, v: &Value) -> bool {
    match v {
        Value::Cons(_) => {
            if matches!(marker(interp, v), Some((k, _)) if k != Marker::Backquote) {
                return true;
            }
            let mut current = v.clone();
            while let Value::Cons(c) = current {
                if contains_unquote(interp, &c.car()) {
                    return true;
                }
                current = c.cdr();
                if marker(interp, &current).is_some() {
                    return true;
                }
            }
            false
        }
        Value::Vector(items) => crate::types::read_lock(items).iter().any(|i| contains_unquote(interp, i)),
        _ => false,
    }
}

/// Code that builds `template` at run time. `depth` counts enclosing
/// backquotes beyond the one being expanded.
fn backquote_form(interp: &Interpreter, template: &Value, depth: usize) -> EvalResult {
    if !contains_unquote(interp, template) {
        return Ok(match template {
            Value::Symbol(_) | Value::Cons(_) | Value::Vector(_) => quoted(interp, template.clone()),
            other => other.clone(),
        });
    }
    if let Value::Vector(items) = template {
        let items = crate::types::read_lock(items).clone();
        let as_list = backquote_form(interp, &list(items), depth)?;
        return Ok(list(vec![sys(interp, "%LIST-TO-VECTOR"), as_list]));
    }
    if let Some((kind, arg)) = marker(interp, template) {
        return match (kind, depth) {
            (Marker::Comma, 0) => Ok(arg),
            (Marker::CommaAt | Marker::CommaDot, 0) => Err(Condition::reader_error(format!(
                "{} appears outside a list in a backquote template",
                interp.prin1(template)
            ))
            .into()),
            (Marker::Backquote, _) => Ok(list(vec![
                cl(interp, "LIST"),
                quoted(interp, marker_symbol(interp, kind)),
                backquote_form(interp, &arg, depth + 1)?,
            ])),
            (_, _) => Ok(list(vec![
                cl(interp, "LIST"),
                quoted(interp, marker_symbol(interp, kind)),
                backquote_form(interp, &arg, depth - 1)?,
            ])),
        };
    }

    let mut segments = vec![cl(interp, "APPEND")];
    let mut current = template.clone();
    loop {
        match &current {
            Value::Nil => break,
            Value::Cons(c) => {
                if marker(interp, &current).is_some() {
                    // `(a . ,b)` reads as (a SYS::|,| b)
                    segments.push(backquote_form(interp, &current, depth)?);
                    break;
                }
                let element = c.car();
                match marker(interp, &element) {
                    Some((Marker::CommaAt | Marker::CommaDot, arg)) if depth == 0 => segments.push(arg),
                    _ => segments.push(list(vec![cl(interp, "LIST"), backquote_form(interp, &element, depth)?])),
                }
                current = c.cdr();
            }
            atom => {
                segments.push(quoted(interp, atom.clone()));
                break;
            }
        }
    }
    Ok(list(segments))
}

fn expand_backquote(interp: &mut Interpreter, form: &Value, _env: &Environment) -> EvalResult {
    let args = check_args("BACKQUOTE", &rest_of(form), 1, Some(1))?;
    backquote_form(interp, &args[0], 0)
}

// ============================================================================
// Registration
// ============================================================================

pub fn install(runtime: &Runtime) {
    let packages = runtime.packages();
    let macros: [(&str, ExpanderFn); 26] = [
        ("DEFUN", expand_defun),
        ("DEFMACRO", expand_defmacro),
        ("DEFVAR", expand_defvar),
        ("DEFPARAMETER", expand_defparameter),
        ("DEFCONSTANT", expand_defconstant),
        ("DECLAIM", expand_declaim),
        ("IN-PACKAGE", expand_in_package),
        ("LAMBDA", expand_lambda),
        ("PROG1", expand_prog1),
        ("PROG2", expand_prog2),
        ("MULTIPLE-VALUE-BIND", expand_multiple_value_bind),
        ("MULTIPLE-VALUE-LIST", expand_multiple_value_list),
        ("NTH-VALUE", expand_nth_value),
        ("CASE", expand_case),
        ("ECASE", expand_ecase),
        ("DOTIMES", expand_dotimes),
        ("DOLIST", expand_dolist),
        ("LOOP", expand_loop),
        ("SETF", expand_setf),
        ("PUSH", expand_push),
        ("POP", expand_pop),
        ("INCF", expand_incf),
        ("DECF", expand_decf),
        ("PSETQ", expand_psetq),
        ("DO", expand_do),
        ("BACKQUOTE", expand_backquote),
    ];
    for (name, expander) in macros {
        let sym = if name == "BACKQUOTE" {
            runtime.symbols().backquote.clone()
        } else {
            packages.intern_cl(name)
        };
        runtime.define_macro(&sym, expander);
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
    fn test_defun_and_defmacro() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(defun square (x) (* x x))"), "SQUARE");
        assert_eq!(eval_print(&mut interp, "(square 7)"), "49");
        interp.eval_string("(defmacro swap-args (f a b) (list f b a))").unwrap();
        assert_eq!(eval_print(&mut interp, "(swap-args - 1 10)"), "9");
    }

    #[test]
    fn test_defun_establishes_block() {
        let mut interp = setup();
        interp.eval_string("(defun early (x) (if x (return-from early 1)) 2)").unwrap();
        assert_eq!(eval_print(&mut interp, "(list (early t) (early nil))"), "(1 2)");
    }

    #[test]
    fn test_definition_names_must_be_symbols() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(defun 5 () 1)"), ErrorKind::TypeError);
        assert_eq!(eval_error(&mut interp, "(defmacro \"m\" () 1)"), ErrorKind::TypeError);
        assert_eq!(eval_error(&mut interp, "(defun f)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_defvar_does_not_reassign() {
        let mut interp = setup();
        interp.eval_string("(defvar *v* 1) (defvar *v* 2)").unwrap();
        assert_eq!(eval_print(&mut interp, "*v*"), "1");
        interp.eval_string("(defparameter *v* 3)").unwrap();
        assert_eq!(eval_print(&mut interp, "*v*"), "3");
    }

    #[test]
    fn test_defconstant() {
        let mut interp = setup();
        interp.eval_string("(defconstant +limit+ 10)").unwrap();
        assert_eq!(eval_print(&mut interp, "+limit+"), "10");
        assert_eq!(eval_error(&mut interp, "(setq +limit+ 11)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_case_and_ecase() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(case 2 (1 'one) ((2 3) 'few) (t 'many))"), "FEW");
        assert_eq!(eval_print(&mut interp, "(case 9 (1 'one) (otherwise 'other))"), "OTHER");
        assert_eq!(eval_print(&mut interp, "(case 9 (1 'one))"), "NIL");
        assert_eq!(eval_print(&mut interp, "(ecase 'b (a 1) (b 2))"), "2");
        assert_eq!(eval_error(&mut interp, "(ecase 'z (a 1) (b 2))"), ErrorKind::TypeError);
    }

    #[test]
    fn test_iteration() {
        let mut interp = setup();
        assert_eq!(
            eval_print(&mut interp, "(let ((acc nil)) (dotimes (i 4 acc) (push i acc)))"),
            "(3 2 1 0)"
        );
        assert_eq!(
            eval_print(&mut interp, "(let ((sum 0)) (dolist (x '(1 2 3) sum) (incf sum x)))"),
            "6"
        );
        assert_eq!(
            eval_print(&mut interp, "(do ((i 0 (1+ i)) (acc nil (cons i acc))) ((= i 3) acc))"),
            "(2 1 0)"
        );
        assert_eq!(
            eval_print(&mut interp, "(let ((n 0)) (loop (incf n) (when (> n 4) (return n))))"),
            "5"
        );
        assert_eq!(eval_print(&mut interp, "(dolist (x '(1 2 3)) (if (= x 2) (return x)))"), "2");
    }

    #[test]
    fn test_extended_loop_is_rejected() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(loop for x in '(1 2) collect x)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_setf_places() {
        let mut interp = setup();
        interp.eval_string("(defvar *cell* (list 1 2 3))").unwrap();
        interp.eval_string("(setf (car *cell*) 10 (second *cell*) 20)").unwrap();
        interp.eval_string("(setf (cdr (cdr *cell*)) nil)").unwrap();
        assert_eq!(eval_print(&mut interp, "*cell*"), "(10 20)");
        interp.eval_string("(setf (get 'thing 'color) 'red)").unwrap();
        assert_eq!(eval_print(&mut interp, "(get 'thing 'color)"), "RED");
        assert_eq!(eval_print(&mut interp, "(let ((x 1)) (incf x 5) (decf x) x)"), "5");
        assert_eq!(eval_print(&mut interp, "(let ((s '(a b))) (list (pop s) s))"), "(A (B))");
    }

    #[test]
    fn test_psetq_swaps() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(let ((a 1) (b 2)) (psetq a b b a) (list a b))"), "(2 1)");
    }

    #[test]
    fn test_multiple_value_macros() {
        let mut interp = setup();
        assert_eq!(
            eval_print(&mut interp, "(multiple-value-bind (a b c) (values 1 2) (list a b c))"),
            "(1 2 NIL)"
        );
        assert_eq!(eval_print(&mut interp, "(multiple-value-list (values 1 2 3))"), "(1 2 3)");
        assert_eq!(eval_print(&mut interp, "(nth-value 1 (values 'a 'b))"), "B");
        assert_eq!(eval_print(&mut interp, "(prog1 1 2 3)"), "1");
        assert_eq!(eval_print(&mut interp, "(prog2 1 2 3)"), "2");
    }

    #[test]
    fn test_backquote() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(let ((x 1) (ys '(2 3))) `(a ,x ,@ys z))"), "(A 1 2 3 Z)");
        assert_eq!(eval_print(&mut interp, "(let ((b 2)) `(a . ,b))"), "(A . 2)");
        assert_eq!(eval_print(&mut interp, "`(1 (2 ,(+ 1 2)))"), "(1 (2 3))");
        assert_eq!(eval_print(&mut interp, "`plain"), "PLAIN");
        assert_eq!(eval_print(&mut interp, "(let ((x 5)) `#(1 ,x))"), "#(1 5)");
    }

    #[test]
    fn test_macro_using_backquote() {
        let mut interp = setup();
        interp
            .eval_string("(defmacro my-unless (test &body body) `(if ,test nil (progn ,@body)))")
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(my-unless nil 1 2)"), "2");
        assert_eq!(eval_print(&mut interp, "(my-unless t 1 2)"), "NIL");
    }

    #[test]
    fn test_in_package_switches() {
        let mut interp = setup();
        interp.eval_string("(make-package \"SCRATCH\" :use '(\"COMMON-LISP\"))").unwrap();
        let source = "(in-package \"SCRATCH\") (defvar here (package-name *package*)) here";
        assert_eq!(eval_print(&mut interp, source), "\"SCRATCH\"");
    }
}
