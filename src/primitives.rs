// clcore Primitives - Built-in Functions
//
// Implements the native functions installed in COMMON-LISP, plus the
// %-prefixed SYSTEM helpers that the built-in macros expand into.

use std::io::Write;
use std::sync::Arc;

use crate::conditions::Condition;
use crate::context::Runtime;
use crate::environment::Environment;
use crate::eval::{ControlSignal, EvalResult, Interpreter};
use crate::function::{Arity, Expander, Function, Macro};
use crate::numbers;
use crate::reader::Reader;
use crate::readtable::{DispatchFunction, MacroFunction, Readtable, ReadtableCase};
use crate::streams::Stream;
use crate::symbol::{Accessibility, Package, Symbol};
use crate::types::{eq, eql, equal, read_lock, symbol_value_of, write_lock, Value};

fn type_error(v: &Value, expected: &str) -> ControlSignal {
    Condition::type_error(v.clone(), expected).into()
}

fn symbol_arg(interp: &Interpreter, v: &Value) -> Result<Symbol, ControlSignal> {
    interp.require_symbol(v)
}

fn list_arg(v: &Value) -> Result<Vec<Value>, ControlSignal> {
    v.list_to_vec().ok_or_else(|| type_error(v, "LIST"))
}

fn index_arg(v: &Value) -> Result<usize, ControlSignal> {
    numbers::as_index(v).ok_or_else(|| type_error(v, "(INTEGER 0)"))
}

fn char_arg(v: &Value) -> Result<char, ControlSignal> {
    match v {
        Value::Char(c) => Ok(*c),
        other => Err(type_error(other, "CHARACTER")),
    }
}

fn string_arg(v: &Value) -> Result<Arc<str>, ControlSignal> {
    match v {
        Value::String(s) => Ok(Arc::clone(s)),
        other => Err(type_error(other, "STRING")),
    }
}

/// Name of a string designator: a string, symbol or character.
fn string_designator(v: &Value) -> Result<String, ControlSignal> {
    match v {
        Value::String(s) => Ok(s.to_string()),
        Value::Symbol(s) => Ok(s.name().to_string()),
        Value::Nil => Ok("NIL".to_string()),
        Value::Char(c) => Ok(c.to_string()),
        other => Err(type_error(other, "(OR STRING SYMBOL CHARACTER)")),
    }
}

fn optional(args: &[Value], index: usize) -> Option<&Value> {
    args.get(index)
}

/// Value of keyword argument `name` in a `key value ...` tail.
fn keyword_arg(args: &[Value], name: &str) -> Result<Option<Value>, ControlSignal> {
    if args.len() % 2 != 0 {
        return Err(Condition::program_error("Odd number of keyword arguments")
            .with_operands(args.to_vec())
            .into());
    }
    for pair in args.chunks(2) {
        match &pair[0] {
            Value::Symbol(s) if s.is_keyword() => {
                if s.name() == name {
                    return Ok(Some(pair[1].clone()));
                }
            }
            other => return Err(type_error(other, "KEYWORD")),
        }
    }
    Ok(None)
}

fn package_designator(interp: &Interpreter, v: &Value) -> Result<Arc<Package>, ControlSignal> {
    if let Value::Package(p) = v {
        return Ok(Arc::clone(p));
    }
    let name = string_designator(v)?;
    interp
        .runtime()
        .packages()
        .find_package(&name)
        .ok_or_else(|| {
            Condition::package_error(format!("Package {} does not exist.", name))
                .with_datum(v.clone())
                .into()
        })
}

fn optional_package(interp: &Interpreter, v: Option<&Value>) -> Result<Arc<Package>, ControlSignal> {
    match v {
        Some(v) => package_designator(interp, v),
        None => Ok(interp.current_package()),
    }
}

/// Input stream designator: absent, NIL or T mean *STANDARD-INPUT*.
fn input_stream(interp: &Interpreter, v: Option<&Value>) -> Result<Arc<Stream>, ControlSignal> {
    match v {
        Some(Value::Stream(s)) => Ok(Arc::clone(s)),
        None | Some(Value::Nil) => interp.standard_input().ok_or_else(|| {
            Condition::stream_error("*STANDARD-INPUT* is not a stream").into()
        }),
        Some(Value::Symbol(s)) if *s == interp.symbols().t => interp.standard_input().ok_or_else(|| {
            Condition::stream_error("*STANDARD-INPUT* is not a stream").into()
        }),
        Some(other) => Err(type_error(other, "STREAM")),
    }
}

/// Readtable designator: absent means *READTABLE*, NIL the standard one.
fn readtable_arg(interp: &Interpreter, v: Option<&Value>) -> Result<Arc<Readtable>, ControlSignal> {
    match v {
        None => Ok(interp.current_readtable()),
        Some(Value::Nil) => Ok(interp.runtime().standard_readtable()),
        Some(Value::Readtable(rt)) => Ok(Arc::clone(rt)),
        Some(other) => Err(type_error(other, "READTABLE")),
    }
}

fn symbol_datum(interp: &Interpreter, sym: Symbol) -> Value {
    symbol_value_of(interp.runtime(), sym)
}

/// Call a :TEST function, defaulting to EQL.
fn test_match(interp: &mut Interpreter, test: &Option<Value>, a: &Value, b: &Value) -> Result<bool, ControlSignal> {
    match test {
        None => Ok(eql(a, b)),
        Some(f) => Ok(interp.funcall(f, &[a.clone(), b.clone()])?.is_true()),
    }
}

fn write_out(text: &str) -> Result<(), ControlSignal> {
    let mut out = std::io::stdout().lock();
    out.write_all(text.as_bytes())
        .and_then(|_| out.flush())
        .map_err(|e| Condition::stream_error(format!("standard-output: {}", e)).into())
}

// ============================================================================
// Lists
// ============================================================================

fn prim_cons(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn prim_car(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    args[0].car().ok_or_else(|| type_error(&args[0], "LIST"))
}

fn prim_cdr(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    args[0].cdr().ok_or_else(|| type_error(&args[0], "LIST"))
}

fn nthcdr(n: usize, list: &Value) -> EvalResult {
    let mut current = list.clone();
    for _ in 0..n {
        current = match &current {
            Value::Nil => return Ok(Value::Nil),
            Value::Cons(c) => c.cdr(),
            other => return Err(type_error(other, "LIST")),
        };
    }
    Ok(current)
}

fn nth(n: usize, list: &Value) -> EvalResult {
    let tail = nthcdr(n, list)?;
    tail.car().ok_or_else(|| type_error(&tail, "LIST"))
}

fn prim_second(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    nth(1, &args[0])
}

fn prim_third(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    nth(2, &args[0])
}

fn prim_nth(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    nth(index_arg(&args[0])?, &args[1])
}

fn prim_nthcdr(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    nthcdr(index_arg(&args[0])?, &args[1])
}

fn prim_rplaca(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let cell = args[0].as_cons().ok_or_else(|| type_error(&args[0], "CONS"))?;
    cell.set_car(args[1].clone());
    Ok(args[0].clone())
}

fn prim_rplacd(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let cell = args[0].as_cons().ok_or_else(|| type_error(&args[0], "CONS"))?;
    cell.set_cdr(args[1].clone());
    Ok(args[0].clone())
}

fn prim_list(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::list(args.to_vec()))
}

fn prim_list_star(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::Nil);
    };
    Ok(Value::list_with_tail(init.to_vec(), last.clone()))
}

/// APPEND copies every list but the last, which becomes the shared tail.
fn prim_append(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::Nil);
    };
    let mut items = Vec::new();
    for list in init {
        items.extend(list_arg(list)?);
    }
    Ok(Value::list_with_tail(items, last.clone()))
}

fn prim_reverse(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::String(s) => Ok(Value::string(s.chars().rev().collect::<String>())),
        Value::Vector(items) => {
            let mut items = read_lock(items).clone();
            items.reverse();
            Ok(Value::vector(items))
        }
        list => {
            let mut items = list_arg(list)?;
            items.reverse();
            Ok(Value::list(items))
        }
    }
}

fn prim_length(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let n = match &args[0] {
        Value::Nil => 0,
        Value::Cons(_) => args[0]
            .list_length()
            .ok_or_else(|| type_error(&args[0], "PROPER-LIST"))?,
        Value::String(s) => s.chars().count(),
        Value::Vector(items) => read_lock(items).len(),
        Value::BitVector(bits) => bits.len(),
        other => return Err(type_error(other, "SEQUENCE")),
    };
    Ok(Value::Fixnum(n as i64))
}

/// `(MEMBER item list &key test)`
fn prim_member(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let test = keyword_arg(&args[2..], "TEST")?;
    let mut current = args[1].clone();
    loop {
        match &current {
            Value::Cons(c) => {
                if test_match(interp, &test, &args[0], &c.car())? {
                    return Ok(current.clone());
                }
                current = c.cdr();
            }
            Value::Nil => return Ok(Value::Nil),
            other => return Err(type_error(other, "LIST")),
        }
    }
}

/// `(ASSOC item alist &key test)`
fn prim_assoc(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let test = keyword_arg(&args[2..], "TEST")?;
    for entry in list_arg(&args[1])? {
        match &entry {
            Value::Nil => continue,
            Value::Cons(c) => {
                if test_match(interp, &test, &args[0], &c.car())? {
                    return Ok(entry.clone());
                }
            }
            other => return Err(type_error(other, "CONS")),
        }
    }
    Ok(Value::Nil)
}

fn prim_last(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let mut current = args[0].clone();
    loop {
        match &current {
            Value::Cons(c) if c.cdr().is_cons() => current = c.cdr(),
            Value::Cons(_) | Value::Nil => return Ok(current),
            other => return Err(type_error(other, "LIST")),
        }
    }
}

/// `(MAPCAR function list &rest lists)`: stops at the shortest list.
fn prim_mapcar(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let function = interp.designated_function(&args[0])?;
    let lists = args[1..].iter().map(list_arg).collect::<Result<Vec<_>, _>>()?;
    let n = lists.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        let call_args: Vec<Value> = lists.iter().map(|l| l[i].clone()).collect();
        out.push(interp.apply_function(&function, &call_args)?);
    }
    Ok(Value::list(out))
}

/// `(APPLY function arg* list)`
fn prim_apply(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let (spread, init) = args[1..]
        .split_last()
        .ok_or_else(|| Condition::program_error("APPLY needs an argument list"))?;
    let mut call_args = init.to_vec();
    call_args.extend(list_arg(spread)?);
    interp.funcall(&args[0], &call_args)
}

fn prim_funcall(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    interp.funcall(&args[0], &args[1..])
}

// ============================================================================
// Predicates and equality
// ============================================================================

fn prim_null(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(args[0].is_nil()))
}

fn prim_atom(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(!args[0].is_cons()))
}

fn prim_consp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(args[0].is_cons()))
}

fn prim_listp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(args[0].is_list()))
}

fn prim_symbolp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(args[0], Value::Symbol(_) | Value::Nil)))
}

fn prim_keywordp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(&args[0], Value::Symbol(s) if s.is_keyword())))
}

fn prim_numberp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(args[0].is_number()))
}

fn prim_integerp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(numbers::is_integer(&args[0])))
}

fn prim_stringp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(args[0], Value::String(_))))
}

fn prim_characterp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(args[0], Value::Char(_))))
}

fn prim_functionp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(&args[0], Value::Function(f) if f.is_callable())))
}

fn prim_vectorp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let is_vector = match &args[0] {
        Value::Vector(_) | Value::String(_) | Value::BitVector(_) => true,
        Value::Array(a) => a.dimensions.len() == 1,
        _ => false,
    };
    Ok(interp.boolean(is_vector))
}

fn prim_eq(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(eq(&args[0], &args[1])))
}

fn prim_eql(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(eql(&args[0], &args[1])))
}

fn prim_equal(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(equal(&args[0], &args[1])))
}

// ============================================================================
// Numbers
// ============================================================================

fn prim_add(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let mut acc = Value::Fixnum(0);
    for arg in args {
        acc = numbers::add(&acc, arg)?;
    }
    Ok(acc)
}

fn prim_sub(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    match args {
        [only] => Ok(numbers::sub(&Value::Fixnum(0), only)?),
        [first, rest @ ..] => {
            let mut acc = first.clone();
            for arg in rest {
                acc = numbers::sub(&acc, arg)?;
            }
            Ok(acc)
        }
        [] => Ok(Value::Fixnum(0)),
    }
}

fn prim_mul(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let mut acc = Value::Fixnum(1);
    for arg in args {
        acc = numbers::mul(&acc, arg)?;
    }
    Ok(acc)
}

fn prim_div(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    match args {
        [only] => Ok(numbers::div(&Value::Fixnum(1), only)?),
        [first, rest @ ..] => {
            let mut acc = first.clone();
            for arg in rest {
                acc = numbers::div(&acc, arg)?;
            }
            Ok(acc)
        }
        [] => Ok(Value::Fixnum(1)),
    }
}

fn prim_1plus(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(numbers::add(&args[0], &Value::Fixnum(1))?)
}

fn prim_1minus(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(numbers::sub(&args[0], &Value::Fixnum(1))?)
}

fn prim_zerop(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(numbers::is_zero(&args[0])?))
}

/// Chain a comparison over adjacent arguments.
fn compare_chain(
    interp: &Interpreter,
    args: &[Value],
    holds: fn(std::cmp::Ordering) -> bool,
) -> EvalResult {
    if let [only] = args {
        numbers::compare(only, only)?;
    }
    for pair in args.windows(2) {
        if !holds(numbers::compare(&pair[0], &pair[1])?) {
            return Ok(Value::Nil);
        }
    }
    Ok(interp.t())
}

fn prim_num_eq(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    compare_chain(interp, args, |o| o.is_eq())
}

fn prim_lt(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    compare_chain(interp, args, |o| o.is_lt())
}

fn prim_gt(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    compare_chain(interp, args, |o| o.is_gt())
}

fn prim_le(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    compare_chain(interp, args, |o| o.is_le())
}

fn prim_ge(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    compare_chain(interp, args, |o| o.is_ge())
}

/// `/=` is true when no two arguments are equal.
fn prim_num_ne(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    for (i, a) in args.iter().enumerate() {
        for b in &args[i + 1..] {
            if numbers::num_eq(a, b)? {
                return Ok(Value::Nil);
            }
        }
    }
    if let [only] = args {
        numbers::compare(only, only)?;
    }
    Ok(interp.t())
}

// ============================================================================
// Symbols
// ============================================================================

fn prim_symbol_name(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(Value::string(sym.name()))
}

fn prim_symbol_package(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(sym.package().map_or(Value::Nil, Value::Package))
}

fn prim_symbol_value(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    interp
        .dynamic_value(&sym)
        .ok_or_else(|| Condition::unbound_variable(args[0].clone()).into())
}

fn prim_set(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if sym.is_constant() {
        return Err(Condition::program_error(format!("Cannot assign constant {}", sym))
            .with_datum(args[0].clone())
            .into());
    }
    interp.set_dynamic_value(&sym, args[1].clone());
    Ok(args[1].clone())
}

fn prim_boundp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(interp.boolean(interp.dynamic_value(&sym).is_some()))
}

fn prim_makunbound(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if sym.is_constant() {
        return Err(Condition::program_error(format!("Cannot make constant {} unbound", sym))
            .with_datum(args[0].clone())
            .into());
    }
    sym.make_unbound();
    Ok(args[0].clone())
}

fn prim_symbol_function(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    sym.function()
        .map(Value::Function)
        .ok_or_else(|| Condition::undefined_function(args[0].clone()).into())
}

fn prim_fboundp(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(interp.boolean(sym.function().is_some()))
}

fn prim_fmakunbound(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if matches!(sym.function(), Some(Function::SpecialOperator(_))) {
        return Err(Condition::program_error(format!("Cannot remove special operator {}", sym))
            .with_datum(args[0].clone())
            .into());
    }
    sym.set_function(None);
    Ok(args[0].clone())
}

fn plist_get(plist: &Value, indicator: &Value) -> Option<Value> {
    let mut current = plist.clone();
    while let Value::Cons(c) = current {
        let rest = c.cdr();
        if eq(&c.car(), indicator) {
            return rest.car();
        }
        current = rest.cdr()?;
    }
    None
}

fn prim_get(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    let default = optional(args, 2).cloned().unwrap_or(Value::Nil);
    Ok(plist_get(&sym.plist(), &args[1]).unwrap_or(default))
}

fn prim_symbol_plist(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(sym.plist())
}

fn prim_gensym(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let prefix = match optional(args, 0) {
        None => "G".to_string(),
        Some(v) => string_arg(v)?.to_string(),
    };
    Ok(Value::Symbol(interp.gensym(&prefix)))
}

fn prim_make_symbol(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let name = string_arg(&args[0])?;
    Ok(Value::Symbol(Symbol::uninterned(&name)))
}

fn prim_special_operator_p(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    Ok(interp.boolean(matches!(sym.function(), Some(Function::SpecialOperator(_)))))
}

/// `(MACRO-FUNCTION symbol &optional environment)`
fn prim_macro_function(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    let binding = match optional(args, 1) {
        Some(Value::Environment(env)) => interp.function_binding(&sym, env),
        _ => sym.function(),
    };
    match binding {
        Some(f @ Function::Macro(_)) => Ok(Value::Function(f)),
        _ => Ok(Value::Nil),
    }
}

// ============================================================================
// Packages
// ============================================================================

fn prim_find_package(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    if let Value::Package(_) = &args[0] {
        return Ok(args[0].clone());
    }
    let name = string_designator(&args[0])?;
    Ok(interp
        .runtime()
        .packages()
        .find_package(&name)
        .map_or(Value::Nil, Value::Package))
}

/// `(MAKE-PACKAGE name &key nicknames use)`
fn prim_make_package(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let name = string_designator(&args[0])?;
    let nicknames = match keyword_arg(&args[1..], "NICKNAMES")? {
        Some(list) => list_arg(&list)?
            .iter()
            .map(string_designator)
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let uses = match keyword_arg(&args[1..], "USE")? {
        Some(list) => list_arg(&list)?
            .iter()
            .map(|p| package_designator(interp, p))
            .collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    let nickname_refs: Vec<&str> = nicknames.iter().map(String::as_str).collect();
    let pkg = interp
        .runtime()
        .packages()
        .make_package(&name, &nickname_refs, &uses)?;
    Ok(Value::Package(pkg))
}

fn status_keyword(interp: &Interpreter, status: Option<Accessibility>) -> Value {
    let name = match status {
        None => return Value::Nil,
        Some(Accessibility::Internal) => "INTERNAL",
        Some(Accessibility::External) => "EXTERNAL",
        Some(Accessibility::Inherited) => "INHERITED",
    };
    Value::Symbol(interp.runtime().packages().intern_keyword(name))
}

/// `(INTERN name &optional package)`: the symbol and its prior status.
fn prim_intern(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let name = string_arg(&args[0])?;
    let pkg = optional_package(interp, optional(args, 1))?;
    let (sym, status) = pkg.intern(&name);
    let values = vec![symbol_datum(interp, sym), status_keyword(interp, status)];
    Ok(interp.set_values(values))
}

fn prim_find_symbol(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let name = string_arg(&args[0])?;
    let pkg = optional_package(interp, optional(args, 1))?;
    let values = match pkg.find_symbol(&name) {
        Some((sym, status)) => vec![symbol_datum(interp, sym), status_keyword(interp, Some(status))],
        None => vec![Value::Nil, Value::Nil],
    };
    Ok(interp.set_values(values))
}

/// A symbol or a list of symbols.
fn symbol_list(interp: &Interpreter, v: &Value) -> Result<Vec<Symbol>, ControlSignal> {
    match v {
        Value::Cons(_) => list_arg(v)?.iter().map(|s| symbol_arg(interp, s)).collect(),
        _ => Ok(vec![symbol_arg(interp, v)?]),
    }
}

fn prim_export(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let pkg = optional_package(interp, optional(args, 1))?;
    for sym in symbol_list(interp, &args[0])? {
        pkg.export(&sym);
    }
    Ok(interp.t())
}

fn prim_import(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let pkg = optional_package(interp, optional(args, 1))?;
    for sym in symbol_list(interp, &args[0])? {
        pkg.import(&sym)?;
    }
    Ok(interp.t())
}

fn prim_use_package(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let pkg = optional_package(interp, optional(args, 1))?;
    let used = match &args[0] {
        Value::Cons(_) => list_arg(&args[0])?,
        other => vec![other.clone()],
    };
    for designator in used {
        pkg.use_package(&package_designator(interp, &designator)?);
    }
    Ok(interp.t())
}

fn prim_package_name(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let pkg = package_designator(interp, &args[0])?;
    Ok(Value::string(pkg.name()))
}

fn prim_list_all_packages(interp: &mut Interpreter, _args: &[Value]) -> EvalResult {
    let packages = interp.runtime().packages().list_all_packages();
    Ok(Value::list(packages.into_iter().map(Value::Package).collect::<Vec<_>>()))
}

// ============================================================================
// Evaluation and values
// ============================================================================

fn prim_eval(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    interp.eval(&args[0], &Environment::new())
}

fn environment_arg(v: Option<&Value>) -> Environment {
    match v {
        Some(Value::Environment(env)) => env.clone(),
        _ => Environment::new(),
    }
}

fn prim_macroexpand_1(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let env = environment_arg(optional(args, 1));
    let (expansion, changed) = interp.macroexpand_1(&args[0], &env)?;
    let flag = interp.boolean(changed);
    Ok(interp.set_values(vec![expansion, flag]))
}

fn prim_macroexpand(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let env = environment_arg(optional(args, 1));
    let (expansion, changed) = interp.macroexpand(&args[0], &env)?;
    let flag = interp.boolean(changed);
    Ok(interp.set_values(vec![expansion, flag]))
}

/// `(PROCLAIM '(special var ...))`; other declarations are accepted and
/// ignored.
fn prim_proclaim(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let spec = &args[0];
    let is_special = matches!(spec.car(), Some(Value::Symbol(s)) if s == interp.symbols().special);
    if is_special {
        for name in list_arg(&spec.cdr().unwrap_or(Value::Nil))? {
            symbol_arg(interp, &name)?.set_special();
        }
    } else if !spec.is_cons() {
        return Err(type_error(spec, "CONS"));
    }
    Ok(Value::Nil)
}

fn prim_values(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.set_values(args.to_vec()))
}

fn prim_values_list(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let values = list_arg(&args[0])?;
    Ok(interp.set_values(values))
}

// ============================================================================
// Reader
// ============================================================================

/// End of input: signal END-OF-FILE unless `args[index]` (eof-error-p) is
/// NIL, in which case return `args[index + 1]`.
fn eof_result(args: &[Value], index: usize) -> EvalResult {
    if optional(args, index).map_or(true, Value::is_true) {
        return Err(Condition::end_of_file().into());
    }
    Ok(optional(args, index + 1).cloned().unwrap_or(Value::Nil))
}

/// `(READ &optional stream eof-error-p eof-value recursive-p)`
fn prim_read(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let stream = input_stream(interp, optional(args, 0))?;
    let eof_error_p = optional(args, 1).map_or(true, Value::is_true);
    let eof_value = optional(args, 2).cloned().unwrap_or(Value::Nil);
    interp.read_from_stream(&stream, eof_error_p, eof_value)
}

/// `(READ-FROM-STRING string &optional eof-error-p eof-value)`: the datum
/// and the index of the first unread character.
fn prim_read_from_string(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let text = string_arg(&args[0])?;
    let stream = Stream::from_string(&text);
    let eof_error_p = optional(args, 1).map_or(true, Value::is_true);
    let eof_value = optional(args, 2).cloned().unwrap_or(Value::Nil);
    let datum = interp.read_from_stream(&stream, eof_error_p, eof_value)?;
    let position = Value::Fixnum(stream.position() as i64);
    Ok(interp.set_values(vec![datum, position]))
}

fn prim_read_delimited_list(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let close = char_arg(&args[0])?;
    let stream = input_stream(interp, optional(args, 1))?;
    Reader::new(interp, stream).read_delimited_list(close)
}

fn prim_read_char(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let stream = input_stream(interp, optional(args, 0))?;
    match stream.read_char()? {
        Some(c) => Ok(Value::Char(c)),
        None => eof_result(args, 1),
    }
}

fn prim_unread_char(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let c = char_arg(&args[0])?;
    let stream = input_stream(interp, optional(args, 1))?;
    stream.unread_char(c);
    Ok(Value::Nil)
}

/// `(PEEK-CHAR &optional peek-type stream eof-error-p eof-value)`. A
/// peek-type of T skips whitespace; a character skips up to that character.
fn prim_peek_char(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let stream = input_stream(interp, optional(args, 1))?;
    let readtable = interp.current_readtable();
    let peek_type = optional(args, 0).cloned().unwrap_or(Value::Nil);
    loop {
        let Some(c) = stream.peek_char()? else {
            return eof_result(args, 2);
        };
        let skip = match &peek_type {
            Value::Nil => false,
            Value::Char(target) => c != *target,
            _ => readtable.is_whitespace(c),
        };
        if !skip {
            return Ok(Value::Char(c));
        }
        stream.read_char()?;
    }
}

/// The line and whether input ended before a newline.
fn prim_read_line(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let stream = input_stream(interp, optional(args, 0))?;
    let values = match stream.read_line()? {
        Some((line, missing_newline)) => vec![Value::string(line), interp.boolean(missing_newline)],
        None => vec![eof_result(args, 1)?, interp.t()],
    };
    Ok(interp.set_values(values))
}

fn prim_clear_input(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    input_stream(interp, optional(args, 0))?.clear_input();
    Ok(Value::Nil)
}

fn prim_listen(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let ready = input_stream(interp, optional(args, 0))?.listen();
    Ok(interp.boolean(ready))
}

/// `(MAKE-STRING-INPUT-STREAM string &optional start end)`
fn prim_make_string_input_stream(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let text = string_arg(&args[0])?;
    let chars: Vec<char> = text.chars().collect();
    let start = optional(args, 1).map(index_arg).transpose()?.unwrap_or(0);
    let end = match optional(args, 2) {
        None | Some(Value::Nil) => chars.len(),
        Some(v) => index_arg(v)?,
    };
    if start > end || end > chars.len() {
        return Err(Condition::type_error(args[0].clone(), "bounding indices")
            .with_operands(args[1..].to_vec())
            .into());
    }
    let slice: String = chars[start..end].iter().collect();
    Ok(Value::Stream(Stream::from_string(&slice)))
}

// ============================================================================
// Readtables
// ============================================================================

/// The standard readtable is never modified.
fn mutable_readtable(interp: &Interpreter, v: Option<&Value>) -> Result<Arc<Readtable>, ControlSignal> {
    let rt = readtable_arg(interp, v)?;
    if Arc::ptr_eq(&rt, &interp.runtime().standard_readtable()) {
        return Err(Condition::program_error("The standard readtable cannot be modified").into());
    }
    Ok(rt)
}

/// `(COPY-READTABLE &optional from to)`
fn prim_copy_readtable(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let from = readtable_arg(interp, optional(args, 0))?;
    match optional(args, 1) {
        None | Some(Value::Nil) => Ok(Value::Readtable(Arc::new(from.copy()))),
        Some(Value::Readtable(to)) => {
            mutable_readtable(interp, optional(args, 1))?;
            from.copy_into(to);
            Ok(Value::Readtable(Arc::clone(to)))
        }
        Some(other) => Err(type_error(other, "READTABLE")),
    }
}

fn prim_readtablep(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(interp.boolean(matches!(args[0], Value::Readtable(_))))
}

/// `(SET-MACRO-CHARACTER char function &optional non-terminating-p readtable)`
fn prim_set_macro_character(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let c = char_arg(&args[0])?;
    let function = interp.designated_function(&args[1])?;
    let non_terminating = optional(args, 2).is_some_and(Value::is_true);
    let rt = mutable_readtable(interp, optional(args, 3))?;
    rt.set_macro_character(c, MacroFunction::Lisp(function), non_terminating);
    Ok(interp.t())
}

/// The function and non-terminating flag. Built-in reader macros are
/// reported as T.
fn prim_get_macro_character(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let c = char_arg(&args[0])?;
    let rt = readtable_arg(interp, optional(args, 1))?;
    let values = match rt.get_macro_character(c) {
        Some((MacroFunction::Lisp(f), non_terminating)) => {
            vec![Value::Function(f), interp.boolean(non_terminating)]
        }
        Some((MacroFunction::Native(_), non_terminating)) => vec![interp.t(), interp.boolean(non_terminating)],
        None => vec![Value::Nil, Value::Nil],
    };
    Ok(interp.set_values(values))
}

fn prim_make_dispatch_macro_character(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let c = char_arg(&args[0])?;
    let non_terminating = optional(args, 1).is_some_and(Value::is_true);
    let rt = mutable_readtable(interp, optional(args, 2))?;
    rt.make_dispatch_macro_character(c, non_terminating);
    Ok(interp.t())
}

/// `(SET-DISPATCH-MACRO-CHARACTER disp sub function &optional readtable)`
fn prim_set_dispatch_macro_character(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let disp = char_arg(&args[0])?;
    let sub = char_arg(&args[1])?;
    if sub.is_ascii_digit() {
        return Err(Condition::program_error(format!("Digit {:?} cannot be a dispatch sub-character", sub))
            .with_datum(args[1].clone())
            .into());
    }
    let function = interp.designated_function(&args[2])?;
    let rt = mutable_readtable(interp, optional(args, 3))?;
    rt.set_dispatch_macro_character(disp, sub, DispatchFunction::Lisp(function))
        .map_err(Condition::reader_error)?;
    Ok(interp.t())
}

fn prim_get_dispatch_macro_character(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let disp = char_arg(&args[0])?;
    let sub = char_arg(&args[1])?;
    let rt = readtable_arg(interp, optional(args, 2))?;
    if !rt.is_dispatch_macro_character(disp) {
        return Err(Condition::reader_error(format!("{:?} is not a dispatching macro character", disp))
            .with_datum(args[0].clone())
            .into());
    }
    Ok(match rt.get_dispatch_macro_character(disp, sub) {
        Some(DispatchFunction::Lisp(f)) => Value::Function(f),
        Some(DispatchFunction::Native(_)) => interp.t(),
        None => Value::Nil,
    })
}

fn readtable_case_keyword(interp: &Interpreter, mode: ReadtableCase) -> Value {
    Value::Symbol(interp.runtime().packages().intern_keyword(mode.keyword_name()))
}

fn prim_readtable_case(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Value::Readtable(rt) = &args[0] else {
        return Err(type_error(&args[0], "READTABLE"));
    };
    Ok(readtable_case_keyword(interp, rt.readtable_case()))
}

fn prim_set_readtable_case(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Value::Readtable(_) = &args[0] else {
        return Err(type_error(&args[0], "READTABLE"));
    };
    let rt = mutable_readtable(interp, optional(args, 0))?;
    let mode = match &args[1] {
        Value::Symbol(s) if s.is_keyword() => ReadtableCase::from_keyword_name(s.name()),
        _ => None,
    }
    .ok_or_else(|| type_error(&args[1], "(MEMBER :UPCASE :DOWNCASE :PRESERVE :INVERT)"))?;
    rt.set_readtable_case(mode);
    Ok(readtable_case_keyword(interp, mode))
}

// ============================================================================
// Printing and strings
// ============================================================================

/// Output goes to standard output; the only accepted destinations are
/// NIL and T.
fn check_output_designator(interp: &Interpreter, v: Option<&Value>) -> Result<(), ControlSignal> {
    match v {
        None | Some(Value::Nil) => Ok(()),
        Some(Value::Symbol(s)) if *s == interp.symbols().t => Ok(()),
        Some(other) => Err(type_error(other, "(MEMBER NIL T)")),
    }
}

fn prim_prin1(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    check_output_designator(interp, optional(args, 1))?;
    write_out(&interp.prin1(&args[0]))?;
    Ok(args[0].clone())
}

fn prim_princ(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    check_output_designator(interp, optional(args, 1))?;
    write_out(&interp.princ(&args[0]))?;
    Ok(args[0].clone())
}

fn prim_print(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    check_output_designator(interp, optional(args, 1))?;
    write_out(&format!("\n{} ", interp.prin1(&args[0])))?;
    Ok(args[0].clone())
}

fn prim_terpri(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    check_output_designator(interp, optional(args, 0))?;
    write_out("\n")?;
    Ok(Value::Nil)
}

fn prim_prin1_to_string(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::string(interp.prin1(&args[0])))
}

fn prim_princ_to_string(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::string(interp.princ(&args[0])))
}

/// The subset of FORMAT directives used by messages: ~A ~S ~D ~% ~& ~~.
fn format_to_string(interp: &Interpreter, control: &str, args: &[Value]) -> Result<String, ControlSignal> {
    let mut out = String::new();
    let mut remaining = args.iter();
    let mut chars = control.chars();
    while let Some(c) = chars.next() {
        if c != '~' {
            out.push(c);
            continue;
        }
        let directive = chars
            .next()
            .ok_or_else(|| Condition::simple_error("Format control ends in ~", vec![Value::string(control)]))?;
        match directive.to_ascii_uppercase() {
            'A' | 'S' | 'D' => {
                let arg = remaining.next().ok_or_else(|| {
                    Condition::simple_error("Not enough arguments for format control", vec![Value::string(control)])
                })?;
                if directive.eq_ignore_ascii_case(&'S') {
                    out.push_str(&interp.prin1(arg));
                } else {
                    out.push_str(&interp.princ(arg));
                }
            }
            '%' => out.push('\n'),
            '&' => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            '~' => out.push('~'),
            other => {
                return Err(Condition::simple_error(
                    format!("Unsupported format directive ~{}", other),
                    vec![Value::string(control)],
                )
                .into())
            }
        }
    }
    Ok(out)
}

/// `(FORMAT destination control &rest args)` for NIL and T destinations.
fn prim_format(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let control = string_arg(&args[1])?;
    let text = format_to_string(interp, &control, &args[2..])?;
    match &args[0] {
        Value::Nil => Ok(Value::string(text)),
        dest => {
            check_output_designator(interp, Some(dest))?;
            write_out(&text)?;
            Ok(Value::Nil)
        }
    }
}

fn prim_string(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::String(_) => Ok(args[0].clone()),
        other => Ok(Value::string(string_designator(other)?)),
    }
}

fn prim_string_eq(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let a = string_designator(&args[0])?;
    let b = string_designator(&args[1])?;
    Ok(interp.boolean(a == b))
}

// ============================================================================
// Vectors and arrays
// ============================================================================

fn bad_index(array: &Value, index: &Value) -> ControlSignal {
    Condition::type_error(index.clone(), "(INTEGER 0 (ARRAY-DIMENSION))")
        .with_operands(vec![array.clone()])
        .into()
}

fn single_index(array: &Value, indices: &[Value]) -> Result<usize, ControlSignal> {
    match indices {
        [index] => index_arg(index),
        _ => Err(Condition::program_error(format!(
            "Wrong number of subscripts ({}) for {}",
            indices.len(),
            array
        ))
        .into()),
    }
}

fn row_major_index(array: &Value, dimensions: &[usize], indices: &[Value]) -> Result<usize, ControlSignal> {
    if indices.len() != dimensions.len() {
        return Err(Condition::program_error(format!(
            "Wrong number of subscripts ({}) for {}",
            indices.len(),
            array
        ))
        .into());
    }
    let mut index = 0;
    for (subscript, dim) in indices.iter().zip(dimensions) {
        let i = index_arg(subscript)?;
        if i >= *dim {
            return Err(bad_index(array, subscript));
        }
        index = index * dim + i;
    }
    Ok(index)
}

fn prim_vector(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::vector(args.to_vec()))
}

fn prim_svref(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Value::Vector(items) = &args[0] else {
        return Err(type_error(&args[0], "SIMPLE-VECTOR"));
    };
    let i = index_arg(&args[1])?;
    read_lock(items)
        .get(i)
        .cloned()
        .ok_or_else(|| bad_index(&args[0], &args[1]))
}

fn prim_aref(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let (array, indices) = (&args[0], &args[1..]);
    let out_of_range = || bad_index(array, indices.first().unwrap_or(&Value::Nil));
    match array {
        Value::Vector(items) => {
            let i = single_index(array, indices)?;
            read_lock(items).get(i).cloned().ok_or_else(out_of_range)
        }
        Value::String(s) => {
            let i = single_index(array, indices)?;
            s.chars().nth(i).map(Value::Char).ok_or_else(out_of_range)
        }
        Value::BitVector(bits) => {
            let i = single_index(array, indices)?;
            bits.get(i).map(|b| Value::Fixnum(i64::from(*b))).ok_or_else(out_of_range)
        }
        Value::Array(a) => {
            let i = row_major_index(array, &a.dimensions, indices)?;
            read_lock(&a.elements).get(i).cloned().ok_or_else(out_of_range)
        }
        other => Err(type_error(other, "ARRAY")),
    }
}

/// `(%SET-AREF array subscript* value)`
fn prim_set_aref(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let (value, rest) = args
        .split_last()
        .ok_or_else(|| Condition::program_error("%SET-AREF needs a value"))?;
    let (array, indices) = (&rest[0], &rest[1..]);
    let out_of_range = || bad_index(array, indices.first().unwrap_or(&Value::Nil));
    let slot = match array {
        Value::Vector(items) => {
            let i = single_index(array, indices)?;
            let mut items = write_lock(items);
            let slot = items.get_mut(i).ok_or_else(out_of_range)?;
            *slot = value.clone();
            return Ok(value.clone());
        }
        Value::Array(a) => row_major_index(array, &a.dimensions, indices)?,
        other => return Err(type_error(other, "(OR SIMPLE-VECTOR ARRAY)")),
    };
    if let Value::Array(a) = array {
        let mut elements = write_lock(&a.elements);
        let cell = elements.get_mut(slot).ok_or_else(out_of_range)?;
        *cell = value.clone();
    }
    Ok(value.clone())
}

fn prim_list_to_vector(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    Ok(Value::vector(list_arg(&args[0])?))
}

// ============================================================================
// Threads
// ============================================================================

fn prim_current_thread(interp: &mut Interpreter, _args: &[Value]) -> EvalResult {
    Ok(Value::Thread(Arc::clone(interp.thread())))
}

/// `(INTERRUPT-THREAD thread function &rest args)`: queued, run by the
/// target at its next evaluation step.
fn prim_interrupt_thread(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let Value::Thread(thread) = &args[0] else {
        return Err(type_error(&args[0], "THREAD"));
    };
    let function = interp.designated_function(&args[1])?;
    thread.interrupt(function, args[2..].to_vec());
    Ok(interp.t())
}

fn prim_thread_name(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    match &args[0] {
        Value::Thread(thread) => Ok(Value::string(thread.name())),
        other => Err(type_error(other, "THREAD")),
    }
}

// ============================================================================
// Runtime services
// ============================================================================

/// `(AUTOLOAD symbol module)`: install a placeholder loaded on first call.
fn prim_autoload(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if matches!(sym.function(), Some(Function::SpecialOperator(_))) {
        return Err(Condition::program_error(format!("Cannot autoload special operator {}", sym))
            .with_datum(args[0].clone())
            .into());
    }
    let source = string_designator(&args[1])?;
    interp.runtime().autoload(&sym, &source);
    Ok(args[0].clone())
}

/// Active frames, innermost first, each rendered as a call form.
fn prim_backtrace(interp: &mut Interpreter, _args: &[Value]) -> EvalResult {
    let frames = interp
        .backtrace()
        .frames
        .into_iter()
        .map(|frame| {
            let mut text = format!("({}", frame.operator);
            for arg in &frame.arguments {
                text.push(' ');
                text.push_str(arg);
            }
            text.push(')');
            Value::string(text)
        })
        .collect::<Vec<_>>();
    Ok(Value::list(frames))
}

/// `(ERROR datum &rest args)`: a SIMPLE-ERROR whose message is the
/// formatted control string.
fn prim_error(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let message = match &args[0] {
        Value::String(control) => format_to_string(interp, control, &args[1..])?,
        Value::Symbol(s) => s.name().to_string(),
        other => interp.princ(other),
    };
    Err(Condition::simple_error(message, args[1..].to_vec())
        .with_datum(args[0].clone())
        .into())
}

// ============================================================================
// SYSTEM internals used by macro expansions
// ============================================================================

fn refuse_special_operator(sym: &Symbol, datum: &Value) -> Result<(), ControlSignal> {
    if matches!(sym.function(), Some(Function::SpecialOperator(_))) {
        return Err(Condition::program_error(format!("{} names a special operator", sym))
            .with_datum(datum.clone())
            .into());
    }
    Ok(())
}

fn prim_sys_defun(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    refuse_special_operator(&sym, &args[0])?;
    let Value::Function(function) = &args[1] else {
        return Err(type_error(&args[1], "FUNCTION"));
    };
    sym.set_function(Some(function.clone()));
    tracing::trace!(function = %sym, "defined function");
    Ok(args[0].clone())
}

fn install_macro(interp: &Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    refuse_special_operator(&sym, &args[0])?;
    let expander = match &args[1] {
        Value::Function(f) if f.is_callable() => f.clone(),
        other => return Err(type_error(other, "FUNCTION")),
    };
    sym.set_function(Some(Function::Macro(Arc::new(Macro {
        name: Some(sym.clone()),
        expander: Expander::Lisp(expander),
    }))));
    Ok(args[0].clone())
}

fn prim_sys_defmacro(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    install_macro(interp, args)
}

fn prim_sys_set_macro_function(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    install_macro(interp, args)?;
    Ok(args[1].clone())
}

fn prim_sys_proclaim_special(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if sym.is_keyword() {
        return Err(Condition::program_error(format!("Cannot make keyword {:?} special", sym)).into());
    }
    sym.set_special();
    Ok(args[0].clone())
}

/// Redefining a constant with an EQUAL value is allowed.
fn prim_sys_defconstant(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if sym.is_constant() {
        return match sym.value() {
            Some(old) if equal(&old, &args[1]) => Ok(args[0].clone()),
            _ => Err(Condition::program_error(format!("Constant {} redefined with a different value", sym))
                .with_datum(args[0].clone())
                .into()),
        };
    }
    sym.set_value(args[1].clone());
    sym.set_constant();
    Ok(args[0].clone())
}

fn prim_sys_in_package(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let pkg = package_designator(interp, &args[0])?;
    let package_var = interp.symbols().package_var.clone();
    interp.set_dynamic_value(&package_var, Value::Package(Arc::clone(&pkg)));
    Ok(Value::Package(pkg))
}

fn prim_sys_set_car(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let cell = args[0].as_cons().ok_or_else(|| type_error(&args[0], "CONS"))?;
    cell.set_car(args[1].clone());
    Ok(args[1].clone())
}

fn prim_sys_set_cdr(_interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let cell = args[0].as_cons().ok_or_else(|| type_error(&args[0], "CONS"))?;
    cell.set_cdr(args[1].clone());
    Ok(args[1].clone())
}

fn prim_sys_set_symbol_function(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    refuse_special_operator(&sym, &args[0])?;
    let Value::Function(function) = &args[1] else {
        return Err(type_error(&args[1], "FUNCTION"));
    };
    sym.set_function(Some(function.clone()));
    Ok(args[1].clone())
}

fn prim_sys_set_symbol_plist(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    if !args[1].is_list() {
        return Err(type_error(&args[1], "LIST"));
    }
    sym.set_plist(args[1].clone());
    Ok(args[1].clone())
}

/// `(%PUT symbol indicator value)`
fn prim_sys_put(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let sym = symbol_arg(interp, &args[0])?;
    let plist = sym.plist();
    let mut current = plist.clone();
    while let Value::Cons(c) = current {
        let rest = c.cdr();
        if eq(&c.car(), &args[1]) {
            if let Value::Cons(value_cell) = &rest {
                value_cell.set_car(args[2].clone());
                return Ok(args[2].clone());
            }
            break;
        }
        current = rest.cdr().unwrap_or(Value::Nil);
    }
    sym.set_plist(Value::cons(args[1].clone(), Value::cons(args[2].clone(), plist)));
    Ok(args[2].clone())
}

/// ECASE found no clause for `key`.
fn prim_sys_ecase_failure(interp: &mut Interpreter, args: &[Value]) -> EvalResult {
    let keys = list_arg(&args[1])?
        .iter()
        .map(|k| interp.prin1(k))
        .collect::<Vec<_>>()
        .join(" ");
    Err(Condition::type_error(args[0].clone(), &format!("(MEMBER {})", keys)).into())
}

// ============================================================================
// Registration
// ============================================================================

pub fn install(runtime: &Runtime) {
    let packages = runtime.packages();
    let cl = |name: &str| packages.intern_cl(name);
    let sys = |name: &str| packages.intern_sys(name);
    let exactly = Arity::exactly;
    let range = Arity::range;
    let at_least = Arity::at_least;

    // Lists
    runtime.define_primitive(&cl("CONS"), exactly(2), prim_cons);
    runtime.define_primitive(&cl("CAR"), exactly(1), prim_car);
    runtime.define_primitive(&cl("CDR"), exactly(1), prim_cdr);
    runtime.define_primitive(&cl("FIRST"), exactly(1), prim_car);
    runtime.define_primitive(&cl("REST"), exactly(1), prim_cdr);
    runtime.define_primitive(&cl("SECOND"), exactly(1), prim_second);
    runtime.define_primitive(&cl("THIRD"), exactly(1), prim_third);
    runtime.define_primitive(&cl("NTH"), exactly(2), prim_nth);
    runtime.define_primitive(&cl("NTHCDR"), exactly(2), prim_nthcdr);
    runtime.define_primitive(&cl("RPLACA"), exactly(2), prim_rplaca);
    runtime.define_primitive(&cl("RPLACD"), exactly(2), prim_rplacd);
    runtime.define_primitive(&cl("LIST"), at_least(0), prim_list);
    runtime.define_primitive(&cl("LIST*"), at_least(1), prim_list_star);
    runtime.define_primitive(&cl("APPEND"), at_least(0), prim_append);
    runtime.define_primitive(&cl("REVERSE"), exactly(1), prim_reverse);
    runtime.define_primitive(&cl("LENGTH"), exactly(1), prim_length);
    runtime.define_primitive(&cl("MEMBER"), range(2, 4), prim_member);
    runtime.define_primitive(&cl("ASSOC"), range(2, 4), prim_assoc);
    runtime.define_primitive(&cl("LAST"), exactly(1), prim_last);
    runtime.define_primitive(&cl("MAPCAR"), at_least(2), prim_mapcar);
    runtime.define_values_primitive(&cl("APPLY"), at_least(2), prim_apply);
    runtime.define_values_primitive(&cl("FUNCALL"), at_least(1), prim_funcall);

    // Predicates
    runtime.define_primitive(&cl("NULL"), exactly(1), prim_null);
    runtime.define_primitive(&cl("NOT"), exactly(1), prim_null);
    runtime.define_primitive(&cl("ATOM"), exactly(1), prim_atom);
    runtime.define_primitive(&cl("CONSP"), exactly(1), prim_consp);
    runtime.define_primitive(&cl("LISTP"), exactly(1), prim_listp);
    runtime.define_primitive(&cl("SYMBOLP"), exactly(1), prim_symbolp);
    runtime.define_primitive(&cl("KEYWORDP"), exactly(1), prim_keywordp);
    runtime.define_primitive(&cl("NUMBERP"), exactly(1), prim_numberp);
    runtime.define_primitive(&cl("INTEGERP"), exactly(1), prim_integerp);
    runtime.define_primitive(&cl("STRINGP"), exactly(1), prim_stringp);
    runtime.define_primitive(&cl("CHARACTERP"), exactly(1), prim_characterp);
    runtime.define_primitive(&cl("FUNCTIONP"), exactly(1), prim_functionp);
    runtime.define_primitive(&cl("VECTORP"), exactly(1), prim_vectorp);
    runtime.define_primitive(&cl("EQ"), exactly(2), prim_eq);
    runtime.define_primitive(&cl("EQL"), exactly(2), prim_eql);
    runtime.define_primitive(&cl("EQUAL"), exactly(2), prim_equal);

    // Arithmetic
    runtime.define_primitive(&cl("+"), at_least(0), prim_add);
    runtime.define_primitive(&cl("-"), at_least(1), prim_sub);
    runtime.define_primitive(&cl("*"), at_least(0), prim_mul);
    runtime.define_primitive(&cl("/"), at_least(1), prim_div);
    runtime.define_primitive(&cl("1+"), exactly(1), prim_1plus);
    runtime.define_primitive(&cl("1-"), exactly(1), prim_1minus);
    runtime.define_primitive(&cl("ZEROP"), exactly(1), prim_zerop);
    runtime.define_primitive(&cl("="), at_least(1), prim_num_eq);
    runtime.define_primitive(&cl("/="), at_least(1), prim_num_ne);
    runtime.define_primitive(&cl("<"), at_least(1), prim_lt);
    runtime.define_primitive(&cl(">"), at_least(1), prim_gt);
    runtime.define_primitive(&cl("<="), at_least(1), prim_le);
    runtime.define_primitive(&cl(">="), at_least(1), prim_ge);

    // Symbols
    runtime.define_primitive(&cl("SYMBOL-NAME"), exactly(1), prim_symbol_name);
    runtime.define_primitive(&cl("SYMBOL-PACKAGE"), exactly(1), prim_symbol_package);
    runtime.define_primitive(&cl("SYMBOL-VALUE"), exactly(1), prim_symbol_value);
    runtime.define_primitive(&cl("SET"), exactly(2), prim_set);
    runtime.define_primitive(&cl("BOUNDP"), exactly(1), prim_boundp);
    runtime.define_primitive(&cl("MAKUNBOUND"), exactly(1), prim_makunbound);
    runtime.define_primitive(&cl("SYMBOL-FUNCTION"), exactly(1), prim_symbol_function);
    runtime.define_primitive(&cl("FBOUNDP"), exactly(1), prim_fboundp);
    runtime.define_primitive(&cl("FMAKUNBOUND"), exactly(1), prim_fmakunbound);
    runtime.define_primitive(&cl("GET"), range(2, 3), prim_get);
    runtime.define_primitive(&cl("SYMBOL-PLIST"), exactly(1), prim_symbol_plist);
    runtime.define_primitive(&cl("GENSYM"), range(0, 1), prim_gensym);
    runtime.define_primitive(&cl("MAKE-SYMBOL"), exactly(1), prim_make_symbol);
    runtime.define_primitive(&cl("SPECIAL-OPERATOR-P"), exactly(1), prim_special_operator_p);
    runtime.define_primitive(&cl("MACRO-FUNCTION"), range(1, 2), prim_macro_function);

    // Packages
    runtime.define_primitive(&cl("FIND-PACKAGE"), exactly(1), prim_find_package);
    runtime.define_primitive(&cl("MAKE-PACKAGE"), at_least(1), prim_make_package);
    runtime.define_values_primitive(&cl("INTERN"), range(1, 2), prim_intern);
    runtime.define_values_primitive(&cl("FIND-SYMBOL"), range(1, 2), prim_find_symbol);
    runtime.define_primitive(&cl("EXPORT"), range(1, 2), prim_export);
    runtime.define_primitive(&cl("IMPORT"), range(1, 2), prim_import);
    runtime.define_primitive(&cl("USE-PACKAGE"), range(1, 2), prim_use_package);
    runtime.define_primitive(&cl("PACKAGE-NAME"), exactly(1), prim_package_name);
    runtime.define_primitive(&cl("LIST-ALL-PACKAGES"), exactly(0), prim_list_all_packages);

    // Evaluation and values
    runtime.define_values_primitive(&cl("EVAL"), exactly(1), prim_eval);
    runtime.define_values_primitive(&cl("MACROEXPAND-1"), range(1, 2), prim_macroexpand_1);
    runtime.define_values_primitive(&cl("MACROEXPAND"), range(1, 2), prim_macroexpand);
    runtime.define_primitive(&cl("PROCLAIM"), exactly(1), prim_proclaim);
    runtime.define_values_primitive(&cl("VALUES"), at_least(0), prim_values);
    runtime.define_values_primitive(&cl("VALUES-LIST"), exactly(1), prim_values_list);

    // Reader
    runtime.define_primitive(&cl("READ"), range(0, 4), prim_read);
    runtime.define_values_primitive(&cl("READ-FROM-STRING"), range(1, 3), prim_read_from_string);
    runtime.define_primitive(&cl("READ-DELIMITED-LIST"), range(1, 3), prim_read_delimited_list);
    runtime.define_primitive(&cl("READ-CHAR"), range(0, 4), prim_read_char);
    runtime.define_primitive(&cl("UNREAD-CHAR"), range(1, 2), prim_unread_char);
    runtime.define_primitive(&cl("PEEK-CHAR"), range(0, 5), prim_peek_char);
    runtime.define_values_primitive(&cl("READ-LINE"), range(0, 4), prim_read_line);
    runtime.define_primitive(&cl("CLEAR-INPUT"), range(0, 1), prim_clear_input);
    runtime.define_primitive(&cl("LISTEN"), range(0, 1), prim_listen);
    runtime.define_primitive(&cl("MAKE-STRING-INPUT-STREAM"), range(1, 3), prim_make_string_input_stream);

    // Readtables
    runtime.define_primitive(&cl("COPY-READTABLE"), range(0, 2), prim_copy_readtable);
    runtime.define_primitive(&cl("READTABLEP"), exactly(1), prim_readtablep);
    runtime.define_primitive(&cl("SET-MACRO-CHARACTER"), range(2, 4), prim_set_macro_character);
    runtime.define_values_primitive(&cl("GET-MACRO-CHARACTER"), range(1, 2), prim_get_macro_character);
    runtime.define_primitive(
        &cl("MAKE-DISPATCH-MACRO-CHARACTER"),
        range(1, 3),
        prim_make_dispatch_macro_character,
    );
    runtime.define_primitive(
        &cl("SET-DISPATCH-MACRO-CHARACTER"),
        range(3, 4),
        prim_set_dispatch_macro_character,
    );
    runtime.define_primitive(
        &cl("GET-DISPATCH-MACRO-CHARACTER"),
        range(2, 3),
        prim_get_dispatch_macro_character,
    );
    runtime.define_primitive(&cl("READTABLE-CASE"), exactly(1), prim_readtable_case);

    // Printing and strings
    runtime.define_primitive(&cl("PRIN1"), range(1, 2), prim_prin1);
    runtime.define_primitive(&cl("PRINC"), range(1, 2), prim_princ);
    runtime.define_primitive(&cl("PRINT"), range(1, 2), prim_print);
    runtime.define_primitive(&cl("TERPRI"), range(0, 1), prim_terpri);
    runtime.define_primitive(&cl("PRIN1-TO-STRING"), exactly(1), prim_prin1_to_string);
    runtime.define_primitive(&cl("PRINC-TO-STRING"), exactly(1), prim_princ_to_string);
    runtime.define_primitive(&cl("FORMAT"), at_least(2), prim_format);
    runtime.define_primitive(&cl("STRING"), exactly(1), prim_string);
    runtime.define_primitive(&cl("STRING="), exactly(2), prim_string_eq);

    // Vectors
    runtime.define_primitive(&cl("VECTOR"), at_least(0), prim_vector);
    runtime.define_primitive(&cl("SVREF"), exactly(2), prim_svref);
    runtime.define_primitive(&cl("AREF"), at_least(1), prim_aref);

    // Threads
    runtime.define_primitive(&cl("CURRENT-THREAD"), exactly(0), prim_current_thread);
    runtime.define_primitive(&cl("INTERRUPT-THREAD"), at_least(2), prim_interrupt_thread);
    runtime.define_primitive(&cl("THREAD-NAME"), exactly(1), prim_thread_name);

    // Runtime services
    runtime.define_primitive(&cl("AUTOLOAD"), exactly(2), prim_autoload);
    runtime.define_primitive(&cl("BACKTRACE"), exactly(0), prim_backtrace);
    runtime.define_primitive(&cl("ERROR"), at_least(1), prim_error);

    // SYSTEM internals
    runtime.define_primitive(&sys("%DEFUN"), exactly(2), prim_sys_defun);
    runtime.define_primitive(&sys("%DEFMACRO"), exactly(2), prim_sys_defmacro);
    runtime.define_primitive(&sys("%PROCLAIM-SPECIAL"), exactly(1), prim_sys_proclaim_special);
    runtime.define_primitive(&sys("%DEFCONSTANT"), exactly(2), prim_sys_defconstant);
    runtime.define_primitive(&sys("%IN-PACKAGE"), exactly(1), prim_sys_in_package);
    runtime.define_primitive(&sys("%SET-CAR"), exactly(2), prim_sys_set_car);
    runtime.define_primitive(&sys("%SET-CDR"), exactly(2), prim_sys_set_cdr);
    runtime.define_primitive(&sys("%SET-SYMBOL-FUNCTION"), exactly(2), prim_sys_set_symbol_function);
    runtime.define_primitive(&sys("%SET-SYMBOL-PLIST"), exactly(2), prim_sys_set_symbol_plist);
    runtime.define_primitive(&sys("%SET-MACRO-FUNCTION"), exactly(2), prim_sys_set_macro_function);
    runtime.define_primitive(&sys("%PUT"), exactly(3), prim_sys_put);
    runtime.define_primitive(&sys("%SET-AREF"), at_least(3), prim_set_aref);
    runtime.define_primitive(&sys("%LIST-TO-VECTOR"), exactly(1), prim_list_to_vector);
    runtime.define_primitive(&sys("%ECASE-FAILURE"), exactly(2), prim_sys_ecase_failure);
    runtime.define_primitive(&sys("%SET-READTABLE-CASE"), exactly(2), prim_set_readtable_case);
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
    fn test_list_functions() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(append '(1 2) '(3) nil '(4 . 5))"), "(1 2 3 4 . 5)");
        assert_eq!(eval_print(&mut interp, "(reverse '(1 2 3))"), "(3 2 1)");
        assert_eq!(eval_print(&mut interp, "(list* 1 2 '(3))"), "(1 2 3)");
        assert_eq!(eval_print(&mut interp, "(nth 5 '(1 2))"), "NIL");
        assert_eq!(eval_print(&mut interp, "(mapcar #'+ '(1 2 3) '(10 20))"), "(11 22)");
        assert_eq!(eval_print(&mut interp, "(member \"b\" '(\"a\" \"b\") :test #'equal)"), "(\"b\")");
        assert_eq!(eval_print(&mut interp, "(assoc 'b '((a . 1) (b . 2)))"), "(B . 2)");
        assert_eq!(eval_error(&mut interp, "(car 5)"), ErrorKind::TypeError);
    }

    #[test]
    fn test_arity_checked() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(cons 1)"), ErrorKind::WrongNumberOfArguments);
        assert_eq!(eval_error(&mut interp, "(car 1 2)"), ErrorKind::WrongNumberOfArguments);
    }

    #[test]
    fn test_intern_status() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(multiple-value-list (intern \"FRESH-ONE\"))"), "(FRESH-ONE NIL)");
        assert_eq!(
            eval_print(&mut interp, "(multiple-value-list (intern \"FRESH-ONE\"))"),
            "(FRESH-ONE :INTERNAL)"
        );
        assert_eq!(eval_print(&mut interp, "(multiple-value-list (find-symbol \"CAR\"))"), "(CAR :INHERITED)");
        assert_eq!(eval_print(&mut interp, "(multiple-value-list (find-symbol \"NO-SUCH-THING-HERE\"))"), "(NIL NIL)");
    }

    #[test]
    fn test_symbol_plist() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(progn (setf (get 'widget 'color) 'red) (get 'widget 'color))"), "RED");
        assert_eq!(eval_print(&mut interp, "(progn (setf (get 'widget 'color) 'blue) (symbol-plist 'widget))"), "(COLOR BLUE)");
        assert_eq!(eval_print(&mut interp, "(get 'widget 'size 'unknown)"), "UNKNOWN");
    }

    #[test]
    fn test_read_from_string_position() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(multiple-value-list (read-from-string \"(a b) c\"))"), "((A B) 5)");
        assert_eq!(eval_print(&mut interp, "(read-from-string \"\" nil :empty)"), ":EMPTY");
        assert_eq!(eval_error(&mut interp, "(read-from-string \"\")"), ErrorKind::EndOfFile);
    }

    #[test]
    fn test_character_input() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(peek-char t (make-string-input-stream \"   x\"))"), "#\\x");
        assert_eq!(eval_print(&mut interp, "(read-char (make-string-input-stream \"\") nil :done)"), ":DONE");
        assert_eq!(
            eval_print(&mut interp, "(let ((s (make-string-input-stream \"ab\"))) (read-char s) (read-char s))"),
            "#\\b"
        );
        assert_eq!(
            eval_print(
                &mut interp,
                "(let ((s (make-string-input-stream \"xyz\"))) (unread-char (read-char s) s) (read-char s))"
            ),
            "#\\x"
        );
        assert_eq!(
            eval_print(&mut interp, "(multiple-value-list (read-line (make-string-input-stream \"ab\")))"),
            "(\"ab\" T)"
        );
        assert_eq!(eval_print(&mut interp, "(read-char (make-string-input-stream \"hello\" 2 4))"), "#\\l");
    }

    #[test]
    fn test_lisp_macro_character() {
        let mut interp = setup();
        interp
            .eval_string("(set-macro-character #\\! (lambda (stream char) (list 'bang (read stream t nil t))))")
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(read-from-string \"!x\")"), "(BANG X)");
        assert_eq!(
            eval_print(&mut interp, "(multiple-value-list (get-macro-character #\\())"),
            "(T NIL)"
        );
        assert_eq!(eval_print(&mut interp, "(functionp (get-macro-character #\\!))"), "T");
        assert_eq!(eval_print(&mut interp, "(get-macro-character #\\a)"), "NIL");
    }

    #[test]
    fn test_lisp_dispatch_macro() {
        let mut interp = setup();
        interp
            .eval_string("(set-dispatch-macro-character #\\# #\\! (lambda (stream sub arg) (list 'hash-bang arg)))")
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(read-from-string \"#3!\")"), "(HASH-BANG 3)");
        assert_eq!(eval_print(&mut interp, "(get-dispatch-macro-character #\\# #\\()"), "T");
        assert_eq!(eval_error(&mut interp, "(get-dispatch-macro-character #\\a #\\b)"), ErrorKind::ReaderError);
        assert_eq!(
            eval_error(&mut interp, "(set-dispatch-macro-character #\\% #\\x #'list)"),
            ErrorKind::ReaderError
        );
    }

    #[test]
    fn test_new_dispatch_character() {
        let mut interp = setup();
        interp
            .eval_string(
                "(make-dispatch-macro-character #\\%)
                 (set-dispatch-macro-character #\\% #\\k (lambda (s c n) :percent-k))",
            )
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(read-from-string \"%k\")"), ":PERCENT-K");
    }

    #[test]
    fn test_standard_readtable_is_protected() {
        let mut interp = setup();
        assert_eq!(
            eval_error(&mut interp, "(set-macro-character #\\! #'list nil nil)"),
            ErrorKind::ProgramError
        );
        assert_eq!(eval_print(&mut interp, "(readtablep (copy-readtable nil))"), "T");
    }

    #[test]
    fn test_readtable_case() {
        let mut interp = setup();
        assert_eq!(eval_print(&mut interp, "(readtable-case *readtable*)"), ":UPCASE");
        interp
            .eval_string("(setf (readtable-case *readtable*) :preserve)")
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(SYMBOL-NAME (READ-FROM-STRING \"Mixed\"))"), "\"Mixed\"");
        assert_eq!(
            eval_error(&mut interp, "(SETF (READTABLE-CASE *READTABLE*) :SIDEWAYS)"),
            ErrorKind::TypeError
        );
    }

    #[test]
    fn test_copy_readtable_isolates_changes() {
        let mut interp = setup();
        interp
            .eval_string(
                "(defvar *saved* (copy-readtable))
                 (set-macro-character #\\! (lambda (s c) :bang))",
            )
            .unwrap();
        assert_eq!(eval_print(&mut interp, "(read-from-string \"!\")"), ":BANG");
        assert_eq!(eval_print(&mut interp, "(get-macro-character #\\! *saved*)"), "NIL");
    }

    #[test]
    fn test_format_and_strings() {
        let mut interp = setup();
        assert_eq!(
            eval_print(&mut interp, "(format nil \"~A and ~S~%\" \"x\" \"y\")"),
            "\"x and \\\"y\\\"\n\""
        );
        assert_eq!(eval_print(&mut interp, "(prin1-to-string 'foo)"), "\"FOO\"");
        assert_eq!(eval_print(&mut interp, "(string= \"abc\" 'abc)"), "NIL");
        assert_eq!(eval_print(&mut interp, "(string= \"ABC\" 'abc)"), "T");
        assert_eq!(eval_error(&mut interp, "(format nil \"~Q\")"), ErrorKind::SimpleError);
    }

    #[test]
    fn test_error_signals_simple_error() {
        let mut interp = setup();
        match interp.eval_string("(error \"Bad thing: ~A\" 42)") {
            Err(ControlSignal::Error(c)) => {
                assert_eq!(c.kind(), ErrorKind::SimpleError);
                assert_eq!(c.message(), "Bad thing: 42");
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn test_vectors_and_arrays() {
        let mut interp = setup();
        assert_eq!(
            eval_print(&mut interp, "(let ((v (vector 1 2 3))) (setf (aref v 1) 'x) v)"),
            "#(1 X 3)"
        );
        assert_eq!(eval_print(&mut interp, "(aref \"hello\" 1)"), "#\\e");
        assert_eq!(eval_print(&mut interp, "(aref '#2A((1 2) (3 4)) 1 0)"), "3");
        assert_eq!(eval_error(&mut interp, "(svref (vector 1) 3)"), ErrorKind::TypeError);
        assert_eq!(eval_error(&mut interp, "(aref (vector 1 2) 0 0)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_interrupt_current_thread() {
        let mut interp = setup();
        interp.eval_string("(defvar *hit* nil)").unwrap();
        interp
            .eval_string("(interrupt-thread (current-thread) (lambda () (setq *hit* :yes)))")
            .unwrap();
        interp.eval_string("(list 1 2)").unwrap();
        assert_eq!(eval_print(&mut interp, "*hit*"), ":YES");
    }

    #[test]
    fn test_backtrace_lists_frames() {
        let mut interp = setup();
        interp.eval_string("(defun inner-frame () (backtrace))").unwrap();
        assert_eq!(eval_print(&mut interp, "(stringp (car (inner-frame)))"), "T");
    }

    #[test]
    fn test_defconstant_redefinition() {
        let mut interp = setup();
        interp.eval_string("(defconstant +limit+ 10)").unwrap();
        interp.eval_string("(defconstant +limit+ 10)").unwrap();
        assert_eq!(eval_error(&mut interp, "(defconstant +limit+ 11)"), ErrorKind::ProgramError);
    }

    #[test]
    fn test_defun_on_special_operator_rejected() {
        let mut interp = setup();
        assert_eq!(eval_error(&mut interp, "(defun if (x) x)"), ErrorKind::ProgramError);
    }
}
