// clcore Evaluator - Core Evaluation
//
// A recursive tree-walking interpreter. Non-local exits (THROW, RETURN-FROM,
// GO) and errors travel up the Rust call stack as `ControlSignal` values in
// the `Err` arm of `EvalResult`; the construct that established the target
// matches on its identity token and resumes.
//
// Multiple values use a side channel: `values` is `None` when the last
// evaluation produced exactly its primary value, and `Some(vec)` otherwise
// (`Some(vec![])` for zero values). Every `eval` clears it on entry.

use std::fmt;
use std::sync::Arc;

use crate::conditions::Condition;
use crate::context::{Runtime, StandardSymbols};
use crate::debug::{Backtrace, StackFrame};
use crate::environment::{BlockTag, Environment, SpecialStack, TagbodyTag, VariableLookup};
use crate::function::{Autoload, Closure, Expander, Function};
use crate::lambda_list::{LambdaList, LambdaListKind};
use crate::printer;
use crate::readtable::Readtable;
use crate::streams::Stream;
use crate::symbol::{Package, Symbol};
use crate::threads::LispThread;
use crate::types::Value;

/// Control flow signals for non-local exits
#[derive(thiserror::Error)]
pub enum ControlSignal {
    /// Runtime error
    #[error(transparent)]
    Error(Box<Condition>),
    /// Throw to the CATCH frame numbered `target`
    #[error("throw to {tag} escaped its catch")]
    Throw {
        target: u64,
        tag: Value,
        values: Vec<Value>,
    },
    /// Return from a BLOCK activation
    #[error("return from block {} escaped its extent", .block.name)]
    ReturnFrom {
        block: Arc<BlockTag>,
        values: Vec<Value>,
    },
    /// Jump to statement `index` of a TAGBODY activation
    #[error("go escaped its tagbody")]
    Go {
        tagbody: Arc<TagbodyTag>,
        index: usize,
    },
}

impl fmt::Debug for ControlSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlSignal::Error(c) => write!(f, "Error({:?})", c),
            ControlSignal::Throw { tag, values, .. } => write!(f, "Throw({:?}, {:?})", tag, values),
            ControlSignal::ReturnFrom { block, values } => {
                write!(f, "ReturnFrom({}, {:?})", block.name, values)
            }
            ControlSignal::Go { index, .. } => write!(f, "Go({})", index),
        }
    }
}

impl From<Condition> for ControlSignal {
    fn from(condition: Condition) -> Self {
        ControlSignal::Error(Box::new(condition))
    }
}

impl ControlSignal {
    /// The condition a top level reports for this signal. Exits that reach
    /// the top level have lost their target.
    pub fn into_condition(self) -> Condition {
        match self {
            ControlSignal::Error(c) => *c,
            other => Condition::control_error(other.to_string()),
        }
    }

    pub fn as_condition(&self) -> Option<&Condition> {
        match self {
            ControlSignal::Error(c) => Some(c),
            _ => None,
        }
    }
}

/// Result of evaluation
pub type EvalResult = Result<Value, ControlSignal>;

/// An active CATCH.
struct CatchFrame {
    tag: Value,
    id: u64,
}

/// The clcore interpreter: evaluator state for one host thread.
pub struct Interpreter {
    runtime: Arc<Runtime>,
    thread: Arc<LispThread>,
    specials: SpecialStack,
    values: Option<Vec<Value>>,
    catches: Vec<CatchFrame>,
    frames: Vec<StackFrame>,
    depth: usize,
    /// Stack address of the outermost `eval`.
    stack_base: usize,
    next_catch: u64,
}

impl Interpreter {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let thread = runtime.threads().current();
        Self {
            runtime,
            thread,
            specials: SpecialStack::new(),
            values: None,
            catches: Vec::new(),
            frames: Vec::new(),
            depth: 0,
            stack_base: 0,
            next_catch: 0,
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn thread(&self) -> &Arc<LispThread> {
        &self.thread
    }

    pub fn symbols(&self) -> &StandardSymbols {
        self.runtime.symbols()
    }

    pub fn t(&self) -> Value {
        Value::Symbol(self.symbols().t.clone())
    }

    pub fn boolean(&self, b: bool) -> Value {
        if b {
            self.t()
        } else {
            Value::Nil
        }
    }

    /// A symbol designated by `v`; NIL designates COMMON-LISP:NIL.
    pub fn symbol_of(&self, v: &Value) -> Option<Symbol> {
        match v {
            Value::Symbol(s) => Some(s.clone()),
            Value::Nil => Some(self.symbols().nil.clone()),
            _ => None,
        }
    }

    pub fn require_symbol(&self, v: &Value) -> Result<Symbol, ControlSignal> {
        self.symbol_of(v)
            .ok_or_else(|| Condition::type_error(v.clone(), "SYMBOL").into())
    }

    // ------------------------------------------------------------------
    // Multiple values
    // ------------------------------------------------------------------

    /// All values of the evaluation that just returned `primary`.
    pub fn capture_values(&mut self, primary: Value) -> Vec<Value> {
        match self.values.take() {
            Some(values) => values,
            None => vec![primary],
        }
    }

    /// Make `values` the current result; returns the primary value.
    pub fn restore_values(&mut self, values: Vec<Value>) -> Value {
        let primary = values.first().cloned().unwrap_or(Value::Nil);
        self.values = if values.len() == 1 { None } else { Some(values) };
        primary
    }

    /// Return several values from a primitive.
    pub fn set_values(&mut self, values: Vec<Value>) -> Value {
        self.restore_values(values)
    }

    pub fn clear_values(&mut self) {
        self.values = None;
    }

    pub fn returned_no_values(&self) -> bool {
        matches!(&self.values, Some(v) if v.is_empty())
    }

    // ------------------------------------------------------------------
    // Dynamic bindings
    // ------------------------------------------------------------------

    /// Current value of a special variable: innermost dynamic binding, else
    /// the global value cell.
    pub fn dynamic_value(&self, sym: &Symbol) -> Option<Value> {
        match self.specials.find(sym) {
            Some(binding) => binding.value(),
            None => sym.value(),
        }
    }

    pub fn set_dynamic_value(&mut self, sym: &Symbol, value: Value) {
        match self.specials.find(sym) {
            Some(binding) => binding.set_value(Some(value)),
            None => sym.set_value(value),
        }
    }

    /// Establish a dynamic binding. Pair with `restore_specials`.
    pub fn push_special(&mut self, sym: Symbol, value: Value) {
        self.specials.push(sym, Some(value));
    }

    /// Bind with no value (PROGV with fewer values than symbols).
    pub(crate) fn push_unbound_special(&mut self, sym: Symbol) {
        self.specials.push(sym, None);
    }

    pub(crate) fn specials_mark(&self) -> SpecialStack {
        self.specials.clone()
    }

    pub(crate) fn restore_specials(&mut self, mark: SpecialStack) {
        self.specials = mark;
    }

    /// Bind a variable in `env`, dynamically when it is special or declared
    /// special in `specials`.
    pub(crate) fn bind_variable(
        &mut self,
        sym: &Symbol,
        value: Value,
        env: &Environment,
        specials: &[Symbol],
    ) -> Result<(), ControlSignal> {
        if sym.is_constant() {
            return Err(Condition::program_error(format!("Cannot bind constant {}", sym))
                .with_datum(Value::Symbol(sym.clone()))
                .into());
        }
        if sym.is_special() || specials.contains(sym) {
            env.declare_special(sym);
            self.push_special(sym.clone(), value);
        } else {
            env.bind(sym.clone(), value);
        }
        Ok(())
    }

    /// Run `f` and undo any dynamic bindings it established, however it exits.
    pub fn with_dynamic_extent<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, ControlSignal>,
    ) -> Result<T, ControlSignal> {
        let mark = self.specials_mark();
        let result = f(self);
        self.restore_specials(mark);
        result
    }

    pub fn current_package(&self) -> Arc<Package> {
        match self.dynamic_value(&self.symbols().package_var) {
            Some(Value::Package(p)) => p,
            _ => Arc::clone(self.runtime.packages().cl_user()),
        }
    }

    pub fn current_readtable(&self) -> Arc<Readtable> {
        match self.dynamic_value(&self.symbols().readtable_var) {
            Some(Value::Readtable(rt)) => rt,
            _ => self.runtime.standard_readtable(),
        }
    }

    pub fn standard_input(&self) -> Option<Arc<Stream>> {
        match self.dynamic_value(&self.symbols().standard_input) {
            Some(Value::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn prin1(&self, value: &Value) -> String {
        printer::prin1_to_string(value, Some(&self.current_package()))
    }

    pub fn princ(&self, value: &Value) -> String {
        printer::princ_to_string(value, Some(&self.current_package()))
    }

    pub fn gensym(&self, prefix: &str) -> Symbol {
        Symbol::uninterned(&format!("{}{}", prefix, self.runtime.next_gensym()))
    }

    // ------------------------------------------------------------------
    // Debugging
    // ------------------------------------------------------------------

    /// Snapshot of the active calls, innermost first.
    pub fn backtrace(&self) -> Backtrace {
        Backtrace::capture(&self.frames, self.runtime.config().backtrace_limit)
    }

    pub fn eval_depth(&self) -> usize {
        self.depth
    }

    /// Run queued interrupts, in order.
    pub fn check_interrupts(&mut self) -> Result<(), ControlSignal> {
        if !self.thread.is_interrupted() {
            return Ok(());
        }
        for interrupt in self.thread.take_interrupts() {
            tracing::debug!(thread = %self.thread.name(), function = ?interrupt.function, "running interrupt");
            self.apply_function(&interrupt.function, &interrupt.args)?;
        }
        self.values = None;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Evaluation
    // ------------------------------------------------------------------

    pub fn eval(&mut self, form: &Value, env: &Environment) -> EvalResult {
        self.values = None;
        self.check_interrupts()?;
        match form {
            Value::Symbol(sym) => self.eval_symbol(sym, env),
            Value::Cons(_) => {
                self.check_resources()?;
                self.depth += 1;
                let result = self.eval_compound(form, env);
                self.depth -= 1;
                result
            }
            other => Ok(other.clone()),
        }
    }

    fn check_resources(&mut self) -> Result<(), ControlSignal> {
        let config = self.runtime.config();
        if self.depth >= config.max_eval_depth {
            return Err(Condition::storage_condition(config.max_eval_depth).into());
        }
        let here = stack_address();
        if self.depth == 0 {
            self.stack_base = here;
        } else if here.abs_diff(self.stack_base) > config.max_stack_bytes {
            return Err(Condition::stack_exhausted(config.max_stack_bytes).into());
        }
        Ok(())
    }

    fn eval_symbol(&mut self, sym: &Symbol, env: &Environment) -> EvalResult {
        match env.lookup_variable(sym) {
            VariableLookup::Lexical(value) => Ok(value),
            VariableLookup::Special | VariableLookup::Free => self
                .dynamic_value(sym)
                .ok_or_else(|| Condition::unbound_variable(Value::Symbol(sym.clone())).into()),
        }
    }

    /// Evaluate forms in order, returning the last form's values.
    pub fn eval_sequence(&mut self, forms: &[Value], env: &Environment) -> EvalResult {
        let Some((last, init)) = forms.split_last() else {
            self.values = None;
            return Ok(Value::Nil);
        };
        for form in init {
            self.eval(form, env)?;
        }
        self.eval(last, env)
    }

    /// Evaluate a list of forms (an implicit PROGN).
    pub fn eval_body(&mut self, body: &Value, env: &Environment) -> EvalResult {
        let forms = self.form_list(body)?;
        self.eval_sequence(&forms, env)
    }

    /// The elements of a proper list of forms.
    pub fn form_list(&self, list: &Value) -> Result<Vec<Value>, ControlSignal> {
        list.list_to_vec().ok_or_else(|| {
            Condition::program_error(format!("{} is not a proper list of forms", list)).into()
        })
    }

    /// Lexical function binding, else the global function cell.
    pub fn function_binding(&self, sym: &Symbol, env: &Environment) -> Option<Function> {
        env.lookup_function(sym).or_else(|| sym.function())
    }

    fn eval_compound(&mut self, form: &Value, env: &Environment) -> EvalResult {
        let (head, args) = match form {
            Value::Cons(c) => (c.car(), c.cdr()),
            _ => return Ok(form.clone()),
        };

        match &head {
            Value::Symbol(sym) => {
                let function = self
                    .function_binding(sym, env)
                    .ok_or_else(|| Condition::undefined_function(head.clone()))?;
                match function {
                    Function::SpecialOperator(op) => (op.func)(self, &args, env),
                    Function::Macro(m) => {
                        let expansion = self.call_expander(&m.expander, form, env)?;
                        self.eval(&expansion, env)
                    }
                    Function::Autoload(placeholder) => {
                        self.resolve_autoload(&placeholder)?;
                        self.eval_compound(form, env)
                    }
                    function => {
                        let argv = self.eval_arguments(&args, env)?;
                        self.apply_named(&function, head.clone(), &argv)
                    }
                }
            }
            Value::Cons(lambda) if self.is_lambda_head(&lambda.car()) => {
                let function = self.make_lambda(&head, env)?;
                let argv = self.eval_arguments(&args, env)?;
                self.apply_named(&function, head.clone(), &argv)
            }
            _ => Err(Condition::program_error(format!("Illegal function object: {}", head))
                .with_datum(head.clone())
                .into()),
        }
    }

    fn is_lambda_head(&self, v: &Value) -> bool {
        matches!(v, Value::Symbol(s) if *s == self.symbols().lambda)
    }

    /// Evaluate call arguments left to right.
    pub fn eval_arguments(&mut self, args: &Value, env: &Environment) -> Result<Vec<Value>, ControlSignal> {
        let forms = self.form_list(args)?;
        let mut values = Vec::with_capacity(forms.len());
        for form in &forms {
            values.push(self.eval(form, env)?);
        }
        Ok(values)
    }

    // ------------------------------------------------------------------
    // Application
    // ------------------------------------------------------------------

    /// Apply a function object to evaluated arguments.
    pub fn apply_function(&mut self, function: &Function, args: &[Value]) -> EvalResult {
        let operator = match function.name() {
            Some(name) => Value::Symbol(name.clone()),
            None => Value::Function(function.clone()),
        };
        self.apply_named(function, operator, args)
    }

    fn apply_named(&mut self, function: &Function, operator: Value, args: &[Value]) -> EvalResult {
        self.values = None;
        self.frames.push(StackFrame {
            operator,
            arguments: args.to_vec(),
        });
        let mut result = self.apply_inner(function, args);
        if let Err(ControlSignal::Error(condition)) = &mut result {
            if condition.backtrace().is_none() && self.runtime.config().capture_backtraces {
                condition.set_backtrace(self.backtrace());
            }
        }
        self.frames.pop();
        result
    }

    fn apply_inner(&mut self, function: &Function, args: &[Value]) -> EvalResult {
        match function {
            Function::Primitive(p) => {
                if !p.arity.accepts(args.len()) {
                    return Err(Condition::wrong_number_of_arguments(p.name.name(), args.len(), p.arity).into());
                }
                let result = (p.func)(self, args);
                if !p.multiple_values {
                    self.values = None;
                }
                result
            }
            Function::Closure(c) => self.apply_closure(c, args),
            Function::Autoload(placeholder) => {
                let real = self.resolve_autoload(placeholder)?;
                self.apply_inner(&real, args)
            }
            Function::SpecialOperator(_) | Function::Macro(_) => {
                let name = function
                    .name()
                    .map_or(Value::Function(function.clone()), |s| Value::Symbol(s.clone()));
                Err(Condition::undefined_function(name).into())
            }
        }
    }

    fn apply_closure(&mut self, closure: &Arc<Closure>, args: &[Value]) -> EvalResult {
        let env = closure.env.extend();
        for sym in &closure.specials {
            env.declare_special(sym);
        }
        self.with_dynamic_extent(|interp| {
            let name = closure.name.as_ref().map_or("(LAMBDA)", |s| s.name());
            if closure.macro_expander {
                let (form, lexenv) = match args {
                    [form, Value::Environment(e)] => (form, e.clone()),
                    [form, _] | [form] => (form, Environment::new()),
                    _ => {
                        return Err(Condition::wrong_number_of_arguments(
                            name,
                            args.len(),
                            crate::function::Arity::range(1, 2),
                        )
                        .into())
                    }
                };
                let form_args = form.cdr().unwrap_or(Value::Nil);
                interp.bind_destructuring(
                    &closure.lambda_list,
                    &form_args,
                    form,
                    &lexenv,
                    &env,
                    &closure.specials,
                    name,
                )?;
            } else {
                interp.bind_arguments(&closure.lambda_list, args, &env, &closure.specials, name)?;
            }
            match &closure.block {
                Some(block) => interp.run_block(block, &closure.body, &env),
                None => interp.eval_sequence(&closure.body, &env),
            }
        })
    }

    /// Evaluate `body` inside a fresh BLOCK named `name`.
    pub(crate) fn run_block(&mut self, name: &Symbol, body: &[Value], env: &Environment) -> EvalResult {
        let tag = BlockTag::new(name.clone());
        let block_env = env.extend();
        block_env.add_block(Arc::clone(&tag));
        let result = self.eval_sequence(body, &block_env);
        tag.deactivate();
        match result {
            Err(ControlSignal::ReturnFrom { block, values }) if Arc::ptr_eq(&block, &tag) => {
                Ok(self.restore_values(values))
            }
            other => other,
        }
    }

    /// Resolve a function designator: a function object, or a symbol whose
    /// global function cell holds an ordinary function.
    pub fn designated_function(&mut self, designator: &Value) -> Result<Function, ControlSignal> {
        match designator {
            Value::Function(f) => Ok(f.clone()),
            Value::Symbol(_) | Value::Nil => {
                let sym = self.require_symbol(designator)?;
                match sym.function() {
                    Some(Function::Autoload(placeholder)) => self.resolve_autoload(&placeholder),
                    Some(f) if f.is_callable() => Ok(f),
                    _ => Err(Condition::undefined_function(designator.clone()).into()),
                }
            }
            other => Err(Condition::type_error(other.clone(), "(OR FUNCTION SYMBOL)").into()),
        }
    }

    /// FUNCALL
    pub fn funcall(&mut self, designator: &Value, args: &[Value]) -> EvalResult {
        let function = self.designated_function(designator)?;
        self.apply_function(&function, args)
    }

    // ------------------------------------------------------------------
    // Closures
    // ------------------------------------------------------------------

    /// Split leading declarations (and a docstring when `allow_doc`) from a
    /// body, collecting names declared SPECIAL.
    pub(crate) fn parse_body(
        &self,
        body: &Value,
        allow_doc: bool,
    ) -> Result<(Vec<Value>, Vec<Symbol>), ControlSignal> {
        let forms = self.form_list(body)?;
        let declare = &self.symbols().declare;
        let special = &self.symbols().special;
        let mut specials = Vec::new();
        let mut start = 0;
        while start < forms.len() {
            let form = &forms[start];
            if allow_doc && matches!(form, Value::String(_)) && start + 1 < forms.len() {
                start += 1;
                continue;
            }
            let is_declare = matches!(form.car(), Some(Value::Symbol(s)) if s == *declare);
            if !is_declare {
                break;
            }
            for spec in form.cdr().unwrap_or(Value::Nil).iter() {
                if matches!(spec.car(), Some(Value::Symbol(s)) if s == *special) {
                    for name in spec.cdr().unwrap_or(Value::Nil).iter() {
                        let sym = self.require_symbol(&name)?;
                        if !specials.contains(&sym) {
                            specials.push(sym);
                        }
                    }
                }
            }
            start += 1;
        }
        Ok((forms[start..].to_vec(), specials))
    }

    /// Build a closure over `env`. A `block` name wraps the body in an
    /// implicit BLOCK.
    pub(crate) fn make_closure(
        &self,
        name: Option<Symbol>,
        block: Option<Symbol>,
        lambda_list: &Value,
        body: &Value,
        env: &Environment,
        kind: LambdaListKind,
    ) -> Result<Function, ControlSignal> {
        let ll = LambdaList::parse(lambda_list, kind, self.runtime.packages())?;
        let (forms, specials) = self.parse_body(body, true)?;
        Ok(Function::Closure(Arc::new(Closure {
            name,
            lambda_list: ll,
            body: forms,
            specials,
            env: env.clone(),
            block,
            macro_expander: kind == LambdaListKind::Macro,
        })))
    }

    /// Close over a `(LAMBDA ll . body)` form.
    pub(crate) fn make_lambda(&self, form: &Value, env: &Environment) -> Result<Function, ControlSignal> {
        let rest = form.cdr().unwrap_or(Value::Nil);
        let Some(ll) = rest.car() else {
            return Err(Condition::program_error(format!("Malformed LAMBDA: {}", form)).into());
        };
        let body = rest.cdr().unwrap_or(Value::Nil);
        self.make_closure(None, None, &ll, &body, env, LambdaListKind::Ordinary)
    }

    // ------------------------------------------------------------------
    // Macros
    // ------------------------------------------------------------------

    pub(crate) fn call_expander(&mut self, expander: &Expander, form: &Value, env: &Environment) -> EvalResult {
        let expansion = match expander {
            Expander::Native(f) => f(self, form, env)?,
            Expander::Lisp(function) => {
                let args = [form.clone(), Value::Environment(env.clone())];
                self.apply_function(function, &args)?
            }
        };
        self.values = None;
        Ok(expansion)
    }

    /// Expand `form` once. The flag reports whether expansion happened.
    pub fn macroexpand_1(&mut self, form: &Value, env: &Environment) -> Result<(Value, bool), ControlSignal> {
        let Some(Value::Symbol(sym)) = form.car() else {
            return Ok((form.clone(), false));
        };
        let function = match self.function_binding(&sym, env) {
            Some(Function::Autoload(placeholder)) => self.resolve_autoload(&placeholder)?,
            Some(f) => f,
            None => return Ok((form.clone(), false)),
        };
        match &function {
            Function::Macro(m) => Ok((self.call_expander(&m.expander, form, env)?, true)),
            Function::SpecialOperator(op) => match op.expander {
                Some(expander) => Ok((self.call_expander(&Expander::Native(expander), form, env)?, true)),
                None => Ok((form.clone(), false)),
            },
            _ => Ok((form.clone(), false)),
        }
    }

    /// Expand until the head is no longer a macro.
    pub fn macroexpand(&mut self, form: &Value, env: &Environment) -> Result<(Value, bool), ControlSignal> {
        let mut current = form.clone();
        let mut expanded = false;
        loop {
            let (next, changed) = self.macroexpand_1(&current, env)?;
            if !changed {
                return Ok((current, expanded));
            }
            expanded = true;
            current = next;
        }
    }

    // ------------------------------------------------------------------
    // Autoload
    // ------------------------------------------------------------------

    /// Load the definition behind an autoload placeholder (once) and return
    /// the function that replaced it.
    pub fn resolve_autoload(&mut self, placeholder: &Arc<Autoload>) -> Result<Function, ControlSignal> {
        let sym = placeholder.symbol.clone();
        if placeholder.begin_load() {
            tracing::debug!(symbol = %sym, source = %placeholder.source, "autoloading");
            let hook = self.runtime.autoload_hook();
            let saved = self.values.take();
            if let Err(e) = (hook.as_ref())(self, placeholder.as_ref()) {
                placeholder.abandon_load();
                tracing::warn!(symbol = %sym, source = %placeholder.source, "autoload failed");
                return Err(e);
            }
            self.values = saved;
        }
        match sym.function() {
            Some(Function::Autoload(current)) if Arc::ptr_eq(&current, placeholder) => Err(Condition::undefined_function(
                Value::Symbol(sym.clone()),
            )
            .with_operands(vec![Value::string(placeholder.source.as_str())])
            .into()),
            Some(Function::Autoload(other)) => self.resolve_autoload(&other),
            Some(f) => Ok(f),
            None => Err(Condition::undefined_function(Value::Symbol(sym)).into()),
        }
    }

    // ------------------------------------------------------------------
    // CATCH support
    // ------------------------------------------------------------------

    pub(crate) fn push_catch(&mut self, tag: Value) -> u64 {
        self.next_catch += 1;
        let id = self.next_catch;
        self.catches.push(CatchFrame { tag, id });
        id
    }

    pub(crate) fn pop_catch(&mut self, id: u64) {
        if let Some(pos) = self.catches.iter().rposition(|c| c.id == id) {
            self.catches.truncate(pos);
        }
    }

    /// Innermost active catch whose tag is EQ to `tag`.
    pub(crate) fn find_catch(&self, tag: &Value) -> Option<u64> {
        self.catches
            .iter()
            .rev()
            .find(|c| crate::types::eq(&c.tag, tag))
            .map(|c| c.id)
    }

    // ------------------------------------------------------------------
    // Source evaluation
    // ------------------------------------------------------------------

    /// Read and evaluate every form in `source`; returns the last result
    /// with its multiple values intact.
    pub fn eval_string(&mut self, source: &str) -> EvalResult {
        let stream = Stream::from_string(source);
        self.eval_stream(&stream)
    }

    fn eval_stream(&mut self, stream: &Arc<Stream>) -> EvalResult {
        let mut result = Value::Nil;
        let mut values = None;
        loop {
            let form = self.read_from_stream(stream, false, Value::Eof)?;
            if matches!(form, Value::Eof) {
                self.values = values;
                return Ok(result);
            }
            result = self.eval(&form, &Environment::new())?;
            values = self.values.take();
        }
    }

    /// LOAD semantics over source text: *PACKAGE* and *READTABLE* are
    /// rebound around the load.
    pub fn load_source(&mut self, source: &str) -> EvalResult {
        let package = Value::Package(self.current_package());
        let readtable = Value::Readtable(self.current_readtable());
        let package_var = self.symbols().package_var.clone();
        let readtable_var = self.symbols().readtable_var.clone();
        self.with_dynamic_extent(|interp| {
            interp.push_special(package_var, package);
            interp.push_special(readtable_var, readtable);
            interp.eval_string(source)?;
            interp.values = None;
            Ok(interp.t())
        })
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.runtime.threads().release(&self.thread);
    }
}

/// Address of a local in the caller's frame.
#[inline(never)]
fn stack_address() -> usize {
    let marker = 0u8;
    std::hint::black_box(&marker) as *const u8 as usize
}
