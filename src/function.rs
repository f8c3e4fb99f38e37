// clcore Functional Bindings
//
// What can live in a symbol's function cell: native primitives, closures,
// special operators, macros and autoload placeholders.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::environment::Environment;
use crate::eval::{EvalResult, Interpreter};
use crate::lambda_list::LambdaList;
use crate::symbol::Symbol;
use crate::types::Value;

/// Native implementation of a primitive. Arguments are already evaluated.
pub type PrimitiveFn = fn(&mut Interpreter, &[Value]) -> EvalResult;

/// Native special operator: receives the unevaluated argument forms.
pub type SpecialFn = fn(&mut Interpreter, &Value, &Environment) -> EvalResult;

/// Native macro expander: receives the whole form.
pub type ExpanderFn = fn(&mut Interpreter, &Value, &Environment) -> EvalResult;

/// Accepted argument counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    pub max: Option<usize>,
}

impl Arity {
    pub const fn exactly(n: usize) -> Self {
        Self { min: n, max: Some(n) }
    }

    pub const fn range(min: usize, max: usize) -> Self {
        Self { min, max: Some(max) }
    }

    pub const fn at_least(min: usize) -> Self {
        Self { min, max: None }
    }

    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

pub struct Primitive {
    pub name: Symbol,
    pub arity: Arity,
    pub func: PrimitiveFn,
    /// The primitive may leave extra values in the values channel.
    pub multiple_values: bool,
}

pub struct Closure {
    pub name: Option<Symbol>,
    pub lambda_list: LambdaList,
    /// Body forms, declarations removed.
    pub body: Vec<Value>,
    /// Names declared special in the body's declarations.
    pub specials: Vec<Symbol>,
    pub env: Environment,
    /// Name of the implicit block around the body.
    pub block: Option<Symbol>,
    /// Called as `(form env)` and destructures the form's arguments.
    pub macro_expander: bool,
}

pub struct SpecialOperator {
    pub name: Symbol,
    pub func: SpecialFn,
    /// Equivalent macro definition, for code walkers.
    pub expander: Option<ExpanderFn>,
}

#[derive(Clone)]
pub enum Expander {
    Native(ExpanderFn),
    Lisp(Function),
}

pub struct Macro {
    pub name: Option<Symbol>,
    pub expander: Expander,
}

/// Placeholder that loads the real definition on first use.
pub struct Autoload {
    pub symbol: Symbol,
    pub source: String,
    loading: AtomicBool,
    loads: AtomicUsize,
}

impl Autoload {
    pub fn new(symbol: Symbol, source: impl Into<String>) -> Self {
        Self {
            symbol,
            source: source.into(),
            loading: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    /// Claim the right to run the load. Only one caller wins.
    pub(crate) fn begin_load(&self) -> bool {
        let won = self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.loads.fetch_add(1, Ordering::AcqRel);
        }
        won
    }

    /// Allow another attempt after a failed load.
    pub(crate) fn abandon_load(&self) {
        self.loading.store(false, Ordering::Release);
    }

    /// How many times loading was started.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Acquire)
    }
}

#[derive(Clone)]
pub enum Function {
    Primitive(Arc<Primitive>),
    Closure(Arc<Closure>),
    SpecialOperator(Arc<SpecialOperator>),
    Macro(Arc<Macro>),
    Autoload(Arc<Autoload>),
}

impl Function {
    pub fn name(&self) -> Option<&Symbol> {
        match self {
            Function::Primitive(p) => Some(&p.name),
            Function::Closure(c) => c.name.as_ref(),
            Function::SpecialOperator(s) => Some(&s.name),
            Function::Macro(m) => m.name.as_ref(),
            Function::Autoload(a) => Some(&a.symbol),
        }
    }

    /// Can be passed to FUNCALL/APPLY.
    pub fn is_callable(&self) -> bool {
        matches!(self, Function::Primitive(_) | Function::Closure(_))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Primitive(a), Function::Primitive(b)) => Arc::ptr_eq(a, b),
            (Function::Closure(a), Function::Closure(b)) => Arc::ptr_eq(a, b),
            (Function::SpecialOperator(a), Function::SpecialOperator(b)) => Arc::ptr_eq(a, b),
            (Function::Macro(a), Function::Macro(b)) => Arc::ptr_eq(a, b),
            (Function::Autoload(a), Function::Autoload(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Function::Primitive(_) => "FUNCTION",
            Function::Closure(c) if c.macro_expander => "MACRO-FUNCTION",
            Function::Closure(_) => "FUNCTION",
            Function::SpecialOperator(_) => "SPECIAL-OPERATOR",
            Function::Macro(_) => "MACRO",
            Function::Autoload(_) => "AUTOLOAD",
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "#<{} {}>", self.kind_name(), name),
            None => write!(f, "#<{} (LAMBDA)>", self.kind_name()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arity() {
        assert!(Arity::exactly(2).accepts(2));
        assert!(!Arity::exactly(2).accepts(3));
        assert!(Arity::range(1, 3).accepts(3));
        assert!(!Arity::range(1, 3).accepts(0));
        assert!(Arity::at_least(1).accepts(100));
    }

    #[test]
    fn test_autoload_single_claim() {
        let a = Autoload::new(Symbol::uninterned("F"), "mod");
        assert!(a.begin_load());
        assert!(!a.begin_load());
        assert_eq!(a.load_count(), 1);
        a.abandon_load();
        assert!(a.begin_load());
        assert_eq!(a.load_count(), 2);
    }
}
