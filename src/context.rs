// clcore Runtime Context
//
// The one explicit object holding process-wide state: packages, standard
// symbols, the standard readtable, the thread registry, the gensym counter
// and the autoload hook. Construction order is fixed:
//
//   1. packages (KEYWORD, COMMON-LISP, COMMON-LISP-USER, SYSTEM)
//   2. standard symbols, constants and special variables
//   3. special operators, then built-in macros, then primitives

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::conditions::Condition;
use crate::config::RuntimeConfig;
use crate::eval::{ControlSignal, Interpreter};
use crate::function::{
    Arity, Autoload, Expander, ExpanderFn, Function, Macro, Primitive, PrimitiveFn, SpecialFn,
    SpecialOperator,
};
use crate::readtable::Readtable;
use crate::streams::Stream;
use crate::symbol::{PackageRegistry, Symbol};
use crate::threads::ThreadRegistry;
use crate::types::{read_lock, write_lock, Value};
use crate::{control, macros, primitives, special_forms};

/// Loads the definition behind an autoload placeholder.
pub type AutoloadHook = Arc<dyn Fn(&mut Interpreter, &Autoload) -> Result<(), ControlSignal> + Send + Sync>;

/// Symbols the runtime refers to directly.
pub struct StandardSymbols {
    pub nil: Symbol,
    pub t: Symbol,
    pub quote: Symbol,
    pub function: Symbol,
    pub lambda: Symbol,
    pub named_lambda: Symbol,
    pub macro_lambda: Symbol,
    pub progn: Symbol,
    pub declare: Symbol,
    pub special: Symbol,
    pub backquote: Symbol,
    pub comma: Symbol,
    pub comma_at: Symbol,
    pub comma_dot: Symbol,
    pub kw_allow_other_keys: Symbol,
    pub package_var: Symbol,
    pub readtable_var: Symbol,
    pub read_base: Symbol,
    pub read_eval: Symbol,
    pub read_suppress: Symbol,
    pub features: Symbol,
    pub standard_input: Symbol,
}

impl StandardSymbols {
    fn new(packages: &PackageRegistry) -> Self {
        Self {
            nil: packages.intern_cl("NIL"),
            t: packages.intern_cl("T"),
            quote: packages.intern_cl("QUOTE"),
            function: packages.intern_cl("FUNCTION"),
            lambda: packages.intern_cl("LAMBDA"),
            named_lambda: packages.intern_sys("NAMED-LAMBDA"),
            macro_lambda: packages.intern_sys("MACRO-LAMBDA"),
            progn: packages.intern_cl("PROGN"),
            declare: packages.intern_cl("DECLARE"),
            special: packages.intern_cl("SPECIAL"),
            backquote: packages.intern_sys("BACKQUOTE"),
            comma: packages.intern_sys(","),
            comma_at: packages.intern_sys(",@"),
            comma_dot: packages.intern_sys(",."),
            kw_allow_other_keys: packages.intern_keyword("ALLOW-OTHER-KEYS"),
            package_var: packages.intern_cl("*PACKAGE*"),
            readtable_var: packages.intern_cl("*READTABLE*"),
            read_base: packages.intern_cl("*READ-BASE*"),
            read_eval: packages.intern_cl("*READ-EVAL*"),
            read_suppress: packages.intern_cl("*READ-SUPPRESS*"),
            features: packages.intern_cl("*FEATURES*"),
            standard_input: packages.intern_cl("*STANDARD-INPUT*"),
        }
    }
}

/// Process-wide runtime state.
pub struct Runtime {
    config: RuntimeConfig,
    packages: PackageRegistry,
    symbols: StandardSymbols,
    standard_readtable: Arc<Readtable>,
    threads: ThreadRegistry,
    gensym_counter: AtomicU64,
    autoload_hook: RwLock<AutoloadHook>,
    deferred_sources: Mutex<HashMap<String, String>>,
}

impl Runtime {
    pub fn new() -> Arc<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Arc<Self> {
        let packages = PackageRegistry::new();
        let symbols = StandardSymbols::new(&packages);
        let runtime = Arc::new(Self {
            config,
            packages,
            symbols,
            standard_readtable: Arc::new(Readtable::standard()),
            threads: ThreadRegistry::new(),
            gensym_counter: AtomicU64::new(1),
            autoload_hook: RwLock::new(Arc::new(default_autoload_hook)),
            deferred_sources: Mutex::new(HashMap::new()),
        });
        runtime.init_variables();
        special_forms::install(&runtime);
        control::install(&runtime);
        macros::install(&runtime);
        primitives::install(&runtime);
        tracing::debug!(
            packages = runtime.packages.list_all_packages().len(),
            "runtime initialised"
        );
        runtime
    }

    fn init_variables(&self) {
        let s = &self.symbols;
        s.nil.set_value(Value::Nil);
        s.nil.set_constant();
        s.t.set_value(Value::Symbol(s.t.clone()));
        s.t.set_constant();

        let features = self
            .config
            .features
            .iter()
            .map(|f| Value::Symbol(self.packages.intern_keyword(f)))
            .collect::<Vec<_>>();
        let t = Value::Symbol(s.t.clone());
        let read_eval = if self.config.read_eval { t } else { Value::Nil };

        let specials = [
            (&s.package_var, Value::Package(Arc::clone(self.packages.cl_user()))),
            (&s.readtable_var, Value::Readtable(Arc::new(self.standard_readtable.copy()))),
            (&s.read_base, Value::Fixnum(10)),
            (&s.read_eval, read_eval),
            (&s.read_suppress, Value::Nil),
            (&s.features, Value::list(features)),
            (&s.standard_input, Value::Stream(Stream::stdin())),
        ];
        for (sym, value) in specials {
            sym.set_special();
            sym.set_value(value);
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn packages(&self) -> &PackageRegistry {
        &self.packages
    }

    pub fn symbols(&self) -> &StandardSymbols {
        &self.symbols
    }

    pub fn threads(&self) -> &ThreadRegistry {
        &self.threads
    }

    /// The pristine standard readtable (never modified).
    pub fn standard_readtable(&self) -> Arc<Readtable> {
        Arc::clone(&self.standard_readtable)
    }

    /// An evaluator for the calling host thread.
    pub fn interpreter(self: &Arc<Self>) -> Interpreter {
        Interpreter::new(Arc::clone(self))
    }

    pub fn next_gensym(&self) -> u64 {
        self.gensym_counter.fetch_add(1, Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Autoload
    // ------------------------------------------------------------------

    pub fn autoload_hook(&self) -> AutoloadHook {
        Arc::clone(&read_lock(&self.autoload_hook))
    }

    pub fn set_autoload_hook(&self, hook: AutoloadHook) {
        *write_lock(&self.autoload_hook) = hook;
    }

    /// Source text the default autoload hook uses for module `name`.
    pub fn register_deferred_source(&self, name: &str, source: &str) {
        self.deferred_sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), source.to_string());
    }

    fn deferred_source(&self, name: &str) -> Option<String> {
        self.deferred_sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Install an autoload placeholder for `name`.
    pub fn autoload(&self, name: &Symbol, source: &str) -> Arc<Autoload> {
        let placeholder = Arc::new(Autoload::new(name.clone(), source));
        name.set_function(Some(Function::Autoload(Arc::clone(&placeholder))));
        placeholder
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    fn install(&self, sym: &Symbol, function: Function) {
        sym.set_function(Some(function));
    }

    pub fn define_primitive(&self, sym: &Symbol, arity: Arity, func: PrimitiveFn) {
        self.install(
            sym,
            Function::Primitive(Arc::new(Primitive {
                name: sym.clone(),
                arity,
                func,
                multiple_values: false,
            })),
        );
    }

    /// A primitive that may return other than exactly one value.
    pub fn define_values_primitive(&self, sym: &Symbol, arity: Arity, func: PrimitiveFn) {
        self.install(
            sym,
            Function::Primitive(Arc::new(Primitive {
                name: sym.clone(),
                arity,
                func,
                multiple_values: true,
            })),
        );
    }

    pub fn define_special_operator(&self, sym: &Symbol, func: SpecialFn, expander: Option<ExpanderFn>) {
        self.install(
            sym,
            Function::SpecialOperator(Arc::new(SpecialOperator {
                name: sym.clone(),
                func,
                expander,
            })),
        );
    }

    pub fn define_macro(&self, sym: &Symbol, expander: ExpanderFn) {
        self.install(
            sym,
            Function::Macro(Arc::new(Macro {
                name: Some(sym.clone()),
                expander: Expander::Native(expander),
            })),
        );
    }
}

/// Loads a registered deferred source, else a file named by the placeholder
/// (with `.lisp` appended when the bare name does not exist).
fn default_autoload_hook(interp: &mut Interpreter, placeholder: &Autoload) -> Result<(), ControlSignal> {
    let name = placeholder.source.as_str();
    let text = match interp.runtime().deferred_source(name) {
        Some(text) => text,
        None => {
            let path = Path::new(name);
            let with_ext = format!("{}.lisp", name);
            let path = if path.exists() { path } else { Path::new(&with_ext) };
            fs::read_to_string(path).map_err(|e| {
                Condition::stream_error(format!("Cannot autoload {} from {}: {}", placeholder.symbol, name, e))
                    .with_datum(Value::Symbol(placeholder.symbol.clone()))
            })?
        }
    };
    interp.load_source(&text)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_specials() {
        let runtime = Runtime::new();
        let interp = runtime.interpreter();
        assert_eq!(interp.current_package().name(), "COMMON-LISP-USER");
        assert!(runtime.symbols().read_base.is_special());
        assert!(matches!(runtime.symbols().read_base.value(), Some(Value::Fixnum(10))));
        let features = runtime.symbols().features.value().unwrap();
        assert_eq!(features.list_length(), Some(3));
    }

    #[test]
    fn test_readtable_is_a_copy_of_standard() {
        let runtime = Runtime::new();
        let interp = runtime.interpreter();
        assert!(!Arc::ptr_eq(&interp.current_readtable(), &runtime.standard_readtable()));
    }

    #[test]
    fn test_constants() {
        let runtime = Runtime::new();
        assert!(runtime.symbols().t.is_constant());
        assert!(runtime.symbols().nil.is_constant());
    }

    #[test]
    fn test_interpreters_share_thread() {
        let runtime = Runtime::new();
        let a = runtime.interpreter();
        let b = runtime.interpreter();
        assert!(Arc::ptr_eq(a.thread(), b.thread()));
    }

    #[test]
    fn test_gensym_counter_increases() {
        let runtime = Runtime::new();
        let first = runtime.next_gensym();
        assert!(runtime.next_gensym() > first);
    }
}
