// clcore Symbols and Packages
//
// Symbols are shared handles compared by identity. The package registry owns
// the name -> package map; each package keeps concurrent symbol tables so that
// lookups never block, while creating a new symbol takes the package's intern
// lock.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use dashmap::DashMap;

use crate::conditions::Condition;
use crate::function::Function;
use crate::types::{read_lock, write_lock, Value};

const FLAG_SPECIAL: u8 = 0b01;
const FLAG_CONSTANT: u8 = 0b10;

/// Handle to a symbol. Cloning is cheap; equality is identity.
#[derive(Clone)]
pub struct Symbol(Arc<SymbolData>);

pub struct SymbolData {
    name: Arc<str>,
    package: RwLock<Option<Weak<Package>>>,
    value: RwLock<Option<Value>>,
    function: RwLock<Option<Function>>,
    plist: RwLock<Value>,
    flags: AtomicU8,
}

impl Symbol {
    /// Create a fresh, uninterned symbol.
    pub fn uninterned(name: &str) -> Self {
        Symbol(Arc::new(SymbolData {
            name: Arc::from(name),
            package: RwLock::new(None),
            value: RwLock::new(None),
            function: RwLock::new(None),
            plist: RwLock::new(Value::Nil),
            flags: AtomicU8::new(0),
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Home package, `None` once uninterned.
    pub fn package(&self) -> Option<Arc<Package>> {
        read_lock(&self.0.package).as_ref().and_then(Weak::upgrade)
    }

    fn set_package(&self, pkg: &Arc<Package>) {
        *write_lock(&self.0.package) = Some(Arc::downgrade(pkg));
    }

    pub fn is_keyword(&self) -> bool {
        self.package().is_some_and(|p| p.name() == "KEYWORD")
    }

    /// Global (not dynamically rebound) value cell.
    pub fn value(&self) -> Option<Value> {
        read_lock(&self.0.value).clone()
    }

    pub fn set_value(&self, value: Value) {
        *write_lock(&self.0.value) = Some(value);
    }

    pub fn make_unbound(&self) {
        *write_lock(&self.0.value) = None;
    }

    pub fn is_bound(&self) -> bool {
        read_lock(&self.0.value).is_some()
    }

    pub fn function(&self) -> Option<Function> {
        read_lock(&self.0.function).clone()
    }

    pub fn set_function(&self, function: Option<Function>) {
        *write_lock(&self.0.function) = function;
    }

    pub fn plist(&self) -> Value {
        read_lock(&self.0.plist).clone()
    }

    pub fn set_plist(&self, plist: Value) {
        *write_lock(&self.0.plist) = plist;
    }

    /// Globally proclaimed special.
    pub fn is_special(&self) -> bool {
        self.0.flags.load(Ordering::Acquire) & FLAG_SPECIAL != 0
    }

    pub fn set_special(&self) {
        self.0.flags.fetch_or(FLAG_SPECIAL, Ordering::AcqRel);
    }

    pub fn is_constant(&self) -> bool {
        self.0.flags.load(Ordering::Acquire) & FLAG_CONSTANT != 0
    }

    pub fn set_constant(&self) {
        self.0.flags.fetch_or(FLAG_CONSTANT | FLAG_SPECIAL, Ordering::AcqRel);
    }

    pub fn ptr_eq(&self, other: &Symbol) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Symbol {}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (Arc::as_ptr(&self.0) as usize).hash(state);
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.package() {
            Some(pkg) => write!(f, "{}::{}", pkg.name(), self.name()),
            None => write!(f, "#:{}", self.name()),
        }
    }
}

// ============================================================================
// Packages
// ============================================================================

/// How a symbol is accessible in a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accessibility {
    Internal,
    External,
    Inherited,
}

pub struct Package {
    name: String,
    nicknames: Vec<String>,
    internal: DashMap<Arc<str>, Symbol>,
    external: DashMap<Arc<str>, Symbol>,
    use_list: RwLock<Vec<Arc<Package>>>,
    intern_lock: Mutex<()>,
}

impl Package {
    fn new(name: &str, nicknames: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            nicknames: nicknames.iter().map(|n| n.to_string()).collect(),
            internal: DashMap::new(),
            external: DashMap::new(),
            use_list: RwLock::new(Vec::new()),
            intern_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nicknames(&self) -> &[String] {
        &self.nicknames
    }

    pub fn is_keyword_package(&self) -> bool {
        self.name == "KEYWORD"
    }

    pub fn use_list(&self) -> Vec<Arc<Package>> {
        read_lock(&self.use_list).clone()
    }

    /// Add a package to the use-list
    pub fn use_package(&self, pkg: &Arc<Package>) {
        let mut uses = write_lock(&self.use_list);
        if !uses.iter().any(|p| Arc::ptr_eq(p, pkg)) {
            uses.push(Arc::clone(pkg));
        }
    }

    pub fn find_external(&self, name: &str) -> Option<Symbol> {
        self.external.get(name).map(|s| s.value().clone())
    }

    /// Look a name up as FIND-SYMBOL does: present symbols first, then the
    /// externals of used packages.
    pub fn find_symbol(&self, name: &str) -> Option<(Symbol, Accessibility)> {
        if let Some(sym) = self.external.get(name) {
            return Some((sym.value().clone(), Accessibility::External));
        }
        if let Some(sym) = self.internal.get(name) {
            return Some((sym.value().clone(), Accessibility::Internal));
        }
        for used in read_lock(&self.use_list).iter() {
            if let Some(sym) = used.find_external(name) {
                return Some((sym, Accessibility::Inherited));
            }
        }
        None
    }

    /// Intern `name`, creating the symbol when it is not accessible. The
    /// second element is `None` for a freshly created symbol.
    pub fn intern(self: &Arc<Self>, name: &str) -> (Symbol, Option<Accessibility>) {
        if let Some((sym, access)) = self.find_symbol(name) {
            return (sym, Some(access));
        }
        let _guard = self.intern_lock.lock().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race while we waited.
        if let Some((sym, access)) = self.find_symbol(name) {
            return (sym, Some(access));
        }
        let sym = Symbol::uninterned(name);
        sym.set_package(self);
        let key: Arc<str> = Arc::from(name);
        if self.is_keyword_package() {
            sym.set_value(Value::Symbol(sym.clone()));
            sym.set_constant();
            self.external.insert(key, sym.clone());
        } else {
            self.internal.insert(key, sym.clone());
        }
        (sym, None)
    }

    /// Intern and return just the symbol.
    pub fn intern_symbol(self: &Arc<Self>, name: &str) -> Symbol {
        self.intern(name).0
    }

    /// Make an accessible symbol external. Symbols not present are imported.
    pub fn export(self: &Arc<Self>, sym: &Symbol) {
        let _guard = self.intern_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let key: Arc<str> = Arc::from(sym.name());
        self.internal.remove(&key);
        if sym.package().is_none() {
            sym.set_package(self);
        }
        self.external.insert(key, sym.clone());
    }

    /// Make a symbol present in this package as an internal symbol.
    pub fn import(self: &Arc<Self>, sym: &Symbol) -> Result<(), Condition> {
        if let Some((existing, _)) = self.find_symbol(sym.name()) {
            if existing == *sym {
                return Ok(());
            }
            return Err(Condition::package_error(format!(
                "Importing {} into {} conflicts with {:?}",
                sym.name(),
                self.name,
                existing
            )));
        }
        let _guard = self.intern_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if sym.package().is_none() {
            sym.set_package(self);
        }
        self.internal.insert(Arc::from(sym.name()), sym.clone());
        Ok(())
    }

    /// Remove a symbol from this package; it becomes uninterned if this was
    /// its home.
    pub fn unintern(&self, sym: &Symbol) -> bool {
        let removed = self.internal.remove(sym.name()).is_some() | self.external.remove(sym.name()).is_some();
        if removed && sym.package().is_some_and(|p| std::ptr::eq(Arc::as_ptr(&p), self)) {
            *write_lock(&sym.0.package) = None;
        }
        removed
    }

    pub fn symbol_count(&self) -> usize {
        self.internal.len() + self.external.len()
    }

    /// Snapshot of the external symbols.
    pub fn external_symbols(&self) -> Vec<Symbol> {
        self.external.iter().map(|e| e.value().clone()).collect()
    }
}

impl fmt::Debug for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#<PACKAGE {}>", self.name)
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All packages of one runtime. Structural changes take the write lock;
/// symbol lookups only touch the per-package tables.
pub struct PackageRegistry {
    packages: RwLock<HashMap<String, Arc<Package>>>,
    keyword: Arc<Package>,
    common_lisp: Arc<Package>,
    cl_user: Arc<Package>,
    system: Arc<Package>,
}

impl PackageRegistry {
    pub fn new() -> Self {
        let keyword = Arc::new(Package::new("KEYWORD", &[]));
        let common_lisp = Arc::new(Package::new("COMMON-LISP", &["CL"]));
        let cl_user = Arc::new(Package::new("COMMON-LISP-USER", &["CL-USER"]));
        let system = Arc::new(Package::new("SYSTEM", &["SYS"]));
        cl_user.use_package(&common_lisp);
        system.use_package(&common_lisp);

        let mut table = HashMap::new();
        for pkg in [&keyword, &common_lisp, &cl_user, &system] {
            table.insert(pkg.name().to_string(), Arc::clone(pkg));
            for nick in pkg.nicknames() {
                table.insert(nick.clone(), Arc::clone(pkg));
            }
        }

        Self {
            packages: RwLock::new(table),
            keyword,
            common_lisp,
            cl_user,
            system,
        }
    }

    pub fn keyword(&self) -> &Arc<Package> {
        &self.keyword
    }

    pub fn common_lisp(&self) -> &Arc<Package> {
        &self.common_lisp
    }

    pub fn cl_user(&self) -> &Arc<Package> {
        &self.cl_user
    }

    pub fn system(&self) -> &Arc<Package> {
        &self.system
    }

    pub fn find_package(&self, name: &str) -> Option<Arc<Package>> {
        read_lock(&self.packages).get(name).cloned()
    }

    /// Create a package. Fails when the name or a nickname is taken.
    pub fn make_package(
        &self,
        name: &str,
        nicknames: &[&str],
        uses: &[Arc<Package>],
    ) -> Result<Arc<Package>, Condition> {
        let mut table = write_lock(&self.packages);
        for n in std::iter::once(&name).chain(nicknames.iter()) {
            if table.contains_key(*n) {
                return Err(Condition::package_error(format!(
                    "A package named {} already exists",
                    n
                )));
            }
        }
        let pkg = Arc::new(Package::new(name, nicknames));
        for used in uses {
            pkg.use_package(used);
        }
        table.insert(name.to_string(), Arc::clone(&pkg));
        for nick in nicknames {
            table.insert(nick.to_string(), Arc::clone(&pkg));
        }
        tracing::debug!(package = name, "created package");
        Ok(pkg)
    }

    pub fn intern_keyword(&self, name: &str) -> Symbol {
        self.keyword.intern_symbol(name)
    }

    /// Intern into COMMON-LISP and export.
    pub fn intern_cl(&self, name: &str) -> Symbol {
        if let Some(sym) = self.common_lisp.find_external(name) {
            return sym;
        }
        let sym = self.common_lisp.intern_symbol(name);
        self.common_lisp.export(&sym);
        sym
    }

    /// Intern into SYSTEM (internal).
    pub fn intern_sys(&self, name: &str) -> Symbol {
        self.system.intern_symbol(name)
    }

    /// Distinct packages, each listed once.
    pub fn list_all_packages(&self) -> Vec<Arc<Package>> {
        let table = read_lock(&self.packages);
        let mut out: Vec<Arc<Package>> = Vec::new();
        for pkg in table.values() {
            if !out.iter().any(|p| Arc::ptr_eq(p, pkg)) {
                out.push(Arc::clone(pkg));
            }
        }
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }
}

impl Default for PackageRegistry {
    fn default() -> Self {
        Self::new()
    }
}
