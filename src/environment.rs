// clcore Environments
//
// Lexical environments are chains of frames shared by closures. Each frame
// records variable and function bindings, local special declarations, and
// the BLOCK names and TAGBODY tags visible to RETURN-FROM and GO.
//
// Dynamic bindings of special variables live on a separate per-thread stack,
// a persistent chain: pushing allocates a node pointing at the old head, and
// unwinding restores a saved head.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::function::Function;
use crate::symbol::Symbol;
use crate::types::{eql, read_lock, write_lock, Value};

/// Identity of one BLOCK activation.
pub struct BlockTag {
    pub name: Symbol,
    active: AtomicBool,
}

impl BlockTag {
    pub fn new(name: Symbol) -> Arc<Self> {
        Arc::new(Self {
            name,
            active: AtomicBool::new(true),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

/// Identity of one TAGBODY activation.
pub struct TagbodyTag {
    active: AtomicBool,
}

impl TagbodyTag {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            active: AtomicBool::new(true),
        })
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
    }
}

#[derive(Default)]
struct FrameData {
    variables: Vec<(Symbol, Value)>,
    functions: Vec<(Symbol, Function)>,
    specials: Vec<Symbol>,
    blocks: Vec<Arc<BlockTag>>,
    tags: Vec<(Value, Arc<TagbodyTag>, usize)>,
}

struct Frame {
    parent: Environment,
    data: RwLock<FrameData>,
}

/// How a variable reference resolves.
pub enum VariableLookup {
    Lexical(Value),
    /// Declared special in this scope, or proclaimed globally.
    Special,
    /// Not lexically visible: the global (dynamic) value applies.
    Free,
}

/// A lexical environment. The empty environment is the null (global) one.
#[derive(Clone, Default)]
pub struct Environment {
    frame: Option<Arc<Frame>>,
}

impl Environment {
    /// The null lexical environment.
    pub fn new() -> Self {
        Self { frame: None }
    }

    /// A child environment with a fresh, empty frame.
    pub fn extend(&self) -> Self {
        Self {
            frame: Some(Arc::new(Frame {
                parent: self.clone(),
                data: RwLock::new(FrameData::default()),
            })),
        }
    }

    pub fn ptr_eq(&self, other: &Environment) -> bool {
        match (&self.frame, &other.frame) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn frames(&self) -> FrameIter<'_> {
        FrameIter {
            current: self.frame.as_ref(),
        }
    }

    /// Add a lexical variable binding to the innermost frame.
    pub fn bind(&self, sym: Symbol, value: Value) {
        if let Some(frame) = &self.frame {
            write_lock(&frame.data).variables.push((sym, value));
        }
    }

    pub fn bind_function(&self, sym: Symbol, function: Function) {
        if let Some(frame) = &self.frame {
            write_lock(&frame.data).functions.push((sym, function));
        }
    }

    /// Record a local (SPECIAL name) declaration in the innermost frame.
    pub fn declare_special(&self, sym: &Symbol) {
        if let Some(frame) = &self.frame {
            let mut data = write_lock(&frame.data);
            if !data.specials.contains(sym) {
                data.specials.push(sym.clone());
            }
        }
    }

    pub fn lookup_variable(&self, sym: &Symbol) -> VariableLookup {
        if sym.is_special() {
            return VariableLookup::Special;
        }
        for frame in self.frames() {
            let data = read_lock(&frame.data);
            if let Some((_, value)) = data.variables.iter().rev().find(|(s, _)| s == sym) {
                return VariableLookup::Lexical(value.clone());
            }
            if data.specials.contains(sym) {
                return VariableLookup::Special;
            }
        }
        VariableLookup::Free
    }

    /// Assign a lexically bound variable. Returns false when the variable is
    /// not lexical here, in which case the caller assigns the dynamic value.
    pub fn set_variable(&self, sym: &Symbol, value: Value) -> bool {
        if sym.is_special() {
            return false;
        }
        for frame in self.frames() {
            let mut data = write_lock(&frame.data);
            if let Some(slot) = data.variables.iter_mut().rev().find(|(s, _)| s == sym) {
                slot.1 = value;
                return true;
            }
            if data.specials.contains(sym) {
                return false;
            }
        }
        false
    }

    pub fn lookup_function(&self, sym: &Symbol) -> Option<Function> {
        for frame in self.frames() {
            let data = read_lock(&frame.data);
            if let Some((_, f)) = data.functions.iter().rev().find(|(s, _)| s == sym) {
                return Some(f.clone());
            }
        }
        None
    }

    pub fn add_block(&self, tag: Arc<BlockTag>) {
        if let Some(frame) = &self.frame {
            write_lock(&frame.data).blocks.push(tag);
        }
    }

    /// Innermost lexically visible block with this name.
    pub fn find_block(&self, name: &Symbol) -> Option<Arc<BlockTag>> {
        for frame in self.frames() {
            let data = read_lock(&frame.data);
            if let Some(tag) = data.blocks.iter().rev().find(|b| b.name == *name) {
                return Some(Arc::clone(tag));
            }
        }
        None
    }

    pub fn add_tag(&self, tag: Value, tagbody: &Arc<TagbodyTag>, index: usize) {
        if let Some(frame) = &self.frame {
            write_lock(&frame.data)
                .tags
                .push((tag, Arc::clone(tagbody), index));
        }
    }

    /// Innermost visible GO target for `tag`.
    pub fn find_tag(&self, tag: &Value) -> Option<(Arc<TagbodyTag>, usize)> {
        for frame in self.frames() {
            let data = read_lock(&frame.data);
            if let Some((_, tb, idx)) = data.tags.iter().find(|(t, _, _)| eql(t, tag)) {
                return Some((Arc::clone(tb), *idx));
            }
        }
        None
    }
}

struct FrameIter<'a> {
    current: Option<&'a Arc<Frame>>,
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = &'a Arc<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = self.current?;
        self.current = frame.parent.frame.as_ref();
        Some(frame)
    }
}

// ============================================================================
// Dynamic bindings
// ============================================================================

/// One dynamic binding. The value cell is mutable so SETQ of a bound special
/// updates the innermost binding in place.
pub struct SpecialBinding {
    pub symbol: Symbol,
    value: RwLock<Option<Value>>,
    next: Option<Arc<SpecialBinding>>,
}

impl SpecialBinding {
    pub fn value(&self) -> Option<Value> {
        read_lock(&self.value).clone()
    }

    pub fn set_value(&self, value: Option<Value>) {
        *write_lock(&self.value) = value;
    }
}

/// Head of a thread's dynamic-binding chain.
#[derive(Clone, Default)]
pub struct SpecialStack {
    head: Option<Arc<SpecialBinding>>,
}

impl SpecialStack {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Bind `symbol`; `None` binds it with no value (PROGV with too few values).
    pub fn push(&mut self, symbol: Symbol, value: Option<Value>) {
        let node = SpecialBinding {
            symbol,
            value: RwLock::new(value),
            next: self.head.take(),
        };
        self.head = Some(Arc::new(node));
    }

    /// Innermost binding of `symbol`.
    pub fn find(&self, symbol: &Symbol) -> Option<&SpecialBinding> {
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            if node.symbol == *symbol {
                return Some(node);
            }
            current = node.next.as_deref();
        }
        None
    }

    pub fn depth(&self) -> usize {
        let mut n = 0;
        let mut current = self.head.as_deref();
        while let Some(node) = current {
            n += 1;
            current = node.next.as_deref();
        }
        n
    }

    /// Same head as `other`.
    pub fn same_as(&self, other: &SpecialStack) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_shadowing() {
        let x = Symbol::uninterned("X");
        let outer = Environment::new().extend();
        outer.bind(x.clone(), Value::Fixnum(1));
        let inner = outer.extend();
        inner.bind(x.clone(), Value::Fixnum(2));
        assert!(matches!(inner.lookup_variable(&x), VariableLookup::Lexical(Value::Fixnum(2))));
        assert!(matches!(outer.lookup_variable(&x), VariableLookup::Lexical(Value::Fixnum(1))));
        assert!(matches!(Environment::new().lookup_variable(&x), VariableLookup::Free));
    }

    #[test]
    fn test_local_special_declaration_hides_outer_lexical() {
        let x = Symbol::uninterned("X");
        let outer = Environment::new().extend();
        outer.bind(x.clone(), Value::Fixnum(1));
        let inner = outer.extend();
        inner.declare_special(&x);
        assert!(matches!(inner.lookup_variable(&x), VariableLookup::Special));
        assert!(!inner.set_variable(&x, Value::Fixnum(5)));
        assert!(outer.set_variable(&x, Value::Fixnum(5)));
        assert!(matches!(outer.lookup_variable(&x), VariableLookup::Lexical(Value::Fixnum(5))));
    }

    #[test]
    fn test_closure_sees_assignment() {
        let x = Symbol::uninterned("X");
        let env = Environment::new().extend();
        env.bind(x.clone(), Value::Fixnum(1));
        let captured = env.clone();
        env.set_variable(&x, Value::Fixnum(3));
        assert!(matches!(captured.lookup_variable(&x), VariableLookup::Lexical(Value::Fixnum(3))));
    }

    #[test]
    fn test_blocks_and_tags() {
        let name = Symbol::uninterned("B");
        let env = Environment::new().extend();
        let tag = BlockTag::new(name.clone());
        env.add_block(Arc::clone(&tag));
        let found = env.extend().find_block(&name).unwrap();
        assert!(Arc::ptr_eq(&found, &tag));

        let tb = TagbodyTag::new();
        env.add_tag(Value::Fixnum(10), &tb, 3);
        let (found_tb, idx) = env.find_tag(&Value::Fixnum(10)).unwrap();
        assert!(Arc::ptr_eq(&found_tb, &tb));
        assert_eq!(idx, 3);
        assert!(env.find_tag(&Value::Fixnum(11)).is_none());
    }

    #[test]
    fn test_special_stack_restore() {
        let s = Symbol::uninterned("*S*");
        let mut stack = SpecialStack::new();
        stack.push(s.clone(), Some(Value::Fixnum(1)));
        let mark = stack.clone();
        stack.push(s.clone(), Some(Value::Fixnum(2)));
        assert!(matches!(stack.find(&s).unwrap().value(), Some(Value::Fixnum(2))));
        assert_eq!(stack.depth(), 2);
        stack = mark.clone();
        assert!(stack.same_as(&mark));
        assert!(matches!(stack.find(&s).unwrap().value(), Some(Value::Fixnum(1))));
    }
}
