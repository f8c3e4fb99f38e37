// clcore Types - The Datum Model
//
// Every Lisp object the reader produces or the evaluator manipulates is a
// `Value`. Heap objects are reference counted and shared between threads;
// mutable ones (conses, vectors, arrays) carry their own locks.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use num_bigint::BigInt;

use crate::context::Runtime;
use crate::environment::Environment;
use crate::function::Function;
use crate::readtable::Readtable;
use crate::streams::Stream;
use crate::symbol::{Package, Symbol};
use crate::threads::LispThread;

/// Read a lock, recovering the data if a panicking thread poisoned it.
pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// A Lisp datum.
#[derive(Clone)]
pub enum Value {
    /// The empty list, also boolean false. Unique.
    Nil,
    /// End-of-file marker handed to `read` callers that asked for one.
    Eof,
    Symbol(Symbol),
    Fixnum(i64),
    Bignum(Arc<BigInt>),
    Ratio(Arc<Ratio>),
    Float(f64),
    Complex(Arc<Complex>),
    Char(char),
    String(Arc<str>),
    Cons(Cons),
    Vector(Arc<RwLock<Vec<Value>>>),
    BitVector(Arc<Vec<bool>>),
    Array(Arc<Array>),
    Pathname(Arc<str>),
    Function(Function),
    Package(Arc<Package>),
    Readtable(Arc<Readtable>),
    Stream(Arc<Stream>),
    Environment(Environment),
    Thread(Arc<LispThread>),
}

/// Normalised rational: denominator > 1, gcd(num, den) == 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ratio {
    pub numerator: BigInt,
    pub denominator: BigInt,
}

#[derive(Debug, Clone)]
pub struct Complex {
    pub real: Value,
    pub imag: Value,
}

/// Upper bound on the rank of an array.
pub const ARRAY_RANK_LIMIT: usize = 64;

/// Upper bound on the element count of an array or vector.
pub const ARRAY_TOTAL_SIZE_LIMIT: usize = 1 << 24;

/// Multi-dimensional array in row-major order.
pub struct Array {
    pub dimensions: Vec<usize>,
    pub elements: RwLock<Vec<Value>>,
}

// ============================================================================
// Cons cells
// ============================================================================

/// Shared handle to a mutable pair.
#[derive(Clone)]
pub struct Cons(Arc<ConsCell>);

pub struct ConsCell {
    car: RwLock<Value>,
    cdr: RwLock<Value>,
}

impl Cons {
    pub fn new(car: Value, cdr: Value) -> Self {
        Cons(Arc::new(ConsCell {
            car: RwLock::new(car),
            cdr: RwLock::new(cdr),
        }))
    }

    pub fn car(&self) -> Value {
        read_lock(&self.0.car).clone()
    }

    pub fn cdr(&self) -> Value {
        read_lock(&self.0.cdr).clone()
    }

    pub fn set_car(&self, value: Value) {
        *write_lock(&self.0.car) = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *write_lock(&self.0.cdr) = value;
    }

    pub fn ptr_eq(&self, other: &Cons) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }
}

// Long lists would otherwise drop recursively through their cdr chain.
impl Drop for ConsCell {
    fn drop(&mut self) {
        let mut next = std::mem::replace(
            self.cdr.get_mut().unwrap_or_else(PoisonError::into_inner),
            Value::Nil,
        );
        while let Value::Cons(cons) = next {
            match Arc::try_unwrap(cons.0) {
                Ok(mut cell) => {
                    next = std::mem::replace(
                        cell.cdr.get_mut().unwrap_or_else(PoisonError::into_inner),
                        Value::Nil,
                    );
                }
                Err(_) => break,
            }
        }
    }
}

// ============================================================================
// Constructors and accessors
// ============================================================================

impl Value {
    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::Cons(Cons::new(car, cdr))
    }

    pub fn string(s: impl Into<Arc<str>>) -> Value {
        Value::String(s.into())
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::Vector(Arc::new(RwLock::new(items)))
    }

    /// Build a proper list.
    pub fn list<I>(items: I) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        Self::list_with_tail(items, Value::Nil)
    }

    /// Build a list whose final cdr is `tail`.
    pub fn list_with_tail<I>(items: I, tail: Value) -> Value
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: DoubleEndedIterator,
    {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Generalized boolean: everything but NIL is true.
    pub fn is_true(&self) -> bool {
        !self.is_nil()
    }

    pub fn is_cons(&self) -> bool {
        matches!(self, Value::Cons(_))
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Value::Nil | Value::Cons(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(
            self,
            Value::Fixnum(_) | Value::Bignum(_) | Value::Ratio(_) | Value::Float(_) | Value::Complex(_)
        )
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_cons(&self) -> Option<&Cons> {
        match self {
            Value::Cons(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// CAR with NIL-punning; `None` for non-lists.
    pub fn car(&self) -> Option<Value> {
        match self {
            Value::Nil => Some(Value::Nil),
            Value::Cons(c) => Some(c.car()),
            _ => None,
        }
    }

    pub fn cdr(&self) -> Option<Value> {
        match self {
            Value::Nil => Some(Value::Nil),
            Value::Cons(c) => Some(c.cdr()),
            _ => None,
        }
    }

    /// Iterate the cars of a list. Stops at the first non-cons tail.
    pub fn iter(&self) -> ListIter {
        ListIter {
            current: self.clone(),
        }
    }

    /// Collect a proper list into a vector. `None` for dotted lists and atoms.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        let mut out = Vec::new();
        let mut current = self.clone();
        loop {
            match current {
                Value::Nil => return Some(out),
                Value::Cons(c) => {
                    out.push(c.car());
                    current = c.cdr();
                }
                _ => return None,
            }
        }
    }

    /// Number of conses in the spine; `None` when the list is dotted.
    pub fn list_length(&self) -> Option<usize> {
        let mut n = 0;
        let mut current = self.clone();
        loop {
            match current {
                Value::Nil => return Some(n),
                Value::Cons(c) => {
                    n += 1;
                    current = c.cdr();
                }
                _ => return None,
            }
        }
    }

    /// Name of the object's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "NULL",
            Value::Eof => "EOF",
            Value::Symbol(_) => "SYMBOL",
            Value::Fixnum(_) => "FIXNUM",
            Value::Bignum(_) => "BIGNUM",
            Value::Ratio(_) => "RATIO",
            Value::Float(_) => "DOUBLE-FLOAT",
            Value::Complex(_) => "COMPLEX",
            Value::Char(_) => "CHARACTER",
            Value::String(_) => "STRING",
            Value::Cons(_) => "CONS",
            Value::Vector(_) => "SIMPLE-VECTOR",
            Value::BitVector(_) => "SIMPLE-BIT-VECTOR",
            Value::Array(_) => "ARRAY",
            Value::Pathname(_) => "PATHNAME",
            Value::Function(_) => "FUNCTION",
            Value::Package(_) => "PACKAGE",
            Value::Readtable(_) => "READTABLE",
            Value::Stream(_) => "STREAM",
            Value::Environment(_) => "ENVIRONMENT",
            Value::Thread(_) => "THREAD",
        }
    }
}

pub struct ListIter {
    current: Value,
}

impl Iterator for ListIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match std::mem::replace(&mut self.current, Value::Nil) {
            Value::Cons(c) => {
                self.current = c.cdr();
                Some(c.car())
            }
            _ => None,
        }
    }
}

// ============================================================================
// Equality
// ============================================================================

/// Identity.
pub fn eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Nil, Value::Nil) | (Value::Eof, Value::Eof) => true,
        (Value::Symbol(x), Value::Symbol(y)) => x == y,
        (Value::Fixnum(x), Value::Fixnum(y)) => x == y,
        (Value::Char(x), Value::Char(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Bignum(x), Value::Bignum(y)) => Arc::ptr_eq(x, y),
        (Value::Ratio(x), Value::Ratio(y)) => Arc::ptr_eq(x, y),
        (Value::Complex(x), Value::Complex(y)) => Arc::ptr_eq(x, y),
        (Value::String(x), Value::String(y)) => Arc::ptr_eq(x, y),
        (Value::Cons(x), Value::Cons(y)) => x.ptr_eq(y),
        (Value::Vector(x), Value::Vector(y)) => Arc::ptr_eq(x, y),
        (Value::BitVector(x), Value::BitVector(y)) => Arc::ptr_eq(x, y),
        (Value::Array(x), Value::Array(y)) => Arc::ptr_eq(x, y),
        (Value::Pathname(x), Value::Pathname(y)) => Arc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Package(x), Value::Package(y)) => Arc::ptr_eq(x, y),
        (Value::Readtable(x), Value::Readtable(y)) => Arc::ptr_eq(x, y),
        (Value::Stream(x), Value::Stream(y)) => Arc::ptr_eq(x, y),
        (Value::Environment(x), Value::Environment(y)) => x.ptr_eq(y),
        (Value::Thread(x), Value::Thread(y)) => Arc::ptr_eq(x, y),
        _ => false,
    }
}

/// EQ, plus numbers of the same type and value.
pub fn eql(a: &Value, b: &Value) -> bool {
    if eq(a, b) {
        return true;
    }
    match (a, b) {
        (Value::Bignum(x), Value::Bignum(y)) => x == y,
        (Value::Ratio(x), Value::Ratio(y)) => x == y,
        (Value::Complex(x), Value::Complex(y)) => eql(&x.real, &y.real) && eql(&x.imag, &y.imag),
        _ => false,
    }
}

/// Structural equality over conses, strings, bit vectors and pathnames.
pub fn equal(a: &Value, b: &Value) -> bool {
    let mut a = a.clone();
    let mut b = b.clone();
    loop {
        match (&a, &b) {
            (Value::Cons(x), Value::Cons(y)) => {
                if x.ptr_eq(y) {
                    return true;
                }
                if !equal(&x.car(), &y.car()) {
                    return false;
                }
                let (next_a, next_b) = (x.cdr(), y.cdr());
                a = next_a;
                b = next_b;
            }
            (Value::String(x), Value::String(y)) => return x == y,
            (Value::BitVector(x), Value::BitVector(y)) => return x == y,
            (Value::Pathname(x), Value::Pathname(y)) => return x == y,
            _ => return eql(&a, &b),
        }
    }
}

// Debug output goes through the printer so cyclic data stays bounded.
impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::printer::prin1_to_string(self, None))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::printer::prin1_to_string(self, None))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Fixnum(n)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Function> for Value {
    fn from(f: Function) -> Self {
        Value::Function(f)
    }
}

/// Convert a symbol to its datum, mapping COMMON-LISP:NIL onto `Value::Nil`.
pub fn symbol_value_of(runtime: &Runtime, sym: Symbol) -> Value {
    if sym == runtime.symbols().nil {
        Value::Nil
    } else {
        Value::Symbol(sym)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_round_trip() {
        let list = Value::list(vec![Value::Fixnum(1), Value::Fixnum(2), Value::Fixnum(3)]);
        let items = list.list_to_vec().unwrap();
        assert_eq!(items.len(), 3);
        assert!(matches!(items[2], Value::Fixnum(3)));
        assert_eq!(list.list_length(), Some(3));
    }

    #[test]
    fn test_dotted_list_is_not_proper() {
        let dotted = Value::cons(Value::Fixnum(1), Value::Fixnum(2));
        assert!(dotted.list_to_vec().is_none());
        assert_eq!(dotted.iter().count(), 1);
    }

    #[test]
    fn test_equality_tiers() {
        let a = Value::string("abc");
        let b = Value::string("abc");
        assert!(!eq(&a, &b));
        assert!(!eql(&a, &b));
        assert!(equal(&a, &b));

        let big = |n: i64| Value::Bignum(Arc::new(BigInt::from(n)));
        assert!(eql(&big(7), &big(7)));
        assert!(!eql(&Value::Fixnum(1), &Value::Float(1.0)));

        let l1 = Value::list(vec![Value::Fixnum(1), Value::string("x")]);
        let l2 = Value::list(vec![Value::Fixnum(1), Value::string("x")]);
        assert!(equal(&l1, &l2));
        assert!(!eq(&l1, &l2));
    }

    #[test]
    fn test_long_list_drop() {
        let list = Value::list((0..200_000).map(Value::Fixnum).collect::<Vec<_>>());
        drop(list);
    }

    #[test]
    fn test_mutation_is_shared() {
        let cell = Cons::new(Value::Fixnum(1), Value::Nil);
        let alias = Value::Cons(cell.clone());
        cell.set_car(Value::Fixnum(9));
        assert!(matches!(alias.car(), Some(Value::Fixnum(9))));
    }
}
