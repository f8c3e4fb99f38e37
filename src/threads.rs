// clcore Threads - Per-Thread Runtime State
//
// Every host thread that evaluates Lisp code gets one `LispThread`, created
// on first use and cached in a process-wide registry keyed by the host
// thread id. Interrupts are cooperative: `interrupt` queues a function call
// and raises a flag that the evaluator polls at each eval entry.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use dashmap::DashMap;

use crate::function::Function;
use crate::types::Value;

/// Lisp-visible thread number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadNumber(pub u64);

/// A queued asynchronous call.
#[derive(Clone)]
pub struct Interrupt {
    pub function: Function,
    pub args: Vec<Value>,
}

pub struct LispThread {
    number: ThreadNumber,
    name: String,
    host: ThreadId,
    interrupted: AtomicBool,
    pending: Mutex<VecDeque<Interrupt>>,
}

impl LispThread {
    fn new(number: ThreadNumber, name: String, host: ThreadId) -> Self {
        Self {
            number,
            name,
            host,
            interrupted: AtomicBool::new(false),
            pending: Mutex::new(VecDeque::new()),
        }
    }

    pub fn number(&self) -> ThreadNumber {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host_id(&self) -> ThreadId {
        self.host
    }

    fn pending(&self) -> MutexGuard<'_, VecDeque<Interrupt>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `function` to run on this thread at its next check point.
    pub fn interrupt(&self, function: Function, args: Vec<Value>) {
        self.pending().push_back(Interrupt { function, args });
        self.interrupted.store(true, Ordering::Release);
        tracing::debug!(thread = %self.name, "interrupt queued");
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Drain the queue and clear the flag.
    pub fn take_interrupts(&self) -> Vec<Interrupt> {
        let mut pending = self.pending();
        self.interrupted.store(false, Ordering::Release);
        pending.drain(..).collect()
    }
}

/// Process-wide map from host thread to its `LispThread`.
pub struct ThreadRegistry {
    threads: DashMap<ThreadId, Arc<LispThread>>,
    next_number: AtomicU64,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: DashMap::new(),
            next_number: AtomicU64::new(1),
        }
    }

    /// The calling host thread's `LispThread`, registered on first use.
    pub fn current(&self) -> Arc<LispThread> {
        let host = thread::current();
        let id = host.id();
        if let Some(existing) = self.threads.get(&id) {
            return Arc::clone(existing.value());
        }
        let entry = self.threads.entry(id).or_insert_with(|| {
            let number = ThreadNumber(self.next_number.fetch_add(1, Ordering::Relaxed));
            let name = host
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("thread-{}", number.0));
            tracing::debug!(thread = %name, number = number.0, "registered lisp thread");
            Arc::new(LispThread::new(number, name, id))
        });
        Arc::clone(entry.value())
    }

    pub fn find(&self, number: ThreadNumber) -> Option<Arc<LispThread>> {
        self.threads
            .iter()
            .find(|entry| entry.value().number == number)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Forget `lisp_thread` once only the registry and the caller hold it.
    pub fn release(&self, lisp_thread: &Arc<LispThread>) {
        let removed = self.threads.remove_if(&lisp_thread.host, |_, entry| {
            Arc::ptr_eq(entry, lisp_thread) && Arc::strong_count(entry) <= 2
        });
        if removed.is_some() {
            tracing::debug!(thread = %lisp_thread.name, number = lisp_thread.number.0, "released lisp thread");
        }
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{Arity, Primitive};
    use crate::symbol::Symbol;

    fn dummy(_: &mut crate::eval::Interpreter, _: &[Value]) -> crate::eval::EvalResult {
        Ok(Value::Nil)
    }

    fn dummy_function() -> Function {
        Function::Primitive(Arc::new(Primitive {
            name: Symbol::uninterned("DUMMY"),
            arity: Arity::exactly(0),
            func: dummy,
            multiple_values: false,
        }))
    }

    #[test]
    fn test_same_thread_same_object() {
        let registry = ThreadRegistry::new();
        let a = registry.current();
        let b = registry.current();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
        assert!(registry.find(a.number()).is_some());
    }

    #[test]
    fn test_threads_get_distinct_entries() {
        let registry = Arc::new(ThreadRegistry::new());
        let main = registry.current();
        let other = {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.current().number()).join().unwrap()
        };
        assert_ne!(main.number(), other);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_release_when_unreferenced() {
        let registry = ThreadRegistry::new();
        let t = registry.current();
        let held = Arc::clone(&t);
        registry.release(&t);
        assert_eq!(registry.len(), 1);
        drop(held);
        registry.release(&t);
        assert!(registry.is_empty());
        assert!(registry.find(t.number()).is_none());
    }

    #[test]
    fn test_interrupt_queue() {
        let registry = ThreadRegistry::new();
        let t = registry.current();
        assert!(!t.is_interrupted());
        t.interrupt(dummy_function(), vec![Value::Fixnum(1)]);
        t.interrupt(dummy_function(), vec![]);
        assert!(t.is_interrupted());
        let queued = t.take_interrupts();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].args.len(), 1);
        assert!(!t.is_interrupted());
        assert!(t.take_interrupts().is_empty());
    }
}
