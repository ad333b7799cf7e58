//! Host-exposed functions.
//!
//! Any function handed to the host (a promise reaction, a stream pull, a
//! socket listener) is entered into the [`FuncTable`] and stays reachable
//! from the host until it is explicitly released. Forgetting to release a
//! [`Func`] keeps its closure, and everything the closure captured, alive
//! for as long as the table exists.

use std::fmt;
use std::sync::{Arc, Mutex};

use slab::Slab;
use tracing::warn;

type Body<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// The host's registry of live exposed functions.
#[derive(Clone, Default)]
pub struct FuncTable {
    entries: Arc<Mutex<Slab<&'static str>>>,
}

impl FuncTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of functions that have been registered and not yet released.
    pub fn live(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Labels of all live functions, for leak diagnostics.
    pub fn live_labels(&self) -> Vec<&'static str> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, label)| *label)
            .collect()
    }

    fn insert(&self, label: &'static str) -> usize {
        self.entries.lock().unwrap().insert(label)
    }

    fn remove(&self, key: usize) {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains(key) {
            entries.remove(key);
        }
    }
}

impl fmt::Debug for FuncTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FuncTable").field("live", &self.live()).finish()
    }
}

/// A function value the host can call with an argument of type `A`.
///
/// Clones share the same registration: releasing any clone releases them all.
pub struct Func<A, R = ()> {
    key: usize,
    label: &'static str,
    table: FuncTable,
    body: Arc<Mutex<Option<Body<A, R>>>>,
}

impl<A, R> Func<A, R>
where
    A: 'static,
    R: 'static,
{
    /// Register `f` with the host.
    pub fn new<F>(table: &FuncTable, label: &'static str, f: F) -> Self
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let key = table.insert(label);
        Self {
            key,
            label,
            table: table.clone(),
            body: Arc::new(Mutex::new(Some(Arc::new(f)))),
        }
    }

    /// Invoke the function. Returns `None` if it has already been released.
    pub fn call(&self, arg: A) -> Option<R> {
        // Clone the body out so the function may release itself while running.
        let body = self.body.lock().unwrap().clone();
        match body {
            Some(body) => Some(body(arg)),
            None => {
                warn!(label = self.label, "call to released function");
                None
            }
        }
    }

    /// Drop the closure and remove the registration. Idempotent.
    pub fn release(&self) {
        let released = self.body.lock().unwrap().take();
        if released.is_some() {
            self.table.remove(self.key);
        }
    }

    pub fn is_released(&self) -> bool {
        self.body.lock().unwrap().is_none()
    }

    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl<A, R> Clone for Func<A, R> {
    fn clone(&self) -> Self {
        Self {
            key: self.key,
            label: self.label,
            table: self.table.clone(),
            body: self.body.clone(),
        }
    }
}

impl<A, R> fmt::Debug for Func<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("label", &self.label)
            .field("released", &self.body.lock().unwrap().is_none())
            .finish()
    }
}
