//! Lifecycle of functions handed to the host.
//!
//! The host keeps every registered function alive until it is released, so
//! each adapter owns a [`CallbackRegistry`] and drains it exactly once at its
//! terminal event (stream close, socket close). Promise continuations use
//! the self-releasing helpers below instead.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::debug;
use warpgrid_hostenv::{Func, FuncTable, HostError};

/// Anything the host retains until told to let go.
pub trait Release: Send + Sync {
    fn release(&self);
}

impl<A, R> Release for Func<A, R>
where
    A: 'static,
    R: 'static,
{
    fn release(&self) {
        Func::release(self);
    }
}

/// Handles owned by one adapter, released together.
#[derive(Default)]
pub struct CallbackRegistry {
    handles: Mutex<Vec<Box<dyn Release>>>,
    released: AtomicBool,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `f` with the host and take ownership of its release.
    pub fn register<A, R, F>(&self, table: &FuncTable, label: &'static str, f: F) -> Func<A, R>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let func = Func::new(table, label, f);
        self.adopt(&func);
        func
    }

    /// Take ownership of an existing registration.
    pub fn adopt<A, R>(&self, func: &Func<A, R>)
    where
        A: 'static,
        R: 'static,
    {
        if self.released.load(Ordering::Acquire) {
            // The owner already hit its terminal event.
            func.release();
            return;
        }
        self.handles.lock().unwrap().push(Box::new(func.clone()));
    }

    /// Release every owned handle. Only the first call does anything.
    pub fn release_all(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let handles = std::mem::take(&mut *self.handles.lock().unwrap());
        debug!(count = handles.len(), "releasing host callbacks");
        for handle in handles {
            handle.release();
        }
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.handles.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("handles", &self.len())
            .field("released", &self.is_released())
            .finish()
    }
}

/// A continuation that releases itself the first time it runs.
pub fn one_shot<A, F>(table: &FuncTable, label: &'static str, f: F) -> Func<A>
where
    A: 'static,
    F: FnOnce(A) + Send + 'static,
{
    let slot: Arc<Mutex<Option<Func<A>>>> = Arc::new(Mutex::new(None));
    let body = Mutex::new(Some(f));
    let me = slot.clone();
    let func = Func::new(table, label, move |arg: A| {
        if let Some(me) = me.lock().unwrap().take() {
            me.release();
        }
        if let Some(f) = body.lock().unwrap().take() {
            f(arg);
        }
    });
    *slot.lock().unwrap() = Some(func.clone());
    func
}

/// Two mutually exclusive promise continuations.
pub struct ContinuationPair<T> {
    pub on_fulfilled: Func<T>,
    pub on_rejected: Func<HostError>,
}

impl<T: 'static> ContinuationPair<T> {
    /// Build the pair. Whichever fires first releases both; the other can
    /// then never run.
    pub fn new<F, E>(table: &FuncTable, on_fulfilled: F, on_rejected: E) -> Self
    where
        F: FnOnce(T) + Send + 'static,
        E: FnOnce(HostError) + Send + 'static,
    {
        let pair: Arc<Mutex<Option<(Func<T>, Func<HostError>)>>> = Arc::new(Mutex::new(None));

        let ok_pair = pair.clone();
        let ok_body = Mutex::new(Some(on_fulfilled));
        let fulfilled = Func::new(table, "promise-fulfilled", move |value: T| {
            if release_pair(&ok_pair) {
                if let Some(f) = ok_body.lock().unwrap().take() {
                    f(value);
                }
            }
        });

        let err_pair = pair.clone();
        let err_body = Mutex::new(Some(on_rejected));
        let rejected = Func::new(table, "promise-rejected", move |error: HostError| {
            if release_pair(&err_pair) {
                if let Some(f) = err_body.lock().unwrap().take() {
                    f(error);
                }
            }
        });

        *pair.lock().unwrap() = Some((fulfilled.clone(), rejected.clone()));
        Self {
            on_fulfilled: fulfilled,
            on_rejected: rejected,
        }
    }

    /// Release both sides without firing either.
    pub fn release(&self) {
        self.on_fulfilled.release();
        self.on_rejected.release();
    }
}

/// Returns `true` for the first caller only.
fn release_pair<T: 'static>(pair: &Mutex<Option<(Func<T>, Func<HostError>)>>) -> bool {
    match pair.lock().unwrap().take() {
        Some((fulfilled, rejected)) => {
            fulfilled.release();
            rejected.release();
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn release_all_is_idempotent() {
        let table = FuncTable::new();
        let registry = CallbackRegistry::new();
        registry.register(&table, "a", |_: ()| ());
        registry.register(&table, "b", |_: u32| 1u32);
        assert_eq!(table.live(), 2);
        assert_eq!(registry.len(), 2);

        registry.release_all();
        registry.release_all();
        assert_eq!(table.live(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn adopt_after_release_releases_immediately() {
        let table = FuncTable::new();
        let registry = CallbackRegistry::new();
        registry.release_all();

        let late = registry.register(&table, "late", |_: ()| ());
        assert!(late.is_released());
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn one_shot_runs_once_and_releases() {
        let table = FuncTable::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let f = one_shot(&table, "once", move |n: usize| {
            counter.fetch_add(n, Ordering::SeqCst);
        });

        assert_eq!(f.call(5), Some(()));
        assert_eq!(f.call(5), None);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(table.live(), 0);
    }

    #[test]
    fn firing_one_side_releases_both() {
        let table = FuncTable::new();
        let (tx, rx) = std::sync::mpsc::channel();
        let err_tx = tx.clone();
        let pair = ContinuationPair::new(
            &table,
            move |v: u8| tx.send(Ok(v)).unwrap(),
            move |e: HostError| err_tx.send(Err(e)).unwrap(),
        );
        assert_eq!(table.live(), 2);

        pair.on_rejected.call(HostError::new("boom"));
        assert_eq!(table.live(), 0);
        assert!(pair.on_fulfilled.call(1).is_none());

        assert_eq!(rx.recv().unwrap(), Err(HostError::new("boom")));
        assert!(rx.try_recv().is_err());
    }
}
