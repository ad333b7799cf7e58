//! Blocking a worker on host work.
//!
//! A worker posts a job to the host loop and parks on a single-use channel
//! until the job (or a promise the job started) reports back. The host loop
//! itself never waits: both entry points refuse to run on the host thread.

use std::sync::{Arc, Mutex};

use tokio::sync::oneshot;
use warpgrid_hostenv::{HostError, Platform, Promise};

use crate::callbacks::ContinuationPair;
use crate::error::{BridgeError, BridgeResult};

/// Run `f` on the host thread and wait for its result.
pub fn call_on_host<R, F>(platform: &Platform, f: F) -> BridgeResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    if platform.host().is_host_thread() {
        return Err(BridgeError::WouldBlockHost);
    }
    let (tx, rx) = oneshot::channel();
    platform
        .host()
        .post(move || {
            let _ = tx.send(f());
        })
        .map_err(|_| BridgeError::HostGone)?;
    rx.blocking_recv().map_err(|_| BridgeError::HostGone)
}

/// Start a host operation with `start` and wait for its promise to settle.
///
/// The promise is observed through a pair of one-shot continuations
/// registered in the platform's function table; both are released as soon
/// as either fires.
pub fn await_promise<T, F>(platform: &Platform, start: F) -> BridgeResult<Result<T, HostError>>
where
    T: Clone + Send + 'static,
    F: FnOnce(&Platform) -> Promise<T> + Send + 'static,
{
    if platform.host().is_host_thread() {
        return Err(BridgeError::WouldBlockHost);
    }
    let (tx, rx) = oneshot::channel::<Result<T, HostError>>();
    let job_platform = platform.clone();
    platform
        .host()
        .post(move || {
            let promise = start(&job_platform);
            let signal = Signal::new(tx);
            let on_ok = signal.clone();
            let pair = ContinuationPair::new(
                job_platform.funcs(),
                move |value: T| on_ok.fire(Ok(value)),
                move |error: HostError| signal.fire(Err(error)),
            );
            promise.then(Some(&pair.on_fulfilled), Some(&pair.on_rejected));
        })
        .map_err(|_| BridgeError::HostGone)?;
    rx.blocking_recv().map_err(|_| BridgeError::HostGone)
}

/// The sending half of a rendezvous; only the first `fire` is delivered.
struct Signal<T> {
    tx: Arc<Mutex<Option<oneshot::Sender<T>>>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> Signal<T> {
    fn new(tx: oneshot::Sender<T>) -> Self {
        Self {
            tx: Arc::new(Mutex::new(Some(tx))),
        }
    }

    fn fire(&self, value: T) {
        if let Some(tx) = self.tx.lock().unwrap().take() {
            let _ = tx.send(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpgrid_hostenv::HostLoop;

    #[test]
    fn call_on_host_returns_value() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let probe = platform.clone();

        let on_host = call_on_host(&platform, move || probe.host().is_host_thread()).unwrap();
        assert!(on_host);
    }

    #[test]
    fn await_promise_delivers_rejection_and_releases_pair() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());

        let result = await_promise(&platform, |p| {
            Promise::<u32>::rejected(p.host(), HostError::new("denied"))
        })
        .unwrap();
        assert_eq!(result, Err(HostError::new("denied")));

        platform.host().flush().unwrap();
        assert_eq!(platform.funcs().live(), 0);
    }

    #[test]
    fn refuses_to_block_the_host_thread() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let (tx, rx) = std::sync::mpsc::channel();

        let inner = platform.clone();
        platform
            .host()
            .post(move || {
                let result = call_on_host(&inner, || ());
                tx.send(result).unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv().unwrap(), Err(BridgeError::WouldBlockHost));
    }

    #[test]
    fn stopped_host_reports_host_gone() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        host.shutdown();

        assert_eq!(call_on_host(&platform, || ()), Err(BridgeError::HostGone));
    }
}
