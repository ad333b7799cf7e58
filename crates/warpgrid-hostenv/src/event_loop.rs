//! The host's cooperative scheduling loop.
//!
//! # Model
//!
//! ```text
//! any thread ──post(job)──► job queue ──► host thread (runs jobs FIFO, one at a time)
//!            ──spawn(fut)─► host runtime (async I/O tasks, same thread)
//!            ──spawn_blocking(f)─► blocking pool (worker threads, may block)
//! ```
//!
//! Every host-side callback (promise reactions, stream pulls, socket events)
//! runs as a posted job on the single host thread, so callbacks never run in
//! parallel with each other. Work that needs to block is handed to the
//! runtime's blocking pool, which never shares a thread with the loop.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::HostError;

/// A unit of host work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

const DEFAULT_THREAD_NAME: &str = "warpgrid-host";
const DEFAULT_MAX_BLOCKING_THREADS: usize = 64;

/// Builder for a [`HostLoop`].
#[derive(Debug, Clone)]
pub struct HostLoopBuilder {
    thread_name: String,
    max_blocking_threads: usize,
}

impl Default for HostLoopBuilder {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
        }
    }
}

impl HostLoopBuilder {
    pub fn thread_name(self, name: impl Into<String>) -> Self {
        Self {
            thread_name: name.into(),
            ..self
        }
    }

    pub fn max_blocking_threads(self, max: usize) -> Self {
        Self {
            max_blocking_threads: max.max(1),
            ..self
        }
    }

    /// Build the runtime and start the host thread.
    pub fn start(self) -> std::io::Result<HostLoop> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .max_blocking_threads(self.max_blocking_threads)
            .thread_name(format!("{}-blocking", self.thread_name))
            .build()?;

        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let host_thread = Arc::new(OnceLock::new());

        let handle = HostHandle {
            jobs: jobs_tx,
            runtime: runtime.handle().clone(),
            host_thread: host_thread.clone(),
        };

        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let _ = host_thread.set(thread::current().id());
                debug!("host loop started");
                runtime.block_on(async move {
                    loop {
                        tokio::select! {
                            job = jobs_rx.recv() => match job {
                                Some(job) => run_job(job),
                                None => break,
                            },
                            _ = &mut shutdown_rx => break,
                        }
                    }
                });
                runtime.shutdown_background();
                debug!("host loop stopped");
            })?;

        Ok(HostLoop {
            handle,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

fn run_job(job: Job) {
    // A throwing task must not take the loop down with it.
    if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!(panic = %message, "uncaught panic in host job");
    }
}

/// Owner of the host thread. Dropping it stops the loop.
pub struct HostLoop {
    handle: HostHandle,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl HostLoop {
    pub fn builder() -> HostLoopBuilder {
        HostLoopBuilder::default()
    }

    /// Start a loop with default settings.
    pub fn start() -> std::io::Result<Self> {
        Self::builder().start()
    }

    pub fn handle(&self) -> HostHandle {
        self.handle.clone()
    }

    /// Stop the loop and wait for the host thread to exit.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

impl Drop for HostLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Cheap, cloneable access to a running host loop from any thread.
#[derive(Clone)]
pub struct HostHandle {
    jobs: mpsc::UnboundedSender<Job>,
    runtime: tokio::runtime::Handle,
    host_thread: Arc<OnceLock<ThreadId>>,
}

impl HostHandle {
    /// Queue a job to run on the host thread.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> Result<(), HostError> {
        self.jobs
            .send(Box::new(job))
            .map_err(|_| HostError::invalid_state("host loop is not running"))
    }

    /// Run host-side async work (network I/O, body pumping) on the host runtime.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Run `f` on a background thread that is allowed to block.
    pub fn spawn_blocking<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.runtime.spawn_blocking(f);
    }

    /// Returns `true` when called from the host thread itself.
    pub fn is_host_thread(&self) -> bool {
        self.host_thread.get() == Some(&thread::current().id())
    }

    /// Block until every job posted before this call has run.
    ///
    /// Must not be called from the host thread.
    pub fn flush(&self) -> Result<(), HostError> {
        if self.is_host_thread() {
            return Err(HostError::invalid_state("flush called on the host thread"));
        }
        let (tx, rx) = oneshot::channel();
        self.post(move || {
            let _ = tx.send(());
        })?;
        rx.blocking_recv()
            .map_err(|_| HostError::invalid_state("host loop stopped before flush completed"))
    }

    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }
}

impl std::fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostHandle")
            .field("host_thread", &self.host_thread.get())
            .finish_non_exhaustive()
    }
}
