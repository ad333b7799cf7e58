//! Host readable byte streams.
//!
//! A [`ReadableStream`] is driven either by an [`UnderlyingSource`] (three
//! host functions: `start`, `pull`, `cancel`) or directly by the host
//! through a [`Controller`] obtained from [`ReadableStream::with_controller`].
//!
//! # Pull protocol
//!
//! The stream keeps a queue of chunks and a high-water mark of one chunk.
//! `pull` is called whenever a reader is waiting or the queue is below the
//! mark, and never while a previous pull's promise is still pending. Each
//! settled pull re-evaluates demand and triggers the next pull if needed.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::func::Func;
use crate::promise::{Promise, Resolver};

/// Chunks the stream tries to keep queued ahead of readers.
pub const DEFAULT_HIGH_WATER_MARK: usize = 1;

/// Result of one reader `read()`: `{ done, value }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub done: bool,
    pub value: Option<Bytes>,
}

impl ReadResult {
    pub fn chunk(value: Bytes) -> Self {
        Self {
            done: false,
            value: Some(value),
        }
    }

    pub fn done() -> Self {
        Self {
            done: true,
            value: None,
        }
    }
}

/// The three-callback source protocol. Missing callbacks behave as no-ops.
#[derive(Default)]
pub struct UnderlyingSource {
    pub start: Option<Func<Controller>>,
    pub pull: Option<Func<Controller, Promise<()>>>,
    pub cancel: Option<Func<()>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Readable,
    Closed,
    Errored(HostError),
}

struct StreamState {
    phase: Phase,
    queue: VecDeque<Bytes>,
    pending_reads: VecDeque<Resolver<ReadResult>>,
    close_requested: bool,
    started: bool,
    pulling: bool,
    locked: bool,
    high_water_mark: usize,
    source: UnderlyingSource,
}

struct Inner {
    state: Mutex<StreamState>,
    host: HostHandle,
}

/// A host-visible stream of byte chunks.
#[derive(Clone)]
pub struct ReadableStream {
    inner: Arc<Inner>,
}

/// Handle given to sources for feeding the stream.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

/// Exclusive reader over a [`ReadableStream`].
pub struct StreamReader {
    inner: Arc<Inner>,
    released: Mutex<bool>,
}

impl ReadableStream {
    /// Create a stream driven by `source`. `start` runs as a host job.
    pub fn new(host: &HostHandle, source: UnderlyingSource) -> Self {
        let stream = Self::build(host, source, false);
        let inner = stream.inner.clone();
        let posted = host.post(move || {
            let start = inner.state.lock().unwrap().source.start.clone();
            if let Some(start) = start {
                start.call(Controller {
                    inner: inner.clone(),
                });
            }
            inner.state.lock().unwrap().started = true;
            call_pull_if_needed(&inner);
        });
        if posted.is_err() {
            warn!("stream created after host loop stopped");
        }
        stream
    }

    /// Create a stream the host feeds itself, without pull callbacks.
    pub fn with_controller(host: &HostHandle) -> (Self, Controller) {
        let stream = Self::build(host, UnderlyingSource::default(), true);
        let controller = Controller {
            inner: stream.inner.clone(),
        };
        (stream, controller)
    }

    /// A stream that yields `chunks` in order and then closes.
    pub fn from_chunks(host: &HostHandle, chunks: impl IntoIterator<Item = Bytes>) -> Self {
        let (stream, controller) = Self::with_controller(host);
        for chunk in chunks {
            controller.enqueue(chunk);
        }
        controller.close();
        stream
    }

    fn build(host: &HostHandle, source: UnderlyingSource, started: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(StreamState {
                    phase: Phase::Readable,
                    queue: VecDeque::new(),
                    pending_reads: VecDeque::new(),
                    close_requested: false,
                    started,
                    pulling: false,
                    locked: false,
                    high_water_mark: DEFAULT_HIGH_WATER_MARK,
                    source,
                }),
                host: host.clone(),
            }),
        }
    }

    /// Acquire the exclusive reader. Fails with a `TypeError` while locked.
    pub fn get_reader(&self) -> Result<StreamReader, HostError> {
        let mut state = self.inner.state.lock().unwrap();
        if state.locked {
            return Err(HostError::type_error("ReadableStream is locked to a reader"));
        }
        state.locked = true;
        Ok(StreamReader {
            inner: self.inner.clone(),
            released: Mutex::new(false),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.state.lock().unwrap().locked
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().unwrap().phase == Phase::Closed
    }

    pub fn is_errored(&self) -> bool {
        matches!(self.inner.state.lock().unwrap().phase, Phase::Errored(_))
    }
}

impl fmt::Debug for ReadableStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock().unwrap();
        f.debug_struct("ReadableStream")
            .field("phase", &state.phase)
            .field("queued", &state.queue.len())
            .field("locked", &state.locked)
            .finish()
    }
}

impl Controller {
    /// Queue a chunk, or hand it straight to a waiting reader.
    pub fn enqueue(&self, chunk: Bytes) {
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.phase != Phase::Readable || state.close_requested {
                warn!("enqueue on a stream that is closing or closed");
                return;
            }
            match state.pending_reads.pop_front() {
                Some(read) => read.resolve(ReadResult::chunk(chunk)),
                None => state.queue.push_back(chunk),
            }
        }
        call_pull_if_needed(&self.inner);
    }

    /// Close the stream once the queued chunks are drained.
    pub fn close(&self) {
        let mut state = self.inner.state.lock().unwrap();
        if state.phase != Phase::Readable || state.close_requested {
            return;
        }
        state.close_requested = true;
        if state.queue.is_empty() {
            finish_close(&mut state);
        }
    }

    /// Error the stream, failing every pending and future read.
    pub fn error(&self, error: HostError) {
        let mut state = self.inner.state.lock().unwrap();
        if state.phase != Phase::Readable {
            return;
        }
        debug!(error = %error, "stream errored");
        state.queue.clear();
        for read in state.pending_reads.drain(..) {
            read.reject(error.clone());
        }
        state.phase = Phase::Errored(error);
    }

    /// Chunks still wanted before the high-water mark is reached.
    pub fn desired_size(&self) -> isize {
        let state = self.inner.state.lock().unwrap();
        state.high_water_mark as isize - state.queue.len() as isize
    }
}

impl StreamReader {
    /// Request the next chunk.
    pub fn read(&self) -> Promise<ReadResult> {
        let host = self.inner.host.clone();
        if *self.released.lock().unwrap() {
            return Promise::rejected(&host, HostError::type_error("reader has been released"));
        }

        let promise = {
            let mut state = self.inner.state.lock().unwrap();
            if let Some(chunk) = state.queue.pop_front() {
                if state.close_requested && state.queue.is_empty() {
                    finish_close(&mut state);
                }
                Promise::resolved(&host, ReadResult::chunk(chunk))
            } else {
                match state.phase.clone() {
                    Phase::Closed => Promise::resolved(&host, ReadResult::done()),
                    Phase::Errored(error) => Promise::rejected(&host, error),
                    Phase::Readable => {
                        let (promise, resolver) = Promise::new(&host);
                        state.pending_reads.push_back(resolver);
                        promise
                    }
                }
            }
        };
        call_pull_if_needed(&self.inner);
        promise
    }

    /// Cancel the stream: discard queued data, resolve pending reads as done
    /// and notify the source. Releases the reader lock.
    pub fn cancel(&self) -> Promise<()> {
        let host = self.inner.host.clone();
        let (cancel, failure) = {
            let mut state = self.inner.state.lock().unwrap();
            match state.phase.clone() {
                Phase::Errored(error) => (None, Some(error)),
                Phase::Closed => (None, None),
                Phase::Readable => {
                    state.queue.clear();
                    finish_close(&mut state);
                    (state.source.cancel.clone(), None)
                }
            }
        };
        if let Some(error) = failure {
            self.release_lock();
            return Promise::rejected(&host, error);
        }
        if let Some(cancel) = cancel {
            let posted = host.post(move || {
                cancel.call(());
            });
            if posted.is_err() {
                debug!("stream cancel dropped: host loop is not running");
            }
        }
        self.release_lock();
        Promise::resolved(&host, ())
    }

    /// Give up the reader lock so another consumer may attach.
    pub fn release_lock(&self) {
        let mut released = self.released.lock().unwrap();
        if !*released {
            *released = true;
            self.inner.state.lock().unwrap().locked = false;
        }
    }
}

impl fmt::Debug for StreamReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamReader")
            .field("released", &*self.released.lock().unwrap())
            .finish()
    }
}

fn finish_close(state: &mut StreamState) {
    state.phase = Phase::Closed;
    for read in state.pending_reads.drain(..) {
        read.resolve(ReadResult::done());
    }
}

fn call_pull_if_needed(inner: &Arc<Inner>) {
    let pull = {
        let mut state = inner.state.lock().unwrap();
        let wanted = !state.pending_reads.is_empty() || state.queue.len() < state.high_water_mark;
        let should_pull = state.started
            && state.phase == Phase::Readable
            && !state.close_requested
            && wanted;
        if !should_pull {
            return;
        }
        let Some(pull) = state.source.pull.clone() else {
            return;
        };
        if state.pulling {
            return;
        }
        state.pulling = true;
        pull
    };

    let job_inner = inner.clone();
    let posted = inner.host.post(move || {
        let controller = Controller {
            inner: job_inner.clone(),
        };
        let Some(promise) = pull.call(controller.clone()) else {
            // A released pull callback can no longer produce data.
            job_inner.state.lock().unwrap().pulling = false;
            return;
        };
        let settle_inner = job_inner.clone();
        promise.on_settle(move |result| match result {
            Ok(()) => {
                settle_inner.state.lock().unwrap().pulling = false;
                // A pull that produced nothing must not strand a waiting reader.
                call_pull_if_needed(&settle_inner);
            }
            Err(error) => {
                settle_inner.state.lock().unwrap().pulling = false;
                controller.error(error);
            }
        });
    });
    if posted.is_err() {
        inner.state.lock().unwrap().pulling = false;
    }
}
