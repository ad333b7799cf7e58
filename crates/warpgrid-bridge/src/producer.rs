//! Host streams fed by blocking readers.
//!
//! [`PullStream`] exposes a [`BlockingRead`] to the host as a
//! [`ReadableStream`] with the three-callback source protocol:
//!
//! - `start` does nothing.
//! - `pull` performs exactly one blocking read on the blocking pool, then
//!   enqueues an exact-size copy of the bytes, closes the stream at end of
//!   data, or errors it.
//! - `cancel` closes the underlying reader.
//!
//! Whichever way the stream ends, the three host functions are released and
//! the reader is closed exactly once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};
use warpgrid_hostenv::{
    Controller, HostError, Platform, Promise, ReadableStream, UnderlyingSource,
};

use crate::callbacks::CallbackRegistry;
use crate::config::DEFAULT_READ_CHUNK_SIZE;
use crate::error::BridgeError;
use crate::reader::{BlockingRead, ReadOutcome};

struct Source {
    reader: Box<dyn BlockingRead>,
    scratch: Vec<u8>,
}

struct Inner {
    platform: Platform,
    source: Mutex<Option<Source>>,
    callbacks: CallbackRegistry,
    closed: AtomicBool,
}

/// A host stream pulling from a blocking reader.
#[derive(Clone)]
pub struct PullStream {
    inner: Arc<Inner>,
    stream: ReadableStream,
}

impl PullStream {
    pub fn new(platform: &Platform, reader: impl BlockingRead + 'static) -> Self {
        Self::with_chunk_size(platform, reader, DEFAULT_READ_CHUNK_SIZE)
    }

    /// Like [`new`](Self::new) with a custom scratch buffer size, capped at
    /// [`DEFAULT_READ_CHUNK_SIZE`].
    pub fn with_chunk_size(
        platform: &Platform,
        reader: impl BlockingRead + 'static,
        chunk_size: usize,
    ) -> Self {
        let inner = Arc::new(Inner {
            platform: platform.clone(),
            source: Mutex::new(Some(Source {
                reader: Box::new(reader),
                scratch: vec![0u8; chunk_size.clamp(1, DEFAULT_READ_CHUNK_SIZE)],
            })),
            callbacks: CallbackRegistry::new(),
            closed: AtomicBool::new(false),
        });

        let funcs = platform.funcs();
        let start = inner
            .callbacks
            .register(funcs, "stream-start", |_: Controller| ());

        let pull_inner = inner.clone();
        let pull = inner
            .callbacks
            .register(funcs, "stream-pull", move |controller: Controller| {
                pull_once(&pull_inner, controller)
            });

        let cancel_inner = inner.clone();
        let cancel = inner.callbacks.register(funcs, "stream-cancel", move |_: ()| {
            debug!("host cancelled produced stream");
            let inner = cancel_inner.clone();
            cancel_inner.platform.host().spawn_blocking(move || close(&inner));
        });

        let stream = ReadableStream::new(
            platform.host(),
            UnderlyingSource {
                start: Some(start),
                pull: Some(pull),
                cancel: Some(cancel),
            },
        );
        Self { inner, stream }
    }

    /// The host-visible stream.
    pub fn stream(&self) -> ReadableStream {
        self.stream.clone()
    }

    /// Release the host callbacks and close the reader. Idempotent.
    ///
    /// On the host thread the reader is closed from the blocking pool, so a
    /// read in progress never stalls the loop.
    pub fn close(&self) {
        if self.inner.platform.host().is_host_thread() {
            let inner = self.inner.clone();
            self.inner
                .platform
                .host()
                .spawn_blocking(move || close(&inner));
        } else {
            close(&self.inner);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for PullStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PullStream")
            .field("closed", &self.is_closed())
            .field("stream", &self.stream)
            .finish()
    }
}

fn close(inner: &Inner) {
    if inner.closed.swap(true, Ordering::AcqRel) {
        return;
    }
    inner.callbacks.release_all();
    // Waits for a read in progress to hand the source back.
    let source = inner.source.lock().unwrap().take();
    if let Some(mut source) = source {
        if let Err(err) = source.reader.close() {
            warn!(error = %err, "closing stream source failed");
        }
    }
}

enum Pulled {
    Chunk(Bytes),
    Empty,
    End,
    Failed(BridgeError),
}

fn pull_once(inner: &Arc<Inner>, controller: Controller) -> Promise<()> {
    let host = inner.platform.host().clone();
    let (promise, resolver) = Promise::new(&host);
    let inner = inner.clone();

    host.clone().spawn_blocking(move || {
        let pulled = {
            let mut slot = inner.source.lock().unwrap();
            match slot.as_mut() {
                None => Pulled::End,
                Some(source) => {
                    let Source { reader, scratch } = source;
                    match reader.read_chunk(scratch) {
                        Ok(ReadOutcome::Data(0)) => Pulled::Empty,
                        Ok(ReadOutcome::Data(n)) => {
                            Pulled::Chunk(Bytes::copy_from_slice(&scratch[..n]))
                        }
                        Ok(ReadOutcome::End) => Pulled::End,
                        Err(err) => Pulled::Failed(err),
                    }
                }
            }
        };
        if matches!(pulled, Pulled::End | Pulled::Failed(_)) {
            close(&inner);
        }

        let posted = host.post(move || match pulled {
            Pulled::Chunk(chunk) => {
                controller.enqueue(chunk);
                resolver.resolve(());
            }
            Pulled::Empty => resolver.resolve(()),
            Pulled::End => {
                controller.close();
                resolver.resolve(());
            }
            Pulled::Failed(err) => {
                let error = HostError::new(err.to_string());
                controller.error(error.clone());
                resolver.reject(error);
            }
        });
        if posted.is_err() {
            debug!("pull result dropped: host loop is not running");
        }
    });
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{IoReader, PushReader};
    use std::io::Read;
    use warpgrid_hostenv::HostLoop;

    struct Failing;

    impl BlockingRead for Failing {
        fn read_chunk(&mut self, _buf: &mut [u8]) -> crate::BridgeResult<ReadOutcome> {
            Err(BridgeError::Read("disk on fire".into()))
        }

        fn close(&mut self) -> crate::BridgeResult<()> {
            Ok(())
        }
    }

    #[test]
    fn chunks_never_exceed_scratch_size() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();

        let producer = PullStream::new(&platform, IoReader::new(std::io::Cursor::new(data.clone())));
        let stream = producer.stream();
        let reader = stream.get_reader().unwrap();

        let mut out = Vec::new();
        loop {
            let result = platform
                .host()
                .runtime()
                .block_on(reader.read().settled())
                .unwrap();
            if result.done {
                break;
            }
            let chunk = result.value.unwrap();
            assert!(chunk.len() <= DEFAULT_READ_CHUNK_SIZE);
            out.extend_from_slice(&chunk);
        }
        assert_eq!(out, data);

        platform.host().flush().unwrap();
        assert!(producer.is_closed());
        assert_eq!(platform.funcs().live(), 0);
    }

    #[test]
    fn oversized_chunk_setting_is_capped() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let data = vec![7u8; 9_000];

        let producer = PullStream::with_chunk_size(
            &platform,
            IoReader::new(std::io::Cursor::new(data.clone())),
            64 * 1024,
        );
        let reader = producer.stream().get_reader().unwrap();

        let mut sizes = Vec::new();
        loop {
            let result = platform
                .host()
                .runtime()
                .block_on(reader.read().settled())
                .unwrap();
            if result.done {
                break;
            }
            sizes.push(result.value.unwrap().len());
        }
        assert_eq!(sizes, vec![4096, 4096, 808]);
    }

    #[test]
    fn reader_error_errors_the_stream() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let producer = PullStream::new(&platform, Failing);

        let mut reader = PushReader::new(&platform, &producer.stream()).unwrap();
        let err = reader.read(&mut [0u8; 16]).unwrap_err();
        assert!(err.to_string().contains("disk on fire"));
        assert!(producer.is_closed());
    }

    #[test]
    fn close_twice_releases_once() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let producer = PullStream::new(&platform, IoReader::new(std::io::empty()));
        assert_eq!(platform.funcs().live(), 3);

        producer.close();
        producer.close();
        assert!(producer.is_closed());
        assert_eq!(platform.funcs().live(), 0);
    }
}
