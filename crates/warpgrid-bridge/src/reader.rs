//! Blocking reads over host streams.
//!
//! [`PushReader`] turns a host [`ReadableStream`] into a pull-style reader
//! that a worker thread can call in a loop. Each call either serves bytes
//! left over from the previous host chunk or performs exactly one host
//! `read()` and waits for it.

use std::fmt;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;
use warpgrid_hostenv::{Platform, ReadableStream, StreamReader};

use crate::error::{BridgeError, BridgeResult};
use crate::rendezvous::await_promise;

/// Result of one blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were written to the front of the buffer. May be zero.
    Data(usize),
    /// The source is exhausted. Every later read reports this again.
    End,
}

/// A source that can be read from a blocking context.
///
/// Callers must not issue concurrent reads on one instance.
pub trait BlockingRead: Send {
    fn read_chunk(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome>;

    /// Stop reading. Safe to call more than once.
    fn close(&mut self) -> BridgeResult<()>;
}

/// Adapts any [`io::Read`] to [`BlockingRead`].
pub struct IoReader<R> {
    inner: Option<R>,
}

impl<R: io::Read + Send> IoReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<R: io::Read + Send> BlockingRead for IoReader<R> {
    fn read_chunk(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(ReadOutcome::End);
        };
        if buf.is_empty() {
            return Ok(ReadOutcome::Data(0));
        }
        match inner.read(buf) {
            Ok(0) => Ok(ReadOutcome::End),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(e) => Err(BridgeError::Read(e.to_string())),
        }
    }

    fn close(&mut self) -> BridgeResult<()> {
        self.inner = None;
        Ok(())
    }
}

impl<R> fmt::Debug for IoReader<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoReader")
            .field("closed", &self.inner.is_none())
            .finish()
    }
}

/// Pull-style reader over a host stream.
pub struct PushReader {
    platform: Platform,
    reader: Arc<StreamReader>,
    leftover: Option<Bytes>,
    closed: bool,
    cancelled: bool,
}

impl PushReader {
    /// Lock `stream` to a new reader.
    pub fn new(platform: &Platform, stream: &ReadableStream) -> BridgeResult<Self> {
        let reader = stream
            .get_reader()
            .map_err(|e| BridgeError::Read(e.to_string()))?;
        Ok(Self {
            platform: platform.clone(),
            reader: Arc::new(reader),
            leftover: None,
            closed: false,
            cancelled: false,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn serve(&mut self, mut chunk: Bytes, buf: &mut [u8]) -> ReadOutcome {
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        let rest = chunk.split_off(n);
        if !rest.is_empty() {
            self.leftover = Some(rest);
        }
        ReadOutcome::Data(n)
    }
}

impl BlockingRead for PushReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        if self.closed {
            return Ok(ReadOutcome::End);
        }
        if let Some(chunk) = self.leftover.take() {
            return Ok(self.serve(chunk, buf));
        }

        let reader = self.reader.clone();
        let result = await_promise(&self.platform, move |_| reader.read())?;
        match result {
            Ok(result) if result.done => {
                self.closed = true;
                Ok(ReadOutcome::End)
            }
            Ok(result) => match result.value {
                Some(chunk) if !chunk.is_empty() => Ok(self.serve(chunk, buf)),
                _ => Ok(ReadOutcome::Data(0)),
            },
            Err(error) => Err(BridgeError::Read(error.to_string())),
        }
    }

    /// Mark the reader finished and cancel the host stream. Does not wait for
    /// the host to process the cancel.
    fn close(&mut self) -> BridgeResult<()> {
        self.closed = true;
        self.leftover = None;
        if self.cancelled {
            return Ok(());
        }
        self.cancelled = true;
        let reader = self.reader.clone();
        let posted = self.platform.host().post(move || {
            let _ = reader.cancel();
        });
        if posted.is_err() {
            debug!("push reader cancel dropped: host loop is not running");
        }
        Ok(())
    }
}

impl io::Read for PushReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            match self.read_chunk(buf)? {
                ReadOutcome::Data(0) => continue,
                ReadOutcome::Data(n) => return Ok(n),
                ReadOutcome::End => return Ok(0),
            }
        }
    }
}

impl Drop for PushReader {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

impl fmt::Debug for PushReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushReader")
            .field("leftover", &self.leftover.as_ref().map(Bytes::len))
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use warpgrid_hostenv::{HostError, HostLoop};

    fn chunks(parts: &[&'static str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from_static(p.as_bytes())).collect()
    }

    #[test]
    fn small_buffers_reassemble_host_chunks() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let stream = ReadableStream::from_chunks(
            platform.host(),
            chunks(&["hello", "", " wor", "ld!"]),
        );
        let mut reader = PushReader::new(&platform, &stream).unwrap();

        let mut out = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            match reader.read_chunk(&mut buf).unwrap() {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::End => break,
            }
        }
        assert_eq!(out, b"hello world!");
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::End);
    }

    #[test]
    fn io_read_skips_empty_chunks() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let stream = ReadableStream::from_chunks(platform.host(), chunks(&["", "abc", ""]));
        let mut reader = PushReader::new(&platform, &stream).unwrap();

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "abc");
    }

    #[test]
    fn host_error_becomes_read_error() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let (stream, controller) = ReadableStream::with_controller(platform.host());
        controller.error(HostError::new("reset"));
        let mut reader = PushReader::new(&platform, &stream).unwrap();

        let err = reader.read_chunk(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err, BridgeError::Read("Error: reset".into()));
    }

    #[test]
    fn close_is_idempotent_and_unlocks_stream() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let stream = ReadableStream::from_chunks(platform.host(), chunks(&["abcdef"]));
        let mut reader = PushReader::new(&platform, &stream).unwrap();

        let mut buf = [0u8; 2];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::Data(2));
        reader.close().unwrap();
        reader.close().unwrap();
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::End);

        platform.host().flush().unwrap();
        assert!(!stream.is_locked());
    }

    #[test]
    fn io_reader_maps_eof_to_end() {
        let mut reader = IoReader::new(&b"xy"[..]);
        let mut buf = [0u8; 8];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::Data(2));
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::End);
        reader.close().unwrap();
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::End);
    }
}
