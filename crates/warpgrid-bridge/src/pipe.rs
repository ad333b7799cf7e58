//! Synchronous in-memory byte pipe.
//!
//! Connects a handler writing on one thread to a [`PullStream`] reading on
//! another. Writes block while the pipe holds `capacity` unread bytes, so a
//! slow host consumer throttles the handler.
//!
//! [`PullStream`]: crate::PullStream

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};

use crate::error::{BridgeError, BridgeResult};
use crate::reader::{BlockingRead, ReadOutcome};

/// Default number of unread bytes a pipe buffers before writers block.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteEnd {
    Open,
    Closed,
    Failed(String),
}

struct PipeState {
    buf: VecDeque<u8>,
    capacity: usize,
    writer: WriteEnd,
    reader_closed: bool,
}

struct Shared {
    state: Mutex<PipeState>,
    changed: Condvar,
}

pub struct PipeWriter {
    shared: Arc<Shared>,
}

pub struct PipeReader {
    shared: Arc<Shared>,
}

pub fn pipe() -> (PipeWriter, PipeReader) {
    pipe_with_capacity(DEFAULT_PIPE_CAPACITY)
}

pub fn pipe_with_capacity(capacity: usize) -> (PipeWriter, PipeReader) {
    let shared = Arc::new(Shared {
        state: Mutex::new(PipeState {
            buf: VecDeque::new(),
            capacity: capacity.max(1),
            writer: WriteEnd::Open,
            reader_closed: false,
        }),
        changed: Condvar::new(),
    });
    (
        PipeWriter {
            shared: shared.clone(),
        },
        PipeReader { shared },
    )
}

impl PipeWriter {
    /// Write all of `data`, blocking while the pipe is full.
    pub fn write_all_bytes(&self, mut data: &[u8]) -> io::Result<usize> {
        let total = data.len();
        let mut state = self.shared.state.lock().unwrap();
        while !data.is_empty() {
            if state.reader_closed {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "read side of pipe closed",
                ));
            }
            if state.writer != WriteEnd::Open {
                return Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "write on closed pipe",
                ));
            }
            let room = state.capacity.saturating_sub(state.buf.len());
            if room == 0 {
                state = self.shared.changed.wait(state).unwrap();
                continue;
            }
            let n = room.min(data.len());
            state.buf.extend(&data[..n]);
            data = &data[n..];
            self.shared.changed.notify_all();
        }
        Ok(total)
    }

    /// Signal end of data. The reader drains what is buffered first.
    pub fn close(&self) {
        let mut state = self.shared.state.lock().unwrap();
        if state.writer == WriteEnd::Open {
            state.writer = WriteEnd::Closed;
        }
        self.shared.changed.notify_all();
    }

    /// Terminate the pipe with an error the reader sees after draining.
    pub fn close_with_error(&self, message: impl Into<String>) {
        let mut state = self.shared.state.lock().unwrap();
        state.writer = WriteEnd::Failed(message.into());
        self.shared.changed.notify_all();
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_all_bytes(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for PipeWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("PipeWriter")
            .field("buffered", &state.buf.len())
            .field("writer", &state.writer)
            .finish()
    }
}

impl BlockingRead for PipeReader {
    fn read_chunk(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.reader_closed {
                return Ok(ReadOutcome::End);
            }
            if !state.buf.is_empty() {
                let n = buf.len().min(state.buf.len());
                for (slot, byte) in buf.iter_mut().zip(state.buf.drain(..n)) {
                    *slot = byte;
                }
                self.shared.changed.notify_all();
                return Ok(ReadOutcome::Data(n));
            }
            match state.writer.clone() {
                WriteEnd::Open => state = self.shared.changed.wait(state).unwrap(),
                WriteEnd::Closed => return Ok(ReadOutcome::End),
                WriteEnd::Failed(message) => return Err(BridgeError::Read(message)),
            }
        }
    }

    fn close(&mut self) -> BridgeResult<()> {
        let mut state = self.shared.state.lock().unwrap();
        state.reader_closed = true;
        state.buf.clear();
        self.shared.changed.notify_all();
        Ok(())
    }
}

impl Drop for PipeReader {
    fn drop(&mut self) {
        let _ = BlockingRead::close(self);
    }
}

impl fmt::Debug for PipeReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("PipeReader")
            .field("buffered", &state.buf.len())
            .field("closed", &state.reader_closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::thread;

    fn drain(reader: &mut PipeReader) -> BridgeResult<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 7];
        loop {
            match reader.read_chunk(&mut buf)? {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::End => return Ok(out),
            }
        }
    }

    #[test]
    fn writer_blocks_until_reader_catches_up() {
        let (mut writer, mut reader) = pipe_with_capacity(4);
        let payload: Vec<u8> = (0..100u8).collect();
        let expected = payload.clone();

        let producer = thread::spawn(move || {
            writer.write_all(&payload).unwrap();
        });
        let out = drain(&mut reader).unwrap();
        producer.join().unwrap();
        assert_eq!(out, expected);
    }

    #[test]
    fn error_is_seen_after_buffered_bytes() {
        let (writer, mut reader) = pipe();
        writer.write_all_bytes(b"partial").unwrap();
        writer.close_with_error("handler panicked");

        let mut buf = [0u8; 16];
        assert_eq!(reader.read_chunk(&mut buf).unwrap(), ReadOutcome::Data(7));
        assert_eq!(
            reader.read_chunk(&mut buf).unwrap_err(),
            BridgeError::Read("handler panicked".into())
        );
    }

    #[test]
    fn closed_reader_breaks_the_pipe() {
        let (writer, mut reader) = pipe();
        reader.close().unwrap();
        reader.close().unwrap();
        let err = writer.write_all_bytes(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
