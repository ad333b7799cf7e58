//! Blocking duplex sockets over host WebSockets.
//!
//! Every host event for a connection goes through one ingestion point that
//! drives the [`ConnState`] machine and fills a bounded inbound queue.
//! Workers block on a condition variable; the host loop never waits.
//!
//! ```text
//! Connecting ──open──► Open ──close()──► Closing ──close event──► Closed
//!      │                 └────────────close event─────────────────►┘
//!      └──error / close event──► Closed
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};
use warpgrid_hostenv::{EventKind, Platform, SocketEvent, WebSocket};

use crate::callbacks::CallbackRegistry;
use crate::config::{BridgeConfig, DEFAULT_SOCKET_QUEUE_CAPACITY};
use crate::error::{BridgeError, BridgeResult};
use crate::rendezvous::call_on_host;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

struct ConnInner {
    state: ConnState,
    queue: VecDeque<Bytes>,
    capacity: usize,
    dropped: u64,
    failure: Option<String>,
}

struct Shared {
    url: String,
    inner: Mutex<ConnInner>,
    changed: Condvar,
    callbacks: CallbackRegistry,
}

impl Shared {
    /// The single ingestion point for host socket events.
    fn ingest(&self, event: SocketEvent) {
        let mut inner = self.inner.lock().unwrap();
        match event {
            SocketEvent::Open => {
                if inner.state == ConnState::Connecting {
                    inner.state = ConnState::Open;
                    debug!(url = %self.url, "socket open");
                }
            }
            SocketEvent::Error(error) => {
                debug!(url = %self.url, error = %error, "socket error");
                if inner.failure.is_none() {
                    inner.failure = Some(error.message().unwrap_or("socket error").to_string());
                }
                if inner.state == ConnState::Connecting {
                    inner.state = ConnState::Closing;
                }
            }
            SocketEvent::Message(data) => {
                if inner.state == ConnState::Closed {
                    return;
                }
                if inner.queue.len() >= inner.capacity {
                    inner.queue.pop_front();
                    inner.dropped += 1;
                    warn!(
                        url = %self.url,
                        capacity = inner.capacity,
                        dropped = inner.dropped,
                        "inbound socket queue full, dropping oldest message"
                    );
                }
                inner.queue.push_back(data.into_bytes());
            }
            SocketEvent::Close { code, reason } => {
                debug!(url = %self.url, code, %reason, "socket closed");
                inner.state = ConnState::Closed;
                drop(inner);
                self.callbacks.release_all();
                self.changed.notify_all();
                return;
            }
        }
        drop(inner);
        self.changed.notify_all();
    }
}

/// A blocking message-oriented connection.
pub struct SocketConn {
    platform: Platform,
    socket: WebSocket,
    shared: Arc<Shared>,
}

impl SocketConn {
    /// Connect to `url` and block until the connection opens or fails.
    pub fn dial(platform: &Platform, url: &str) -> BridgeResult<Self> {
        Self::dial_with_capacity(platform, url, DEFAULT_SOCKET_QUEUE_CAPACITY)
    }

    /// Like [`dial`](Self::dial) with the queue capacity from `config`.
    pub fn dial_with_config(
        platform: &Platform,
        url: &str,
        config: &BridgeConfig,
    ) -> BridgeResult<Self> {
        Self::dial_with_capacity(platform, url, config.socket_queue_capacity)
    }

    pub fn dial_with_capacity(
        platform: &Platform,
        url: &str,
        capacity: usize,
    ) -> BridgeResult<Self> {
        let shared = Arc::new(Shared {
            url: url.to_string(),
            inner: Mutex::new(ConnInner {
                state: ConnState::Connecting,
                queue: VecDeque::new(),
                capacity: capacity.max(1),
                dropped: 0,
                failure: None,
            }),
            changed: Condvar::new(),
            callbacks: CallbackRegistry::new(),
        });

        let job_platform = platform.clone();
        let job_shared = shared.clone();
        let target = url.to_string();
        let socket = call_on_host(platform, move || {
            let socket = job_platform.sockets().connect(&target)?;
            let ingest_shared = job_shared.clone();
            let listener = job_shared.callbacks.register(
                job_platform.funcs(),
                "socket-event",
                move |event: SocketEvent| ingest_shared.ingest(event),
            );
            for kind in [
                EventKind::Open,
                EventKind::Error,
                EventKind::Message,
                EventKind::Close,
            ] {
                socket.add_event_listener(kind, &listener);
            }
            Ok::<_, warpgrid_hostenv::HostError>(socket)
        })?
        .map_err(|e| BridgeError::DialFailed(e.to_string()))?;

        let conn = Self {
            platform: platform.clone(),
            socket,
            shared,
        };

        let mut inner = conn.shared.inner.lock().unwrap();
        while inner.state == ConnState::Connecting {
            inner = conn.shared.changed.wait(inner).unwrap();
        }
        if inner.state == ConnState::Open {
            drop(inner);
            return Ok(conn);
        }
        let reason = inner
            .failure
            .clone()
            .unwrap_or_else(|| "connection closed before open".to_string());
        drop(inner);
        conn.request_close();
        Err(BridgeError::DialFailed(reason))
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn state(&self) -> ConnState {
        self.shared.inner.lock().unwrap().state
    }

    /// Messages dropped because the inbound queue was full.
    pub fn dropped(&self) -> u64 {
        self.shared.inner.lock().unwrap().dropped
    }

    /// Block until a message arrives. Queued messages are still delivered
    /// after the close event; once drained this returns `SocketClosed`.
    pub fn next_message(&self) -> BridgeResult<Bytes> {
        if self.platform.host().is_host_thread() {
            return Err(BridgeError::WouldBlockHost);
        }
        let mut inner = self.shared.inner.lock().unwrap();
        loop {
            if let Some(message) = inner.queue.pop_front() {
                return Ok(message);
            }
            if inner.state == ConnState::Closed {
                return Err(BridgeError::SocketClosed);
            }
            inner = self.shared.changed.wait(inner).unwrap();
        }
    }

    /// Send `data` as one binary frame. Failures come from the host socket,
    /// including sends after close.
    pub fn send(&self, data: Bytes) -> BridgeResult<()> {
        let socket = self.socket.clone();
        call_on_host(&self.platform, move || socket.send(data))?
            .map_err(|e| BridgeError::Send(e.to_string()))
    }

    /// Close the connection and wait for the host's close event. Idempotent.
    pub fn close(&self) -> BridgeResult<()> {
        if self.platform.host().is_host_thread() {
            return Err(BridgeError::WouldBlockHost);
        }
        self.request_close();
        let mut inner = self.shared.inner.lock().unwrap();
        while inner.state != ConnState::Closed {
            inner = self.shared.changed.wait(inner).unwrap();
        }
        drop(inner);
        self.shared.callbacks.release_all();
        Ok(())
    }

    fn request_close(&self) {
        {
            let mut inner = self.shared.inner.lock().unwrap();
            match inner.state {
                ConnState::Closed => return,
                ConnState::Connecting | ConnState::Open => inner.state = ConnState::Closing,
                ConnState::Closing => {}
            }
        }
        let socket = self.socket.clone();
        if self.platform.host().post(move || socket.close()).is_err() {
            // Nothing will ever deliver the close event.
            let mut inner = self.shared.inner.lock().unwrap();
            inner.state = ConnState::Closed;
            drop(inner);
            self.shared.callbacks.release_all();
            self.shared.changed.notify_all();
        }
    }
}

impl Drop for SocketConn {
    fn drop(&mut self) {
        self.request_close();
    }
}

impl fmt::Debug for SocketConn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketConn")
            .field("url", &self.shared.url)
            .field("state", &self.state())
            .finish()
    }
}

/// Byte-stream view of a [`SocketConn`].
///
/// Reads serve the rest of a partially consumed message before taking the
/// next one, so message boundaries are not preserved. Each write is one
/// frame. One reader and one writer may run at the same time.
pub struct SocketStream {
    conn: SocketConn,
    pending: Mutex<Option<Bytes>>,
    write_lock: Mutex<()>,
}

impl SocketStream {
    pub fn new(conn: SocketConn) -> Self {
        Self {
            conn,
            pending: Mutex::new(None),
            write_lock: Mutex::new(()),
        }
    }

    pub fn dial(platform: &Platform, url: &str) -> BridgeResult<Self> {
        SocketConn::dial(platform, url).map(Self::new)
    }

    pub fn conn(&self) -> &SocketConn {
        &self.conn
    }

    /// Copy the next bytes into `buf`.
    pub fn read_bytes(&self, buf: &mut [u8]) -> BridgeResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut pending = self.pending.lock().unwrap();
        let mut message = match pending.take() {
            Some(rest) => rest,
            None => self.conn.next_message()?,
        };
        let n = message.len().min(buf.len());
        buf[..n].copy_from_slice(&message[..n]);
        let rest = message.split_off(n);
        if !rest.is_empty() {
            *pending = Some(rest);
        }
        Ok(n)
    }

    /// Send all of `buf` as one frame.
    pub fn write_bytes(&self, buf: &[u8]) -> BridgeResult<usize> {
        let _guard = self.write_lock.lock().unwrap();
        self.conn.send(Bytes::copy_from_slice(buf))?;
        Ok(buf.len())
    }

    pub fn close(&self) -> BridgeResult<()> {
        self.conn.close()
    }
}

impl io::Read for &SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_bytes(buf) {
            Ok(n) => Ok(n),
            Err(BridgeError::SocketClosed) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

impl io::Write for &SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_bytes(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for SocketStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(&mut &*self, buf)
    }
}

impl io::Write for SocketStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::Write::write(&mut &*self, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for SocketStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketStream")
            .field("conn", &self.conn)
            .finish_non_exhaustive()
    }
}
