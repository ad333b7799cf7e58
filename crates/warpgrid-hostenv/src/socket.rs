//! Host WebSocket objects.
//!
//! A [`WebSocket`] is event driven: the transport behind it calls
//! [`WebSocket::dispatch`], which schedules listener calls as host jobs and
//! advances the ready state. Listeners always run on the host thread.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::func::Func;

/// Close code reported when a connection ends without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;
/// Close code for an orderly shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Payload of a message event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageData {
    Text(String),
    Binary(Bytes),
}

impl MessageData {
    /// The raw payload bytes, UTF-8 for text frames.
    pub fn into_bytes(self) -> Bytes {
        match self {
            MessageData::Text(text) => Bytes::from(text),
            MessageData::Binary(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
    Open,
    Error(HostError),
    Message(MessageData),
    Close { code: u16, reason: String },
}

impl SocketEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SocketEvent::Open => EventKind::Open,
            SocketEvent::Error(_) => EventKind::Error,
            SocketEvent::Message(_) => EventKind::Message,
            SocketEvent::Close { .. } => EventKind::Close,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Open,
    Error,
    Message,
    Close,
}

/// The wire side of a socket, supplied by whoever opened the connection.
pub trait SocketTransport: Send + Sync {
    /// Send one binary frame.
    fn send(&self, data: Bytes) -> Result<(), HostError>;

    /// Begin the closing handshake. The transport must eventually dispatch
    /// a close event on the socket.
    fn close(&self, code: u16, reason: &str);
}

/// The host's socket constructor.
pub trait SocketConnector: Send + Sync {
    fn connect(&self, url: &str) -> Result<WebSocket, HostError>;
}

/// A connector slot with nothing plugged in.
#[derive(Debug, Clone, Default)]
pub struct NoSockets;

impl SocketConnector for NoSockets {
    fn connect(&self, url: &str) -> Result<WebSocket, HostError> {
        Err(HostError::type_error(format!(
            "WebSocket is not available: {url}"
        )))
    }
}

struct SocketState {
    ready_state: ReadyState,
    listeners: Vec<(EventKind, Func<SocketEvent>)>,
    transport: Option<Arc<dyn SocketTransport>>,
}

struct SocketInner {
    url: String,
    host: HostHandle,
    state: Mutex<SocketState>,
}

/// A host WebSocket. Clones refer to the same connection.
#[derive(Clone)]
pub struct WebSocket {
    inner: Arc<SocketInner>,
}

impl WebSocket {
    /// A socket in the `Connecting` state with no transport yet.
    pub fn new(host: &HostHandle, url: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                url: url.into(),
                host: host.clone(),
                state: Mutex::new(SocketState {
                    ready_state: ReadyState::Connecting,
                    listeners: Vec::new(),
                    transport: None,
                }),
            }),
        }
    }

    pub fn attach_transport(&self, transport: Arc<dyn SocketTransport>) {
        self.inner.state.lock().unwrap().transport = Some(transport);
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.state.lock().unwrap().ready_state
    }

    /// Register `listener` for events of `kind`. The socket does not take
    /// ownership of the registration.
    pub fn add_event_listener(&self, kind: EventKind, listener: &Func<SocketEvent>) {
        self.inner
            .state
            .lock()
            .unwrap()
            .listeners
            .push((kind, listener.clone()));
    }

    /// Send one binary frame.
    pub fn send(&self, data: Bytes) -> Result<(), HostError> {
        let transport = {
            let state = self.inner.state.lock().unwrap();
            match state.ready_state {
                ReadyState::Connecting => {
                    return Err(HostError::invalid_state("WebSocket is still connecting"));
                }
                ReadyState::Closing | ReadyState::Closed => {
                    return Err(HostError::invalid_state(
                        "WebSocket is already in CLOSING or CLOSED state",
                    ));
                }
                ReadyState::Open => state.transport.clone(),
            }
        };
        match transport {
            Some(transport) => transport.send(data),
            None => Err(HostError::invalid_state("WebSocket has no transport")),
        }
    }

    /// Start the closing handshake. Does nothing once closing has begun.
    pub fn close(&self) {
        let transport = {
            let mut state = self.inner.state.lock().unwrap();
            match state.ready_state {
                ReadyState::Closing | ReadyState::Closed => return,
                ReadyState::Connecting | ReadyState::Open => {
                    state.ready_state = ReadyState::Closing;
                    state.transport.clone()
                }
            }
        };
        match transport {
            Some(transport) => transport.close(CLOSE_NORMAL, ""),
            None => self.dispatch(SocketEvent::Close {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            }),
        }
    }

    /// Deliver an event: a host job advances the ready state and then calls
    /// every listener registered for the event's kind, in registration order.
    /// Events arriving after the close event are discarded.
    pub fn dispatch(&self, event: SocketEvent) {
        let inner = self.inner.clone();
        let posted = self.inner.host.post(move || {
            let listeners: Vec<Func<SocketEvent>> = {
                let mut state = inner.state.lock().unwrap();
                if state.ready_state == ReadyState::Closed {
                    debug!(url = %inner.url, kind = ?event.kind(), "event after close dropped");
                    return;
                }
                match &event {
                    SocketEvent::Open if state.ready_state == ReadyState::Connecting => {
                        state.ready_state = ReadyState::Open;
                    }
                    SocketEvent::Close { .. } => {
                        state.ready_state = ReadyState::Closed;
                        state.transport = None;
                    }
                    _ => {}
                }
                let kind = event.kind();
                state
                    .listeners
                    .iter()
                    .filter(|(k, _)| *k == kind)
                    .map(|(_, f)| f.clone())
                    .collect()
            };
            for listener in listeners {
                listener.call(event.clone());
            }
        });
        if posted.is_err() {
            debug!(url = %self.inner.url, "socket event dropped: host loop is not running");
        }
    }
}

impl fmt::Debug for WebSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocket")
            .field("url", &self.inner.url)
            .field("ready_state", &self.ready_state())
            .finish()
    }
}
