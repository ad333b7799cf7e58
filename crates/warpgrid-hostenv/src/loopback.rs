//! In-memory network for the host.
//!
//! [`Loopback`] implements both host capabilities without touching real
//! sockets: fetch requests are routed to registered handlers by URL, and
//! WebSocket connections are paired with a [`PeerSocket`] handed to a
//! registered endpoint.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::fetch::{Fetch, FetchInit, HostRequest, HostResponse, ResponseInit};
use crate::headers::Headers;
use crate::promise::Promise;
use crate::socket::{
    CLOSE_ABNORMAL, MessageData, SocketConnector, SocketEvent, SocketTransport, WebSocket,
};
use crate::stream::ReadableStream;

type Route = Arc<dyn Fn(HostRequest) -> Promise<HostResponse> + Send + Sync>;
type Endpoint = Arc<dyn Fn(PeerSocket) + Send + Sync>;

#[derive(Default)]
struct Tables {
    routes: HashMap<String, Route>,
    endpoints: HashMap<String, Endpoint>,
}

/// The in-memory network. Clones share the same routing tables.
#[derive(Clone)]
pub struct Loopback {
    host: HostHandle,
    tables: Arc<Mutex<Tables>>,
}

impl Loopback {
    pub fn new(host: &HostHandle) -> Self {
        Self {
            host: host.clone(),
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    /// Serve fetches of `url` with `handler`. The handler runs on the host thread.
    pub fn route<F>(&self, url: impl Into<String>, handler: F)
    where
        F: Fn(HostRequest) -> Promise<HostResponse> + Send + Sync + 'static,
    {
        self.tables
            .lock()
            .unwrap()
            .routes
            .insert(url.into(), Arc::new(handler));
    }

    /// Accept socket connections to `url`. The acceptor runs on the host
    /// thread and must not block; it typically moves the peer to a task.
    pub fn listen<F>(&self, url: impl Into<String>, acceptor: F)
    where
        F: Fn(PeerSocket) + Send + Sync + 'static,
    {
        self.tables
            .lock()
            .unwrap()
            .endpoints
            .insert(url.into(), Arc::new(acceptor));
    }
}

impl Fetch for Loopback {
    fn fetch(&self, url: &str, init: FetchInit) -> Promise<HostResponse> {
        let route = self.tables.lock().unwrap().routes.get(url).cloned();
        let Some(route) = route else {
            debug!(%url, "loopback fetch to unknown route");
            return Promise::rejected(&self.host, HostError::type_error("Failed to fetch"));
        };
        let method = if init.method.is_empty() {
            "GET".to_string()
        } else {
            init.method
        };
        let body = init
            .body
            .map(|bytes| ReadableStream::from_chunks(&self.host, Some(bytes)));
        let request = HostRequest::new(
            &self.host,
            method,
            url,
            init.headers.unwrap_or_default(),
            body,
        );
        route(request)
    }
}

impl SocketConnector for Loopback {
    fn connect(&self, url: &str) -> Result<WebSocket, HostError> {
        let socket = WebSocket::new(&self.host, url);
        let endpoint = self.tables.lock().unwrap().endpoints.get(url).cloned();
        let Some(endpoint) = endpoint else {
            debug!(%url, "loopback connect to unknown endpoint");
            socket.dispatch(SocketEvent::Error(HostError::new("connection refused")));
            socket.dispatch(SocketEvent::Close {
                code: CLOSE_ABNORMAL,
                reason: String::new(),
            });
            return Ok(socket);
        };

        let (tx, rx) = mpsc::unbounded_channel();
        socket.attach_transport(Arc::new(LoopbackTransport {
            to_peer: Mutex::new(Some(tx)),
            socket: socket.clone(),
        }));
        let peer = PeerSocket {
            socket: socket.clone(),
            inbound: rx,
        };

        let posted = self.host.post(move || endpoint(peer));
        if posted.is_err() {
            return Err(HostError::invalid_state("host loop is not running"));
        }
        socket.dispatch(SocketEvent::Open);
        Ok(socket)
    }
}

impl fmt::Debug for Loopback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.lock().unwrap();
        f.debug_struct("Loopback")
            .field("routes", &tables.routes.len())
            .field("endpoints", &tables.endpoints.len())
            .finish()
    }
}

struct LoopbackTransport {
    to_peer: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    socket: WebSocket,
}

impl SocketTransport for LoopbackTransport {
    fn send(&self, data: Bytes) -> Result<(), HostError> {
        match self.to_peer.lock().unwrap().as_ref() {
            Some(tx) => tx
                .send(data)
                .map_err(|_| HostError::invalid_state("peer has gone away")),
            None => Err(HostError::invalid_state("socket is closing")),
        }
    }

    fn close(&self, code: u16, reason: &str) {
        // Dropping the sender ends the peer's receive side.
        self.to_peer.lock().unwrap().take();
        self.socket.dispatch(SocketEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

/// The server end of a loopback socket connection.
pub struct PeerSocket {
    socket: WebSocket,
    inbound: mpsc::UnboundedReceiver<Bytes>,
}

impl PeerSocket {
    pub fn url(&self) -> &str {
        self.socket.url()
    }

    pub fn send_text(&self, text: impl Into<String>) {
        self.socket
            .dispatch(SocketEvent::Message(MessageData::Text(text.into())));
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) {
        self.socket
            .dispatch(SocketEvent::Message(MessageData::Binary(data.into())));
    }

    /// Report a transport error to the client without closing.
    pub fn report_error(&self, message: impl Into<String>) {
        self.socket
            .dispatch(SocketEvent::Error(HostError::new(message)));
    }

    /// Next frame sent by the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.inbound.recv().await
    }

    /// Blocking form of [`recv`](Self::recv) for use off the host thread.
    pub fn blocking_recv(&mut self) -> Option<Bytes> {
        self.inbound.blocking_recv()
    }

    /// Close the connection from the server side.
    pub fn close(self, code: u16, reason: &str) {
        self.socket.dispatch(SocketEvent::Close {
            code,
            reason: reason.to_string(),
        });
    }
}

impl fmt::Debug for PeerSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerSocket")
            .field("url", &self.socket.url())
            .finish()
    }
}

/// Convenience for building loopback responses from a fixed body.
pub fn text_response(host: &HostHandle, status: u16, headers: Headers, body: &str) -> HostResponse {
    let stream = ReadableStream::from_chunks(host, Some(Bytes::copy_from_slice(body.as_bytes())));
    HostResponse::new(
        host,
        Some(stream),
        ResponseInit {
            status,
            status_text: String::new(),
            headers,
        },
    )
}
