//! Serving host requests with blocking handlers.
//!
//! For each inbound [`HostRequest`] the [`Responder`] returns a promise
//! right away, then as a host task:
//!
//! 1. converts the request, awaiting its body;
//! 2. starts the [`Handler`] on a thread of its own, writing into a [`pipe`];
//! 3. awaits the handler's header commit and resolves the promise with a
//!    response whose body is a [`PullStream`] over the pipe.
//!
//! Only handler threads and stream pulls block. Handlers never wait for a
//! blocking-pool thread.
//!
//! Body bytes keep flowing after the promise resolves. A handler that never
//! commits gets a 502; a handler that panics before committing gets a 500,
//! and the body of a panicking handler always ends in a stream error.

use std::any::Any;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use tokio::sync::oneshot;
use tracing::{debug, error, warn};
use warpgrid_hostenv::{
    Headers, HostError, HostRequest, HostResponse, Platform, Promise, Resolver, ResponseInit,
};

use crate::config::{BridgeConfig, DEFAULT_READ_CHUNK_SIZE};
use crate::error::{BridgeError, BridgeResult};
use crate::header::HeaderMap;
use crate::pipe::{pipe, PipeWriter};
use crate::producer::PullStream;
use crate::request::IncomingRequest;

const BAD_GATEWAY_BODY: &str = "Bad Gateway\n\nUpstream server error\n";
const HANDLER_THREAD_NAME: &str = "warpgrid-handler";

/// A blocking request handler.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, response: &mut ResponseWriter, request: &IncomingRequest);
}

impl<F> Handler for F
where
    F: Fn(&mut ResponseWriter, &IncomingRequest) + Send + Sync + 'static,
{
    fn serve(&self, response: &mut ResponseWriter, request: &IncomingRequest) {
        self(response, request)
    }
}

/// Status and headers as they were when the handler committed.
#[derive(Debug)]
struct Commit {
    status: u16,
    headers: HeaderMap,
}

/// The handler's side of a response.
///
/// Headers can be changed until the first [`write_header`] or write, which
/// commits them. Later changes are not sent.
///
/// [`write_header`]: ResponseWriter::write_header
pub struct ResponseWriter {
    headers: HeaderMap,
    status: u16,
    commit: Option<oneshot::Sender<Commit>>,
    body: PipeWriter,
}

impl ResponseWriter {
    fn new(body: PipeWriter, commit: oneshot::Sender<Commit>) -> Self {
        Self {
            headers: HeaderMap::new(),
            status: 200,
            commit: Some(commit),
            body,
        }
    }

    /// Mutable response headers.
    pub fn header(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Commit the status line and headers. Only the first call counts.
    pub fn write_header(&mut self, status: u16) {
        let Some(commit) = self.commit.take() else {
            debug!(status, "ignoring repeated write_header");
            return;
        };
        self.status = status;
        let _ = commit.send(Commit {
            status,
            headers: self.headers.clone(),
        });
    }

    /// Write body bytes, committing a 200 first if nothing was committed.
    pub fn write_body(&mut self, data: &[u8]) -> BridgeResult<usize> {
        if !self.headers_sent() {
            self.write_header(200);
        }
        self.body
            .write_all_bytes(data)
            .map_err(|e| BridgeError::Send(e.to_string()))
    }

    pub fn headers_sent(&self) -> bool {
        self.commit.is_none()
    }

    pub fn status(&self) -> u16 {
        self.status
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.write_body(buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for ResponseWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseWriter")
            .field("status", &self.status)
            .field("headers_sent", &self.headers_sent())
            .finish_non_exhaustive()
    }
}

struct Inner {
    platform: Platform,
    handler: Box<dyn Handler>,
    chunk_size: usize,
}

/// Exposes a [`Handler`] to the host as an asynchronous responder.
#[derive(Clone)]
pub struct Responder {
    inner: Arc<Inner>,
}

impl Responder {
    pub fn new(platform: &Platform, handler: impl Handler) -> Self {
        Self::build(platform, handler, DEFAULT_READ_CHUNK_SIZE)
    }

    pub fn with_config(platform: &Platform, handler: impl Handler, config: &BridgeConfig) -> Self {
        Self::build(platform, handler, config.read_chunk_size)
    }

    fn build(platform: &Platform, handler: impl Handler, chunk_size: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                platform: platform.clone(),
                handler: Box::new(handler),
                chunk_size,
            }),
        }
    }

    /// Serve `request`. Never blocks the calling thread.
    pub fn respond(&self, request: HostRequest) -> Promise<HostResponse> {
        let host = self.inner.platform.host().clone();
        let (promise, resolver) = Promise::new(&host);
        host.spawn(serve(self.inner.clone(), request, resolver));
        promise
    }

    /// Adapt this responder into a host route.
    pub fn into_route(self) -> impl Fn(HostRequest) -> Promise<HostResponse> + Send + Sync + 'static {
        move |request| self.respond(request)
    }
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("chunk_size", &self.inner.chunk_size)
            .finish_non_exhaustive()
    }
}

async fn serve(inner: Arc<Inner>, request: HostRequest, resolver: Resolver<HostResponse>) {
    let incoming = match IncomingRequest::from_host_async(&request).await {
        Ok(incoming) => incoming,
        Err(err) => {
            warn!(method = %request.method(), url = %request.url(), error = %err, "rejecting request");
            resolver.reject(HostError::new(err.to_string()));
            return;
        }
    };

    let (body_writer, body_reader) = pipe();
    let (commit_tx, commit_rx) = oneshot::channel();
    let worker = inner.clone();
    let spawned = thread::Builder::new()
        .name(HANDLER_THREAD_NAME.to_string())
        .spawn(move || run_handler(&worker, incoming, body_writer, commit_tx));
    if let Err(err) = spawned {
        error!(url = %request.url(), error = %err, "failed to start handler thread");
        resolver.reject(HostError::new(format!("failed to start handler: {err}")));
        return;
    }

    let Ok(commit) = commit_rx.await else {
        resolver.reject(HostError::new(BridgeError::HostGone.to_string()));
        return;
    };
    debug!(status = commit.status, url = %request.url(), "headers committed");

    let body = PullStream::with_chunk_size(&inner.platform, body_reader, inner.chunk_size);
    let response = HostResponse::new(
        inner.platform.host(),
        Some(body.stream()),
        ResponseInit {
            status: commit.status,
            status_text: status_text(commit.status),
            headers: host_headers(&commit.headers),
        },
    );
    resolver.resolve(response);
}

fn run_handler(
    inner: &Inner,
    request: IncomingRequest,
    body: PipeWriter,
    commit: oneshot::Sender<Commit>,
) {
    let mut writer = ResponseWriter::new(body, commit);
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        inner.handler.serve(&mut writer, &request)
    }));

    match outcome {
        Ok(()) => {
            if !writer.headers_sent() {
                writer
                    .header()
                    .set("Content-Type", "text/plain; charset=utf-8");
                writer.write_header(502);
                let _ = writer.write_body(BAD_GATEWAY_BODY.as_bytes());
            }
            writer.body.close();
        }
        Err(payload) => {
            let fault = BridgeError::HandlerFault(panic_message(payload.as_ref()));
            error!(
                method = %request.method(),
                uri = %request.uri(),
                headers_sent = writer.headers_sent(),
                error = %fault,
                "handler panicked"
            );
            if !writer.headers_sent() {
                writer.write_header(500);
            }
            writer.body.close_with_error(fault.to_string());
        }
    }
}

/// The first value of each header, under the host's naming rules.
fn host_headers(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for name in headers.names() {
        let Some(value) = headers.get(name) else {
            continue;
        };
        if let Err(err) = out.set(name, value) {
            warn!(header = %name, error = %err, "dropping response header");
        }
    }
    out
}

fn status_text(status: u16) -> String {
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|code| code.canonical_reason())
        .unwrap_or_default()
        .to_string()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_uses_canonical_reason() {
        assert_eq!(status_text(201), "Created");
        assert_eq!(status_text(502), "Bad Gateway");
        assert_eq!(status_text(599), "");
    }

    #[test]
    fn host_headers_keep_first_value() {
        let mut headers = HeaderMap::new();
        headers.insert("Set-Cookie", "a=1");
        headers.insert("Set-Cookie", "b=2");
        headers.insert("X-Ok", "yes");
        headers.insert("Bad Name", "dropped");

        let host = host_headers(&headers);
        assert_eq!(host.get("set-cookie").as_deref(), Some("a=1"));
        assert_eq!(host.get("x-ok").as_deref(), Some("yes"));
        assert_eq!(host.len(), 2);
    }

    #[test]
    fn write_header_commits_once() {
        let (body, _reader) = pipe();
        let (tx, mut rx) = oneshot::channel();
        let mut writer = ResponseWriter::new(body, tx);
        writer.header().insert("X-A", "1");

        writer.write_header(201);
        writer.header().insert("X-B", "late");
        writer.write_header(404);

        assert_eq!(writer.status(), 201);
        let commit = rx.try_recv().unwrap();
        assert_eq!(commit.status, 201);
        assert!(commit.headers.get("X-B").is_none());
    }

    #[test]
    fn first_write_commits_200() {
        let (body, _reader) = pipe();
        let (tx, mut rx) = oneshot::channel();
        let mut writer = ResponseWriter::new(body, tx);
        assert!(!writer.headers_sent());

        writer.write_body(b"hi").unwrap();
        assert!(writer.headers_sent());
        assert_eq!(rx.try_recv().unwrap().status, 200);
    }

    #[test]
    fn panic_payloads_become_messages() {
        let err = panic::catch_unwind(|| {
            panic!("boom");
        })
        .unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "boom");
        let err = panic::catch_unwind(|| {
            panic!("code {}", 7);
        })
        .unwrap_err();
        assert_eq!(panic_message(err.as_ref()), "code 7");
    }
}
