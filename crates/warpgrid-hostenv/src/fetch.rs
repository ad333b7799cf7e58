//! The host's fetch capability and its request/response objects.

use std::fmt;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::headers::Headers;
use crate::promise::Promise;
use crate::stream::ReadableStream;

/// Options object passed to [`Fetch::fetch`].
#[derive(Debug, Clone, Default)]
pub struct FetchInit {
    pub method: String,
    pub headers: Option<Headers>,
    pub body: Option<Bytes>,
}

/// The host's asynchronous fetch primitive.
///
/// Must be invoked on the host thread; the returned promise settles there.
pub trait Fetch: Send + Sync {
    fn fetch(&self, url: &str, init: FetchInit) -> Promise<HostResponse>;
}

/// A capability slot with nothing plugged in.
#[derive(Debug, Clone)]
pub struct NoFetch {
    host: HostHandle,
}

impl NoFetch {
    pub fn new(host: &HostHandle) -> Self {
        Self { host: host.clone() }
    }
}

impl Fetch for NoFetch {
    fn fetch(&self, url: &str, _init: FetchInit) -> Promise<HostResponse> {
        Promise::rejected(
            &self.host,
            HostError::type_error(format!("fetch is not available: {url}")),
        )
    }
}

/// An inbound request as the host presents it to a responder.
#[derive(Clone)]
pub struct HostRequest {
    method: String,
    url: String,
    headers: Headers,
    body: Arc<Mutex<Option<ReadableStream>>>,
    host: HostHandle,
}

impl HostRequest {
    pub fn new(
        host: &HostHandle,
        method: impl Into<String>,
        url: impl Into<String>,
        headers: Headers,
        body: Option<ReadableStream>,
    ) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers,
            body: Arc::new(Mutex::new(body)),
            host: host.clone(),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// `true` while the request still carries an unconsumed body.
    pub fn has_body(&self) -> bool {
        self.body.lock().unwrap().is_some()
    }

    /// Read the whole body. The body can be consumed only once.
    pub fn array_buffer(&self) -> Promise<Bytes> {
        let body = self.body.lock().unwrap().take();
        consume_body(&self.host, body)
    }
}

impl fmt::Debug for HostRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRequest")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Init options for constructing a [`HostResponse`].
#[derive(Debug, Clone)]
pub struct ResponseInit {
    pub status: u16,
    pub status_text: String,
    pub headers: Headers,
}

impl Default for ResponseInit {
    fn default() -> Self {
        Self {
            status: 200,
            status_text: String::new(),
            headers: Headers::new(),
        }
    }
}

/// A response object on the host side of the boundary.
#[derive(Clone)]
pub struct HostResponse {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Arc<Mutex<Option<ReadableStream>>>,
    host: HostHandle,
}

impl HostResponse {
    pub fn new(host: &HostHandle, body: Option<ReadableStream>, init: ResponseInit) -> Self {
        Self {
            status: init.status,
            status_text: init.status_text,
            headers: init.headers,
            body: Arc::new(Mutex::new(body)),
            host: host.clone(),
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// The streaming body, if any. Clones share the same stream.
    pub fn body(&self) -> Option<ReadableStream> {
        self.body.lock().unwrap().clone()
    }

    /// Read the whole body. The body can be consumed only once.
    pub fn array_buffer(&self) -> Promise<Bytes> {
        let body = self.body.lock().unwrap().take();
        consume_body(&self.host, body)
    }
}

impl fmt::Debug for HostResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostResponse")
            .field("status", &self.status)
            .field("status_text", &self.status_text)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

fn consume_body(host: &HostHandle, body: Option<ReadableStream>) -> Promise<Bytes> {
    let Some(stream) = body else {
        return Promise::resolved(host, Bytes::new());
    };
    let reader = match stream.get_reader() {
        Ok(reader) => reader,
        Err(err) => return Promise::rejected(host, err),
    };

    let (promise, resolver) = Promise::new(host);
    host.spawn(async move {
        let mut collected = BytesMut::new();
        loop {
            match reader.read().settled().await {
                Ok(result) if result.done => break,
                Ok(result) => {
                    if let Some(chunk) = result.value {
                        collected.extend_from_slice(&chunk);
                    }
                }
                Err(err) => {
                    resolver.reject(err);
                    return;
                }
            }
        }
        reader.release_lock();
        resolver.resolve(collected.freeze());
    });
    promise
}
