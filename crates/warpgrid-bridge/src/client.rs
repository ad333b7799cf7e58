//! Blocking request/response client over the host fetch capability.
//!
//! [`Client::execute`] hands a request to the host, then parks the calling
//! worker on a rendezvous until one of two mutually exclusive promise
//! continuations fires. The response body stays on the host side and is
//! pulled lazily through a [`PushReader`].

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use bytes::Bytes;
use tracing::debug;
use warpgrid_hostenv::{FetchInit, Headers, HostError, Platform, ReadableStream};

use crate::config::DEFAULT_READ_CHUNK_SIZE;
use crate::error::{BridgeError, BridgeResult};
use crate::header::canonical_name;
use crate::producer::PullStream;
use crate::reader::{BlockingRead, PushReader, ReadOutcome};
use crate::rendezvous::await_promise;

/// An outbound request. Each header name holds one value; the last write wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: String,
    url: String,
    headers: BTreeMap<String, String>,
    body: Option<Bytes>,
}

impl Request {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn set_header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.insert(canonical_name(name), value.into());
        self
    }

    pub fn set_body(&mut self, body: impl Into<Bytes>) -> &mut Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&canonical_name(name)).map(String::as_str)
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    fn to_fetch_init(&self) -> BridgeResult<FetchInit> {
        let mut headers = Headers::new();
        for (name, value) in &self.headers {
            headers
                .append(name, value)
                .map_err(|e| BridgeError::RequestFailed(e.message().map(String::from)))?;
        }
        Ok(FetchInit {
            method: self.method.clone(),
            headers: Some(headers),
            body: self.body.clone(),
        })
    }
}

/// A response whose body is consumed lazily from the host.
pub struct Response {
    status: u16,
    headers: BTreeMap<String, String>,
    body: Option<PushReader>,
    closed: bool,
}

impl Response {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&canonical_name(name)).map(String::as_str)
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read the rest of the body. A response without a body yields an empty
    /// buffer.
    pub fn read_all(&mut self) -> BridgeResult<Vec<u8>> {
        let mut out = Vec::new();
        if self.closed {
            return Ok(out);
        }
        let Some(body) = self.body.as_mut() else {
            return Ok(out);
        };
        let mut buf = vec![0u8; DEFAULT_READ_CHUNK_SIZE];
        loop {
            match body.read_chunk(&mut buf)? {
                ReadOutcome::Data(n) => out.extend_from_slice(&buf[..n]),
                ReadOutcome::End => break,
            }
        }
        self.close();
        Ok(out)
    }

    /// Stop reading the body. Further reads see end of data. Idempotent.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(body) = self.body.as_mut() {
            let _ = body.close();
        }
    }

    /// Hand the unread body back to the host as a stream of its own.
    pub fn into_host_stream(mut self, platform: &Platform) -> Option<ReadableStream> {
        if self.closed {
            return None;
        }
        let body = self.body.take()?;
        Some(PullStream::new(platform, body).stream())
    }
}

impl io::Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Ok(0);
        }
        match self.body.as_mut() {
            Some(body) => body.read(buf),
            None => Ok(0),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Blocking HTTP client. Must be used from a worker, never the host thread.
#[derive(Debug, Clone)]
pub struct Client {
    platform: Platform,
}

impl Client {
    pub fn new(platform: &Platform) -> Self {
        Self {
            platform: platform.clone(),
        }
    }

    /// Send `request` and wait for the response head.
    pub fn execute(&self, request: &Request) -> BridgeResult<Response> {
        let init = request.to_fetch_init()?;
        let url = request.url.clone();
        debug!(method = %request.method, %url, "fetch");

        let outcome = await_promise(&self.platform, move |p| p.fetch().fetch(&url, init))?;
        let response = outcome.map_err(request_failed)?;

        let mut headers = BTreeMap::new();
        for (name, value) in response.headers().entries() {
            headers.insert(canonical_name(&name), value);
        }
        let body = match response.body() {
            Some(stream) => Some(PushReader::new(&self.platform, &stream)?),
            None => None,
        };
        Ok(Response {
            status: response.status(),
            headers,
            body,
            closed: false,
        })
    }

    pub fn get(&self, url: &str) -> BridgeResult<Response> {
        self.execute(&Request::new("GET", url))
    }

    pub fn delete(&self, url: &str) -> BridgeResult<Response> {
        self.execute(&Request::new("DELETE", url))
    }

    /// `POST` with a body. Content-Type is sent only when non-empty.
    pub fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> BridgeResult<Response> {
        self.execute(&with_body("POST", url, content_type, body.into()))
    }

    /// `PUT` with a body. Content-Type is sent only when non-empty.
    pub fn put(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> BridgeResult<Response> {
        self.execute(&with_body("PUT", url, content_type, body.into()))
    }
}

fn with_body(method: &str, url: &str, content_type: &str, body: Bytes) -> Request {
    let mut request = Request::new(method, url);
    if !content_type.is_empty() {
        request.set_header("Content-Type", content_type);
    }
    request.set_body(body);
    request
}

fn request_failed(error: HostError) -> BridgeError {
    BridgeError::RequestFailed(error.message().map(String::from))
}
