use std::io;

use bytes::Bytes;
use tracing::debug;
use warpgrid_hostenv::{HostRequest, Platform};

use crate::error::{BridgeError, BridgeResult};
use crate::header::{parse_header_block, write_header_block, HeaderMap};
use crate::rendezvous::await_promise;

/// An inbound request as seen by a blocking handler.
///
/// The body is fully materialised before the handler runs, so handlers can
/// read it as many times as they like.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    method: String,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

impl IncomingRequest {
    /// Create a request with a buffered body.
    pub fn new(
        method: impl Into<String>,
        uri: impl Into<String>,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            headers,
            body: body.into(),
        }
    }

    /// Convert a host request. Blocks until the host has delivered the body.
    ///
    /// Header entries are re-serialised into a header block and parsed back,
    /// so names come out canonicalised and malformed entries are rejected
    /// before any handler sees them.
    pub fn from_host(platform: &Platform, request: &HostRequest) -> BridgeResult<Self> {
        let headers = canonical_headers(request)?;
        let body = if request.has_body() {
            let host_request = request.clone();
            await_promise(platform, move |_| host_request.array_buffer())?
                .map_err(|e| BridgeError::Read(e.to_string()))?
        } else {
            Bytes::new()
        };
        Ok(Self::converted(request, headers, body))
    }

    /// Convert a host request from host-side async code, awaiting the body
    /// instead of blocking on it.
    pub async fn from_host_async(request: &HostRequest) -> BridgeResult<Self> {
        let headers = canonical_headers(request)?;
        let body = if request.has_body() {
            request
                .array_buffer()
                .settled()
                .await
                .map_err(|e| BridgeError::Read(e.to_string()))?
        } else {
            Bytes::new()
        };
        Ok(Self::converted(request, headers, body))
    }

    fn converted(request: &HostRequest, headers: HeaderMap, body: Bytes) -> Self {
        debug!(
            method = %request.method(),
            url = %request.url(),
            body_len = body.len(),
            "converted inbound request"
        );
        Self {
            method: request.method().to_string(),
            uri: request.url().to_string(),
            headers,
            body,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Direct access to the body buffer.
    pub fn body_bytes(&self) -> &Bytes {
        &self.body
    }

    /// A fresh reader over the body.
    pub fn body_reader(&self) -> io::Cursor<Bytes> {
        io::Cursor::new(self.body.clone())
    }
}

fn canonical_headers(request: &HostRequest) -> BridgeResult<HeaderMap> {
    let entries = request.headers().entries();
    let block = write_header_block(entries.iter().map(|(n, v)| (n.as_str(), v.as_str())));
    parse_header_block(&block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use warpgrid_hostenv::{Headers, HostLoop, ReadableStream};

    #[test]
    fn request_accessors() {
        let mut headers = HeaderMap::new();
        headers.insert("Host", "example.com");

        let req = IncomingRequest::new("GET", "/users?page=1", headers, "hello");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri(), "/users?page=1");
        assert_eq!(req.headers().get("host"), Some("example.com"));
        assert_eq!(req.body_bytes().as_ref(), b"hello");
    }

    #[test]
    fn body_reader_is_repeatable() {
        let req = IncomingRequest::new("POST", "/", HeaderMap::new(), "abc");
        for _ in 0..2 {
            let mut out = String::new();
            req.body_reader().read_to_string(&mut out).unwrap();
            assert_eq!(out, "abc");
        }
    }

    #[test]
    fn converts_host_request_with_body() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let mut headers = Headers::new();
        headers.append("content-type", "text/plain").unwrap();
        headers.append("x-id", "1").unwrap();
        headers.append("x-id", "2").unwrap();
        let body = ReadableStream::from_chunks(
            platform.host(),
            vec![Bytes::from("ab"), Bytes::from("cd")],
        );
        let host_request = HostRequest::new(platform.host(), "PUT", "/doc", headers, Some(body));

        let req = IncomingRequest::from_host(&platform, &host_request).unwrap();
        assert_eq!(req.method(), "PUT");
        assert_eq!(req.headers().get("Content-Type"), Some("text/plain"));
        assert_eq!(req.headers().get("X-Id"), Some("1, 2"));
        assert_eq!(req.body_bytes().as_ref(), b"abcd");
        assert_eq!(platform.funcs().live(), 0);
    }

    #[test]
    fn converts_on_the_host_without_blocking() {
        let host = HostLoop::start().unwrap();
        let handle = host.handle();
        let body = ReadableStream::from_chunks(&handle, vec![Bytes::from("x"), Bytes::from("yz")]);
        let host_request = HostRequest::new(&handle, "POST", "/in", Headers::new(), Some(body));

        let (tx, rx) = std::sync::mpsc::channel();
        handle.spawn(async move {
            let _ = tx.send(IncomingRequest::from_host_async(&host_request).await);
        });
        let req = rx.recv().unwrap().unwrap();
        assert_eq!(req.method(), "POST");
        assert_eq!(req.uri(), "/in");
        assert_eq!(req.body_bytes().as_ref(), b"xyz");
    }

    #[test]
    fn malformed_raw_headers_abort_conversion() {
        let host = HostLoop::start().unwrap();
        let platform = Platform::new(&host.handle());
        let headers = Headers::from_raw(vec![("bad name".to_string(), "x".to_string())]);
        let host_request = HostRequest::new(platform.host(), "GET", "/", headers, None);

        let err = IncomingRequest::from_host(&platform, &host_request).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedHeader(_)));
    }
}
