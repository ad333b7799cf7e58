//! Fetch over plain HTTP/1.1.
//!
//! Each fetch opens one TCP connection, performs the hyper client handshake
//! and streams the response body into a host [`ReadableStream`] as frames
//! arrive. Only `http://` URLs are supported.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::error::HostError;
use crate::event_loop::HostHandle;
use crate::fetch::{Fetch, FetchInit, HostResponse, ResponseInit};
use crate::headers::Headers;
use crate::promise::Promise;
use crate::stream::ReadableStream;

/// The host's network fetch.
#[derive(Debug, Clone)]
pub struct HttpFetch {
    host: HostHandle,
    user_agent: String,
}

impl HttpFetch {
    pub fn new(host: &HostHandle) -> Self {
        Self {
            host: host.clone(),
            user_agent: format!("warpgrid-hostenv/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Fetch for HttpFetch {
    fn fetch(&self, url: &str, init: FetchInit) -> Promise<HostResponse> {
        let (promise, resolver) = Promise::new(&self.host);
        let host = self.host.clone();
        let url = url.to_string();
        let user_agent = self.user_agent.clone();

        self.host.spawn(async move {
            match send(&host, &url, init, &user_agent).await {
                Ok(response) => resolver.resolve(response),
                Err(err) => {
                    debug!(error = %err, %url, "fetch failed");
                    resolver.reject(err);
                }
            }
        });
        promise
    }
}

async fn send(
    host: &HostHandle,
    url: &str,
    init: FetchInit,
    user_agent: &str,
) -> Result<HostResponse, HostError> {
    let uri: http::Uri = url
        .parse()
        .map_err(|e| HostError::type_error(format!("invalid URL {url:?}: {e}")))?;
    if uri.scheme_str() != Some("http") {
        return Err(HostError::type_error(format!(
            "unsupported URL scheme: {url}"
        )));
    }
    let authority = uri
        .authority()
        .ok_or_else(|| HostError::type_error(format!("URL has no host: {url}")))?
        .clone();
    let address = format!("{}:{}", authority.host(), authority.port_u16().unwrap_or(80));

    let stream = tokio::net::TcpStream::connect(&address)
        .await
        .map_err(|e| HostError::type_error(format!("Failed to fetch: {e}")))?;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| HostError::type_error(format!("Failed to fetch: {e}")))?;

    // Drive the connection in the background.
    host.spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "fetch connection ended with error");
        }
    });

    let method = if init.method.is_empty() {
        "GET"
    } else {
        init.method.as_str()
    };
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut builder = http::Request::builder()
        .method(method)
        .uri(path)
        .header(http::header::HOST, authority.as_str())
        .header(http::header::USER_AGENT, user_agent);
    if let Some(headers) = &init.headers {
        for (name, value) in headers.entries() {
            builder = builder.header(name, value);
        }
    }
    let request = builder
        .body(Full::new(init.body.unwrap_or_default()))
        .map_err(|e| HostError::type_error(e.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|e| HostError::type_error(format!("Failed to fetch: {e}")))?;

    let (parts, mut body) = response.into_parts();
    let mut headers = Headers::new();
    for (name, value) in &parts.headers {
        match value.to_str() {
            Ok(value) => {
                let _ = headers.append(name.as_str(), value);
            }
            Err(_) => debug!(header = %name, "skipping non-text response header"),
        }
    }

    let (stream, controller) = ReadableStream::with_controller(host);
    host.spawn(async move {
        loop {
            match body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        if !data.is_empty() {
                            controller.enqueue(data);
                        }
                    }
                }
                Some(Err(e)) => {
                    controller.error(HostError::type_error(e.to_string()));
                    return;
                }
                None => {
                    controller.close();
                    return;
                }
            }
        }
    });

    Ok(HostResponse::new(
        host,
        Some(stream),
        ResponseInit {
            status: parts.status.as_u16(),
            status_text: parts
                .status
                .canonical_reason()
                .unwrap_or_default()
                .to_string(),
            headers,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::HostLoop;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[test]
    fn fetches_from_plain_http_server() {
        let host = HostLoop::start().unwrap();
        let handle = host.handle();

        let server = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = server.local_addr().unwrap();
        std::thread::spawn(move || {
            use std::io::{Read, Write};
            let (mut conn, _) = server.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf).unwrap();
            conn.write_all(
                b"HTTP/1.1 200 OK\r\ncontent-type: text/plain\r\ncontent-length: 5\r\n\r\nhello",
            )
            .unwrap();
        });

        let fetch = HttpFetch::new(&handle);
        let promise = fetch.fetch(&format!("http://{addr}/greet"), FetchInit::default());
        let response = handle.runtime().block_on(promise.settled()).unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.status_text(), "OK");
        assert_eq!(
            response.headers().get("Content-Type").as_deref(),
            Some("text/plain")
        );

        let body = handle
            .runtime()
            .block_on(response.array_buffer().settled())
            .unwrap();
        assert_eq!(body, Bytes::from("hello"));
    }

    #[test]
    fn rejects_non_http_scheme() {
        let host = HostLoop::start().unwrap();
        let handle = host.handle();
        let fetch = HttpFetch::new(&handle);

        let result = handle
            .runtime()
            .block_on(fetch.fetch("https://example.com/", FetchInit::default()).settled());
        assert_eq!(result.unwrap_err().name(), "TypeError");
    }

    #[tokio::test]
    async fn request_carries_method_and_body() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(async move {
            let (mut conn, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !String::from_utf8_lossy(&seen).ends_with("payload") {
                let n = conn.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            let _ = seen_tx.send(String::from_utf8_lossy(&seen).to_string());
            conn.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        });

        let host = HostLoop::start().unwrap();
        let handle = host.handle();
        let fetch = HttpFetch::new(&handle);
        let init = FetchInit {
            method: "POST".into(),
            headers: None,
            body: Some(Bytes::from("payload")),
        };
        let response = fetch
            .fetch(&format!("http://{addr}/submit"), init)
            .settled()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);

        let seen = seen_rx.await.unwrap();
        assert!(seen.starts_with("POST /submit HTTP/1.1"));
        assert!(seen.ends_with("payload"));
    }
}
