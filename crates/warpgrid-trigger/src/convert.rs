//! HTTP type conversions between hyper and the host.
//!
//! Inbound requests are buffered and handed to the host as a
//! [`HostRequest`]. Host response bodies are read on the host loop and
//! forwarded to hyper through a bounded channel, so a slow client applies
//! backpressure to the host stream.

use bytes::Bytes;
use futures_util::stream;
use http::{HeaderMap, StatusCode, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::Frame;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use warpgrid_hostenv::{Headers, HostError, HostHandle, HostRequest, HostResponse, ReadableStream};

/// Body type for responses produced by the trigger.
pub type ResponseBody = UnsyncBoxBody<Bytes, HostError>;

/// Chunks buffered between the host reader and the connection.
const BODY_CHANNEL_DEPTH: usize = 8;

/// Convert a status code from u16.
pub fn status_from_u16(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

/// Extract the path and query from a URI.
pub fn uri_path_and_query(uri: &Uri) -> String {
    uri.path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string())
}

/// Copy hyper headers into a host header list. Values that are not visible
/// ASCII are skipped.
pub fn headers_to_host(headers: &HeaderMap) -> Headers {
    let mut out = Headers::new();
    for (name, value) in headers {
        let Ok(value) = value.to_str() else {
            warn!(header = %name, "skipping non-ASCII header value");
            continue;
        };
        if let Err(err) = out.append(name.as_str(), value) {
            warn!(header = %name, error = %err, "skipping header");
        }
    }
    out
}

/// Build the host view of an inbound request with a buffered body.
pub fn to_host_request(host: &HostHandle, parts: &http::request::Parts, body: Bytes) -> HostRequest {
    let body = (!body.is_empty()).then(|| ReadableStream::from_chunks(host, Some(body)));
    HostRequest::new(
        host,
        parts.method.as_str(),
        uri_path_and_query(&parts.uri),
        headers_to_host(&parts.headers),
        body,
    )
}

/// Build a hyper response from a host response, streaming its body.
pub fn from_host_response(
    host: &HostHandle,
    response: &HostResponse,
) -> anyhow::Result<hyper::Response<ResponseBody>> {
    let mut builder = hyper::Response::builder().status(status_from_u16(response.status()));
    for (name, value) in response.headers().entries() {
        builder = builder.header(name, value);
    }
    let body = match response.body() {
        Some(stream) => stream_body(host, stream),
        None => Empty::new().map_err(|never| match never {}).boxed_unsync(),
    };
    Ok(builder.body(body)?)
}

/// A fixed plain-text response.
pub fn text_body(text: &'static str) -> ResponseBody {
    Full::new(Bytes::from_static(text.as_bytes()))
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn stream_body(host: &HostHandle, stream: ReadableStream) -> ResponseBody {
    let (tx, rx) = mpsc::channel::<Result<Bytes, HostError>>(BODY_CHANNEL_DEPTH);

    host.spawn(async move {
        let reader = match stream.get_reader() {
            Ok(reader) => reader,
            Err(err) => {
                let _ = tx.send(Err(err)).await;
                return;
            }
        };
        loop {
            match reader.read().settled().await {
                Ok(result) if result.done => break,
                Ok(result) => {
                    let Some(chunk) = result.value.filter(|c| !c.is_empty()) else {
                        continue;
                    };
                    if tx.send(Ok(chunk)).await.is_err() {
                        debug!("client went away, cancelling response body");
                        let _ = reader.cancel();
                        break;
                    }
                }
                Err(err) => {
                    let _ = tx.send(Err(err)).await;
                    break;
                }
            }
        }
    });

    let frames = stream::unfold(rx, |mut rx| async move {
        let item = rx.recv().await?;
        Some((item.map(Frame::data), rx))
    });
    StreamBody::new(frames).boxed_unsync()
}
