//! HTTP trigger handler.
//!
//! `HttpTrigger` manages a hyper HTTP server that hands each request to a
//! host route and streams the resolved response back to the client.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, error, info};
use warpgrid_hostenv::{HostHandle, HostRequest, HostResponse, Promise};

use crate::convert::{self, ResponseBody};

/// A host route: called on the host thread once per request.
pub type HostRoute = Arc<dyn Fn(HostRequest) -> Promise<HostResponse> + Send + Sync>;

/// HTTP trigger server.
///
/// Binds to a TCP port and forwards incoming HTTP requests to a host route.
/// A route whose promise rejects produces a 500.
pub struct HttpTrigger {
    bind_addr: SocketAddr,
    host: HostHandle,
    route: HostRoute,
}

impl HttpTrigger {
    /// Create a new HTTP trigger bound to the given address.
    pub fn new(bind_addr: SocketAddr, host: &HostHandle, route: HostRoute) -> Self {
        Self {
            bind_addr,
            host: host.clone(),
            route,
        }
    }

    /// Start the HTTP server.
    ///
    /// This runs until the shutdown signal is received. Spawns a
    /// tokio task per connection using HTTP/1.1.
    pub async fn serve(self, shutdown: tokio::sync::watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .context("failed to bind HTTP trigger")?;
        self.serve_listener(listener, shutdown).await
    }

    /// Serve connections from an already bound listener.
    pub async fn serve_listener(
        self,
        listener: TcpListener,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let local_addr = listener.local_addr().unwrap_or(self.bind_addr);
        info!(addr = %local_addr, "HTTP trigger listening");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, peer_addr) = accept_result.context("accept failed")?;
                    let host = self.host.clone();
                    let route = self.route.clone();

                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let svc = service_fn(move |req: Request<Incoming>| {
                            let host = host.clone();
                            let route = route.clone();
                            async move {
                                match handle(&host, route, req).await {
                                    Ok(resp) => Ok::<_, hyper::Error>(resp),
                                    Err(e) => {
                                        error!(%peer_addr, error = %e, "request handler failed");
                                        Ok(internal_error())
                                    }
                                }
                            }
                        });

                        if let Err(e) = http1::Builder::new()
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(%peer_addr, error = %e, "connection error");
                        }
                    });
                }
                _ = shutdown.changed() => {
                    info!("HTTP trigger shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}

async fn handle(
    host: &HostHandle,
    route: HostRoute,
    req: Request<Incoming>,
) -> anyhow::Result<Response<ResponseBody>> {
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .context("failed to read request body")?
        .to_bytes();
    debug!(method = %parts.method, uri = %parts.uri, body_len = body.len(), "inbound request");
    let request = convert::to_host_request(host, &parts, body);

    let (tx, rx) = oneshot::channel();
    host.post(move || {
        route(request).on_settle(move |outcome| {
            let _ = tx.send(outcome);
        });
    })?;
    let response = rx
        .await
        .context("host loop stopped before the route answered")?
        .context("route rejected the request")?;

    convert::from_host_response(host, &response)
}

fn internal_error() -> Response<ResponseBody> {
    let mut resp = Response::new(convert::text_body("Internal Server Error"));
    *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    resp
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use warpgrid_hostenv::{text_response, Headers, HostError, HostLoop};

    fn echo_route(host: &HostHandle) -> HostRoute {
        let host = host.clone();
        Arc::new(move |req: HostRequest| {
            let body = format!("{} {}", req.method(), req.url());
            Promise::resolved(&host, text_response(&host, 200, Headers::new(), &body))
        })
    }

    async fn roundtrip(addr: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut out = String::new();
        stream.read_to_string(&mut out).await.unwrap();
        out
    }

    #[test]
    fn http_trigger_creation() {
        let host = HostLoop::start().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let trigger = HttpTrigger::new(addr, &host.handle(), echo_route(&host.handle()));
        assert_eq!(trigger.bind_addr, addr);
    }

    #[tokio::test]
    async fn http_trigger_serves_and_shuts_down() {
        let host = HostLoop::start().unwrap();
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let trigger = HttpTrigger::new(addr, &host.handle(), echo_route(&host.handle()));

        let (tx, rx) = tokio::sync::watch::channel(false);

        let server = tokio::spawn(async move {
            trigger.serve(rx).await
        });

        // Give it a moment to bind.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Signal shutdown.
        tx.send(true).unwrap();

        let result = server.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn route_answers_the_request() {
        let host = HostLoop::start().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let trigger = HttpTrigger::new(addr, &host.handle(), echo_route(&host.handle()));
        let (tx, rx) = tokio::sync::watch::channel(false);
        let server = tokio::spawn(trigger.serve_listener(listener, rx));

        let reply = roundtrip(
            addr,
            "GET /hello?x=1 HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 200 OK"), "{reply}");
        assert!(reply.contains("GET /hello?x=1"), "{reply}");

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rejected_route_is_a_500() {
        let host = HostLoop::start().unwrap();
        let handle = host.handle();
        let route: HostRoute = Arc::new(move |_req: HostRequest| {
            Promise::rejected(&handle, HostError::new("no backend"))
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let trigger = HttpTrigger::new(addr, &host.handle(), route);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let server = tokio::spawn(trigger.serve_listener(listener, rx));

        let reply = roundtrip(addr, "GET / HTTP/1.1\r\nHost: test\r\nConnection: close\r\n\r\n").await;
        assert!(reply.starts_with("HTTP/1.1 500"), "{reply}");
        assert!(reply.contains("Internal Server Error"), "{reply}");

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
