//! Integration tests: blocking client → HTTP → trigger → responder → blocking handler.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Once};

use tokio::net::TcpListener;
use tokio::runtime::Runtime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use warpgrid_bridge::{Client, Handler, IncomingRequest, Responder, ResponseWriter};
use warpgrid_hostenv::{HostLoop, HttpFetch, Platform};
use warpgrid_trigger::{HostRoute, HttpTrigger};

// ── Tracing setup ────────────────────────────────────────────────

static TRACING_INIT: Once = Once::new();

fn init_tracing() {
    TRACING_INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init()
            .ok();
    });
}

// ── Harness ──────────────────────────────────────────────────────

struct Front {
    _host: HostLoop,
    platform: Platform,
    runtime: Runtime,
    addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    server: JoinHandle<anyhow::Result<()>>,
}

impl Front {
    fn start(handler: impl Handler) -> Self {
        init_tracing();
        let host = HostLoop::start().unwrap();
        let handle = host.handle();
        let platform = Platform::builder(&handle)
            .fetch(HttpFetch::new(&handle))
            .build();
        let route: HostRoute = Arc::new(Responder::new(&platform, handler).into_route());

        let runtime = Runtime::new().unwrap();
        let listener = runtime.block_on(TcpListener::bind("127.0.0.1:0")).unwrap();
        let addr = listener.local_addr().unwrap();
        let (shutdown, rx) = watch::channel(false);
        let server = runtime.spawn(HttpTrigger::new(addr, &handle, route).serve_listener(listener, rx));

        Self {
            _host: host,
            platform,
            runtime,
            addr,
            shutdown,
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    fn stop(self) {
        self.shutdown.send(true).unwrap();
        self.runtime.block_on(self.server).unwrap().unwrap();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[test]
fn blocking_handler_answers_blocking_client() {
    let front = Front::start(|w: &mut ResponseWriter, r: &IncomingRequest| {
        w.header().set("X-Path", r.uri());
        w.write_header(201);
        let shout = String::from_utf8_lossy(r.body_bytes()).to_uppercase();
        w.write_all(shout.as_bytes()).unwrap();
    });

    let client = Client::new(&front.platform);
    let mut response = client
        .post(&front.url("/echo?loud=1"), "text/plain", "hello")
        .unwrap();
    assert_eq!(response.status(), 201);
    assert_eq!(response.header("X-Path"), Some("/echo?loud=1"));
    assert_eq!(response.read_all().unwrap(), b"HELLO");

    front.stop();
}

#[test]
fn silent_handler_is_a_bad_gateway_over_http() {
    let front = Front::start(|_: &mut ResponseWriter, _: &IncomingRequest| {});

    let mut response = Client::new(&front.platform).get(&front.url("/")).unwrap();
    assert_eq!(response.status(), 502);
    let body = String::from_utf8(response.read_all().unwrap()).unwrap();
    assert!(body.contains("Upstream server error"), "{body:?}");

    front.stop();
}

#[test]
fn streamed_body_crosses_the_wire_intact() {
    let front = Front::start(|w: &mut ResponseWriter, _: &IncomingRequest| {
        for i in 0..200u32 {
            writeln!(w, "line {i}").unwrap();
        }
    });

    let mut response = Client::new(&front.platform).get(&front.url("/lines")).unwrap();
    let body = String::from_utf8(response.read_all().unwrap()).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 200);
    assert_eq!(lines[0], "line 0");
    assert_eq!(lines[199], "line 199");

    front.stop();
}
