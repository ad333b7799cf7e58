//! Integration tests for the host model.
//!
//! These tests exercise the pieces together the way a guest runtime would:
//! host functions reacting to promises, streams pulled through host
//! callbacks, and loopback sockets echoing frames.

use std::sync::mpsc;
use std::sync::{Arc, Mutex, Once};

use bytes::Bytes;
use warpgrid_hostenv::{
    Controller, EventKind, Fetch, FetchInit, Func, Headers, HostLoop, HostResponse, Loopback,
    PeerSocket, Platform, Promise, ReadableStream, ResponseInit, SocketEvent, UnderlyingSource,
};

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

// ── Streams ───────────────────────────────────────────────────────

#[test]
fn pulled_stream_feeds_a_fetch_response() {
    init_tracing();
    let host = HostLoop::start().unwrap();
    let handle = host.handle();
    let net = Loopback::new(&handle);
    let platform = Platform::builder(&handle).fetch(net.clone()).build();

    let remaining = Arc::new(Mutex::new(vec![
        Bytes::from("three"),
        Bytes::from("two"),
        Bytes::from("one"),
    ]));
    let pull_host = handle.clone();
    let pull = Func::new(platform.funcs(), "pull", move |controller: Controller| {
        match remaining.lock().unwrap().pop() {
            Some(chunk) => controller.enqueue(chunk),
            None => controller.close(),
        }
        Promise::resolved(&pull_host, ())
    });

    let route_host = handle.clone();
    let route_pull = pull.clone();
    net.route("http://svc/count", move |_request| {
        let body = ReadableStream::new(
            &route_host,
            UnderlyingSource {
                pull: Some(route_pull.clone()),
                ..Default::default()
            },
        );
        Promise::resolved(
            &route_host,
            HostResponse::new(&route_host, Some(body), ResponseInit::default()),
        )
    });

    let response = handle
        .runtime()
        .block_on(platform.fetch().fetch("http://svc/count", FetchInit::default()).settled())
        .unwrap();
    let body = handle
        .runtime()
        .block_on(response.array_buffer().settled())
        .unwrap();
    assert_eq!(body, Bytes::from("onetwothree"));

    pull.release();
    assert_eq!(platform.funcs().live(), 0);
}

#[test]
fn request_headers_reach_the_route() {
    init_tracing();
    let host = HostLoop::start().unwrap();
    let handle = host.handle();
    let net = Loopback::new(&handle);
    let (tx, rx) = mpsc::channel();

    let route_host = handle.clone();
    net.route("http://svc/headers", move |request| {
        tx.send(request.headers().entries()).unwrap();
        Promise::resolved(
            &route_host,
            HostResponse::new(&route_host, None, ResponseInit::default()),
        )
    });

    let mut headers = Headers::new();
    headers.append("X-Trace", "abc").unwrap();
    headers.append("Accept", "*/*").unwrap();
    let init = FetchInit {
        method: "GET".into(),
        headers: Some(headers),
        body: None,
    };
    let _ = handle
        .runtime()
        .block_on(net.fetch("http://svc/headers", init).settled())
        .unwrap();

    assert_eq!(
        rx.recv().unwrap(),
        vec![
            ("accept".to_string(), "*/*".to_string()),
            ("x-trace".to_string(), "abc".to_string()),
        ]
    );
}

// ── Sockets ───────────────────────────────────────────────────────

#[test]
fn loopback_socket_echoes_frames_until_peer_closes() {
    init_tracing();
    let host = HostLoop::start().unwrap();
    let handle = host.handle();
    let net = Loopback::new(&handle);
    let platform = Platform::builder(&handle).sockets(net.clone()).build();

    let peer_host = handle.clone();
    net.listen("ws://svc/echo", move |mut peer: PeerSocket| {
        peer_host.spawn(async move {
            if let Some(frame) = peer.recv().await {
                peer.send_binary(frame);
            }
            peer.close(1000, "done");
        });
    });

    let (tx, rx) = mpsc::channel();
    let events = Func::new(platform.funcs(), "events", move |event: SocketEvent| {
        tx.send(event).unwrap();
    });

    let (socket_tx, socket_rx) = mpsc::channel();
    let connect_platform = platform.clone();
    let listener = events.clone();
    handle
        .post(move || {
            let socket = connect_platform.sockets().connect("ws://svc/echo").unwrap();
            for kind in [EventKind::Open, EventKind::Message, EventKind::Close] {
                socket.add_event_listener(kind, &listener);
            }
            socket_tx.send(socket).unwrap();
        })
        .unwrap();
    let socket = socket_rx.recv().unwrap();

    assert_eq!(rx.recv().unwrap(), SocketEvent::Open);
    socket.send(Bytes::from("marco")).unwrap();
    match rx.recv().unwrap() {
        SocketEvent::Message(data) => assert_eq!(data.into_bytes(), Bytes::from("marco")),
        other => panic!("expected message, got {other:?}"),
    }
    match rx.recv().unwrap() {
        SocketEvent::Close { code, reason } => {
            assert_eq!(code, 1000);
            assert_eq!(reason, "done");
        }
        other => panic!("expected close, got {other:?}"),
    }

    events.release();
    assert_eq!(platform.funcs().live(), 0);
}
