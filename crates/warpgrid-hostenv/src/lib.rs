//! WarpGrid cooperative host environment.
//!
//! Models a single-threaded, callback-driven host: one loop thread that runs
//! jobs in order, host functions that stay alive until released, settle-once
//! promises, readable byte streams, fetch and WebSocket capabilities.
//!
//! # Threading
//!
//! Host objects are `Send + Sync` so workers can hold them, but every
//! callback into host-registered functions happens on the loop thread.
//! Code that needs to block must run on [`HostHandle::spawn_blocking`]
//! or on a thread of its own.
//!
//! # Capabilities
//!
//! A [`Platform`] bundles the loop handle, the [`FuncTable`] and the two
//! network capabilities. [`Loopback`] provides both capabilities in memory;
//! [`HttpFetch`] provides fetch over plain HTTP/1.1.

mod error;
mod event_loop;
mod fetch;
mod func;
mod headers;
mod http_fetch;
mod loopback;
mod platform;
mod promise;
mod socket;
mod stream;

pub use error::HostError;
pub use event_loop::{HostHandle, HostLoop, HostLoopBuilder, Job};
pub use fetch::{Fetch, FetchInit, HostRequest, HostResponse, NoFetch, ResponseInit};
pub use func::{Func, FuncTable};
pub use headers::Headers;
pub use http_fetch::HttpFetch;
pub use loopback::{Loopback, PeerSocket, text_response};
pub use platform::{Platform, PlatformBuilder};
pub use promise::{Promise, Resolver};
pub use socket::{
    CLOSE_ABNORMAL, CLOSE_NORMAL, EventKind, MessageData, NoSockets, ReadyState, SocketConnector,
    SocketEvent, SocketTransport, WebSocket,
};
pub use stream::{
    Controller, DEFAULT_HIGH_WATER_MARK, ReadResult, ReadableStream, StreamReader,
    UnderlyingSource,
};
