//! WarpGrid bridge — blocking I/O on top of the cooperative host.
//!
//! Code written for blocking workers gets a request/response [`Client`],
//! blocking stream readers and [`SocketStream`]s, all backed by the host's
//! promise and callback primitives. In the other direction a [`Responder`]
//! serves host requests with a blocking [`Handler`], streaming the body back
//! as the handler writes it.
//!
//! Every host function an adapter registers is owned by that adapter and
//! released when it reaches a terminal state. None of the blocking entry
//! points may run on the host thread; they return
//! [`BridgeError::WouldBlockHost`] if they do.
//!
//! ```no_run
//! use warpgrid_bridge::Client;
//! use warpgrid_hostenv::{HostLoop, HttpFetch, Platform};
//!
//! let host = HostLoop::start()?;
//! let handle = host.handle();
//! let platform = Platform::builder(&handle)
//!     .fetch(HttpFetch::new(&handle))
//!     .build();
//!
//! let mut response = Client::new(&platform).get("http://127.0.0.1:8080/")?;
//! println!("{} {:?}", response.status(), response.read_all()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod callbacks;
mod client;
mod config;
mod error;
mod header;
mod pipe;
mod producer;
mod reader;
mod rendezvous;
mod request;
mod responder;
mod socket;

pub use callbacks::{one_shot, CallbackRegistry, ContinuationPair, Release};
pub use client::{Client, Request, Response};
pub use config::{BridgeConfig, HostConfig, DEFAULT_READ_CHUNK_SIZE, DEFAULT_SOCKET_QUEUE_CAPACITY};
pub use error::{BridgeError, BridgeResult};
pub use header::{canonical_name, parse_header_block, write_header_block, Header, HeaderMap};
pub use pipe::{pipe, pipe_with_capacity, PipeReader, PipeWriter, DEFAULT_PIPE_CAPACITY};
pub use producer::PullStream;
pub use reader::{BlockingRead, IoReader, PushReader, ReadOutcome};
pub use rendezvous::{await_promise, call_on_host};
pub use request::IncomingRequest;
pub use responder::{Handler, Responder, ResponseWriter};
pub use socket::{ConnState, SocketConn, SocketStream};
