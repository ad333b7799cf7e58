//! warpgrid-trigger — HTTP trigger for the WarpGrid host.
//!
//! Bridges inbound HTTP requests to a host route. Each request is converted
//! into a [`HostRequest`](warpgrid_hostenv::HostRequest), passed to the
//! route on the host thread, and the promised response is streamed back.
//!
//! # Architecture
//!
//! ```text
//! HTTP client
//!   │
//!   ▼
//! hyper server
//!   │
//!   ├── Convert hyper::Request → HostRequest (body buffered)
//!   ├── Call the route on the host loop, await its promise
//!   ├── Convert HostResponse → hyper::Response (body streamed)
//!   │
//!   ▼
//! HTTP response
//! ```

pub mod handler;
pub mod convert;

pub use handler::{HostRoute, HttpTrigger};
