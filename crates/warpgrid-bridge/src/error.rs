//! Bridge error types.

use std::io;

use thiserror::Error;

/// Errors surfaced by the bridge adapters.
///
/// End of data is not an error: readers report it through
/// [`ReadOutcome::End`](crate::ReadOutcome::End).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The host fetch rejected. Carries the host's message when it gave one.
    #[error("{}", .0.as_deref().unwrap_or("request failed"))]
    RequestFailed(Option<String>),

    /// Reserved for request cancellation; never produced.
    #[error("request aborted")]
    RequestAborted,

    #[error("read error: {0}")]
    Read(String),

    #[error("socket closed")]
    SocketClosed,

    #[error("dial failed: {0}")]
    DialFailed(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("handler fault: {0}")]
    HandlerFault(String),

    #[error("malformed header block: {0}")]
    MalformedHeader(String),

    #[error("host loop is not running")]
    HostGone,

    #[error("blocking call on the host thread")]
    WouldBlockHost,
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl From<BridgeError> for io::Error {
    fn from(err: BridgeError) -> Self {
        let kind = match &err {
            BridgeError::SocketClosed => io::ErrorKind::NotConnected,
            BridgeError::RequestAborted => io::ErrorKind::Interrupted,
            BridgeError::WouldBlockHost => io::ErrorKind::WouldBlock,
            BridgeError::HostGone => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}
