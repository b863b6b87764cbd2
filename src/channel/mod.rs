// src/channel/mod.rs

//! Correlated request/response over an arbitrary transport.
//!
//! - [`transport`]: [`Channel`] wrapper with active/available flags, plus a
//!   JSON-lines transport over any `AsyncRead`/`AsyncWrite` pair.
//! - [`request`]: [`RequestHandler`] correlating responses to pending
//!   requests by id, each with its own timeout.
//! - [`envelope`]: the IPC frame format.
//! - [`broker`]: request/response on top of a topic-based broker client.

pub mod broker;
pub mod envelope;
pub mod request;
pub mod transport;

use thiserror::Error;

pub use broker::{BrokerClient, BrokerRequests};
pub use envelope::{Envelope, ErrorBody};
pub use request::{DEFAULT_REQUEST_TIMEOUT, RequestHandler, RequestId, new_request_id};
pub use transport::{Channel, LineTransport, spawn_line_transport};

/// Failures of a correlated request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("request {id} timed out after {timeout_ms} ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("request handler disposed")]
    Disposed,

    #[error("remote error: {0}")]
    Remote(String),

    #[error("channel closed")]
    Closed,

    #[error("send failed: {0}")]
    Send(String),
}
