//! Domain-specific error types for the QuickView relay.
//!
//! All fallible operations return `Result<T, RelayError>`.
//! Endpoint tasks resolve these locally by tearing the connection down;
//! only bootstrap failures travel further than the task that hit them.

use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite;

use crate::frame::InvalidHandshake;

/// The canonical error type for the relay.
#[derive(Debug, Error)]
pub enum RelayError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// A handshake frame could not be interpreted.
    #[error("malformed handshake: {0}")]
    MalformedHandshake(#[from] InvalidHandshake),

    /// A rendezvous identifier does not fit the one-byte length field.
    #[error("rendezvous id too long: {len} bytes (max {max})")]
    IdTooLong { len: usize, max: usize },

    /// A message violated the handshake state machine.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A web client asked for a desktop that is absent or already paired.
    #[error("no unpaired desktop registered as {0:?}")]
    NoMatch(String),

    // ── Connection Errors ────────────────────────────────────────
    /// The websocket layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc or oneshot channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── Registry Errors ──────────────────────────────────────────
    /// The append-only registration log could not be created or written.
    #[error("registration log {path}: {source}")]
    RegistrationLog {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for RelayError {
    fn from(s: String) -> Self {
        RelayError::Other(s)
    }
}

impl From<&str> for RelayError {
    fn from(s: &str) -> Self {
        RelayError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for RelayError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        RelayError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for RelayError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        RelayError::ChannelClosed
    }
}
