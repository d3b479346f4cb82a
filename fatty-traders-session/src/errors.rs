//! Error types for the session core.

use std::time::Duration;

use thiserror::Error;

/// Failure reported by a [`Transport`](crate::transport::Transport)
/// implementation.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The gateway refused or did not accept the socket.
    #[error("connection refused by {host}:{port}: {reason}")]
    Refused {
        host: String,
        port: u16,
        reason: String,
    },

    /// A request was issued while the socket was closed.
    #[error("transport is not connected")]
    NotConnected,

    /// The transport rejected a request before it reached the gateway.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// I/O error from the underlying socket.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why `Session::connect` failed.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The socket could not be opened. No retry is attempted.
    #[error("transport connect failed: {0}")]
    Transport(#[from] TransportError),

    /// The socket opened but no next-valid-id acknowledgment arrived in time.
    #[error("handshake not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),

    /// The gateway reported a connection loss before the session came up.
    #[error("connection lost during handshake")]
    LostDuringHandshake,
}

/// Convenience Result type for transport calls.
pub type Result<T> = std::result::Result<T, TransportError>;
