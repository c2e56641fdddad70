//! Error types for confirm-sender.

use thiserror::Error;

/// Errors raised by a transport implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is closed or was severed
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// The destination does not exist on the broker
    #[error("unknown destination: {0}")]
    UnknownDestination(String),

    /// The broker refused the operation
    #[error("operation refused: {0}")]
    Refused(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Sender error type.
#[derive(Error, Debug)]
pub enum SenderError {
    /// Transport error outside of a publishing session
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The connection was lost mid-session
    #[error("Connection lost: {reason} ({failed} pending items failed)")]
    ConnectionLost { reason: String, failed: usize },

    /// The session was cancelled or timed out before the source was drained
    #[error("Session cancelled ({failed} pending items failed)")]
    Cancelled { failed: usize },

    /// Item rejected by validation before emission
    #[error("Malformed item: {0}")]
    MalformedItem(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Sender was used after close
    #[error("Sender is closed")]
    Closed,
}

/// Result type for sender operations.
pub type SenderResult<T> = Result<T, SenderError>;
