//! Benchmark error types.

use thiserror::Error;

/// Benchmark error type.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid benchmark parameters
    #[error("Configuration error: {0}")]
    Config(String),

    /// A publishing session failed
    #[error("Sender error: {0}")]
    Sender(#[from] confirm_sender::SenderError),

    /// Queue management failed
    #[error("Transport error: {0}")]
    Transport(#[from] confirm_sender::TransportError),

    /// A worker task panicked or was aborted
    #[error("Worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias using BenchError.
pub type BenchResult<T> = Result<T, BenchError>;
