//! Common error types for postsync.

use thiserror::Error;

/// Top-level error type for postsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote unreachable or answered with a non-success status.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Remote payload could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Local store operation failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Durable slot holding the pending queue could not be read or written.
    #[error("Queue persistence error: {0}")]
    QueuePersistence(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration is missing or malformed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation was superseded or its task was shut down.
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error is a cancellation rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// Whether this error came from the remote side (transport or payload).
    pub fn is_remote(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Decode(_))
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
