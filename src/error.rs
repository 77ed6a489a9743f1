//! Error types for relay-link.

use thiserror::Error;

/// Main error type for all link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// I/O error during socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (settings file only).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame length prefix outside the accepted range.
    #[error("invalid frame length {0}")]
    FrameLength(u32),

    /// Frame structure is inconsistent with its length prefix.
    #[error("corrupt frame: {0}")]
    CorruptFrame(String),

    /// Payload ended before a field could be read completely.
    #[error("payload truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Bytes the field required.
        needed: usize,
        /// Bytes left in the payload.
        remaining: usize,
    },

    /// String or list too large for its 16-bit length prefix.
    #[error("oversized field: {0} exceeds 65535")]
    OversizedField(usize),

    /// Command name not understood by this role.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// Session protocol violation (missing login, bad secret, wrong version).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection is not active.
    #[error("connection closed")]
    ConnectionClosed,

    /// Pending write buffer is at capacity.
    #[error("pending write buffer full")]
    Backpressure,

    /// Operation not valid in the connection's current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Settings are missing or malformed.
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias using LinkError.
pub type Result<T> = std::result::Result<T, LinkError>;
