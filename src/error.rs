//! Error types for ringlink.

use thiserror::Error;

/// Main error type for all ringlink operations.
#[derive(Debug, Error)]
pub enum RinglinkError {
    /// The channel has been disposed; no further operations are accepted.
    #[error("channel already disposed")]
    AlreadyDisposed,

    /// One of the underlying rings is shutting down (the peer tore the
    /// channel down, or our own teardown is in progress).
    #[error("channel closed")]
    ChannelClosed,

    /// Construction-time configuration violation.
    #[error("configuration value {value} out of range [{min}, {max}]")]
    ConfigOutOfRange {
        /// The offending value.
        value: usize,
        /// Inclusive lower bound.
        min: usize,
        /// Inclusive upper bound.
        max: usize,
    },

    /// The slave could not open a named ring within its retry window.
    #[error("ring not found: {0}")]
    RingMissing(String),

    /// Protocol error (malformed header, wrong message type, etc.).
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// Result type alias using RinglinkError.
pub type Result<T> = std::result::Result<T, RinglinkError>;
