//! Error types for the sync module.

use thiserror::Error;

use replica_core::{BitfieldError, CodecError, LogId};

/// Errors that can occur while tracking sync state.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A pre-have payload could not be decoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// A bitfield mutation was rejected.
    #[error("bitfield error: {0}")]
    Bitfield(#[from] BitfieldError),

    /// Message validation failed.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// CBOR encoding failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// CBOR decoding failed.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// A log handle was attached to the state of a different log.
    #[error("log mismatch: expected {expected}, got {actual}")]
    LogMismatch { expected: LogId, actual: LogId },

    /// The log handle reported an error.
    #[error("log {log_id} error: {message}")]
    Log { log_id: LogId, message: String },
}

impl SyncError {
    /// Whether the error came from a single malformed message.
    ///
    /// The protocol layer drops such messages and keeps the session alive.
    pub fn is_malformed_message(&self) -> bool {
        matches!(
            self,
            SyncError::Codec(_)
                | SyncError::Bitfield(_)
                | SyncError::InvalidMessage(_)
                | SyncError::Decoding(_)
        )
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
