//! Error types for the sync engine.

use replica_sync::SyncError;
use thiserror::Error;

/// Errors that can occur during engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Sync state rejected the operation.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The engine task has stopped.
    #[error("sync engine is shut down")]
    Shutdown,
}

impl EngineError {
    /// Whether the error came from a single malformed message.
    pub fn is_malformed_message(&self) -> bool {
        matches!(self, EngineError::Sync(e) if e.is_malformed_message())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
