//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Remote unreachable or a transport-level failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The version check still failed after the single conflict retry.
    #[error("version conflict persisted after retry (last expected version {expected_version})")]
    Conflict {
        /// Version the final push expected.
        expected_version: u64,
    },

    /// No active session.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Local read or write failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Server rejected the request for a reason other than a conflict.
    #[error("server error: {0}")]
    ServerError(String),

    /// Malformed data from the remote or local storage.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Requested backup does not exist.
    #[error("backup {0} not found")]
    BackupNotFound(u64),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Returns true if a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Conflict { .. } => true,
            SyncError::ServerError(_) => true,
            _ => false,
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::storage(err)
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<lexisync_protocol::ProtocolError> for SyncError {
    fn from(err: lexisync_protocol::ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}
