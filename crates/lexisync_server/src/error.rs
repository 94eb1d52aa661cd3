//! Error types for the snapshot server.

use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the snapshot server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or invalid credentials.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The caller's expected version is stale.
    #[error("version conflict: expected {expected}, current {current}")]
    VersionConflict {
        /// Version the caller expected.
        expected: u64,
        /// Version actually stored.
        current: u64,
    },

    /// Payload exceeds the configured limit.
    #[error("payload too large: {size} > {limit} bytes")]
    PayloadTooLarge {
        /// Serialized size.
        size: usize,
        /// Configured limit.
        limit: usize,
    },

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::NotAuthorized(_)
                | ServerError::VersionConflict { .. }
                | ServerError::PayloadTooLarge { .. }
        )
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_))
    }

    /// HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::VersionConflict { .. } => 409,
            ServerError::PayloadTooLarge { .. } => 413,
            ServerError::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for ServerError {
    fn from(err: serde_json::Error) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}
