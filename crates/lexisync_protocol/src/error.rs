//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while decoding or validating protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// JSON could not be parsed into the expected shape.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is structurally invalid.
    #[error("invalid structure: {0}")]
    InvalidStructure(String),
}

impl ProtocolError {
    /// Creates an invalid-structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::invalid_structure("payload must be an object");
        assert_eq!(
            err.to_string(),
            "invalid structure: payload must be an object"
        );
    }

    #[test]
    fn json_error_converts() {
        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, ProtocolError::Json(_)));
    }
}
