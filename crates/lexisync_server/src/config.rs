//! Server configuration.

use std::time::Duration;

/// Default maximum size of a saved payload.
pub const MAX_PAYLOAD_BYTES: usize = 8 * 1024 * 1024;

/// Configuration for the snapshot server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Whether requests must carry a valid token.
    pub require_auth: bool,
    /// Secret key for token signing and validation (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// How long an issued token stays valid.
    pub token_expiry: Duration,
    /// Maximum size of a serialized payload accepted by `save_snapshot`.
    pub max_payload_bytes: usize,
    /// Buffered change notices per user channel.
    pub notify_capacity: usize,
}

impl ServerConfig {
    /// Creates a server configuration without authentication.
    pub fn new() -> Self {
        Self {
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            notify_capacity: 64,
        }
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token expiry.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }

    /// Sets the maximum payload size.
    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Sets the per-user notice buffer.
    pub fn with_notify_capacity(mut self, capacity: usize) -> Self {
        self.notify_capacity = capacity;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
