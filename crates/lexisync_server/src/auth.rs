//! Bearer token authentication.
//!
//! Tokens are HMAC-SHA256 signed and carry their issue time for expiry
//! checks.
//!
//! ## Token Format
//!
//! `<user_id>.<issued_at_ms>.<signature>`, where the signature is the
//! hex-encoded HMAC-SHA256 of `<user_id>|<issued_at_ms>`. User ids may contain
//! dots; the last two segments are always the timestamp and signature.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Issues and validates bearer tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a token for `user_id`, issued now.
    pub fn create_token(&self, user_id: &str) -> ServerResult<String> {
        self.create_token_at(user_id, now_millis())
    }

    /// Creates a token for `user_id` issued at `issued_ms`.
    pub fn create_token_at(&self, user_id: &str, issued_ms: u64) -> ServerResult<String> {
        if user_id.is_empty() {
            return Err(ServerError::InvalidRequest("empty user id".into()));
        }
        let mac = self.mac(user_id, issued_ms)?;
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}.{}", user_id, issued_ms, signature))
    }

    /// Validates a token and returns the user id it was issued to.
    pub fn validate_token(&self, token: &str) -> ServerResult<String> {
        let mut parts = token.rsplitn(3, '.');
        let (Some(signature), Some(issued), Some(user_id)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        };
        if user_id.is_empty() {
            return Err(ServerError::NotAuthorized("malformed token".into()));
        }

        let issued_ms: u64 = issued
            .parse()
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;
        let signature = hex::decode(signature)
            .map_err(|_| ServerError::NotAuthorized("malformed token".into()))?;

        self.mac(user_id, issued_ms)?
            .verify_slice(&signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let expiry_millis = self.config.token_expiry.as_millis() as u64;
        if now_millis() > issued_ms.saturating_add(expiry_millis) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }

        Ok(user_id.to_string())
    }

    fn mac(&self, user_id: &str, issued_ms: u64) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(e.to_string()))?;
        mac.update(user_id.as_bytes());
        mac.update(b"|");
        mac.update(issued_ms.to_string().as_bytes());
        Ok(mac)
    }
}
