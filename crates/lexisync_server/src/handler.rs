//! Request handlers for the snapshot endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::notify::ChangeHub;
use crate::store::SnapshotRecordStore;
use lexisync_protocol::{ChangeNotice, RemoteRecord, SaveSnapshotRequest, SaveSnapshotResponse};
use std::sync::Arc;
use tracing::{debug, info};

/// Context for request handling.
pub struct HandlerContext {
    /// Server configuration.
    pub config: ServerConfig,
    /// Snapshot records (shared across all handlers).
    pub store: Arc<SnapshotRecordStore>,
    /// Change-notice fan-out.
    pub hub: Arc<ChangeHub>,
    validator: Option<TokenValidator>,
}

impl HandlerContext {
    /// Creates a new handler context.
    pub fn new(config: ServerConfig, store: Arc<SnapshotRecordStore>) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        let hub = Arc::new(ChangeHub::new(config.notify_capacity));
        Self {
            config,
            store,
            hub,
            validator,
        }
    }

    /// The token validator, when a secret is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    /// Resolves the caller's user id from its bearer credential.
    ///
    /// With authentication enabled the bearer must be a valid token. Without
    /// it the bearer is taken as the user id.
    pub fn authenticate(&self, bearer: Option<&str>) -> ServerResult<String> {
        let bearer = bearer
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ServerError::NotAuthorized("missing credentials".into()))?;

        if !self.config.require_auth {
            return Ok(bearer.to_string());
        }
        match &self.validator {
            Some(validator) => validator.validate_token(bearer),
            None => Err(ServerError::NotAuthorized(
                "authentication required but no secret configured".into(),
            )),
        }
    }
}

/// Handler for snapshot requests.
pub struct RequestHandler {
    context: Arc<HandlerContext>,
}

impl RequestHandler {
    /// Creates a new request handler.
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }

    /// Handles `get_snapshot`.
    pub fn handle_get(&self, user_id: &str) -> ServerResult<Option<RemoteRecord>> {
        let record = self.context.store.get(user_id);
        debug!(
            user_id,
            version = record.as_ref().map_or(0, |r| r.version),
            "get_snapshot"
        );
        Ok(record)
    }

    /// Handles `save_snapshot`.
    pub fn handle_save(
        &self,
        user_id: &str,
        request: SaveSnapshotRequest,
    ) -> ServerResult<SaveSnapshotResponse> {
        let size = serde_json::to_vec(&request.payload)
            .map_err(|e| ServerError::Internal(e.to_string()))?
            .len();
        let limit = self.context.config.max_payload_bytes;
        if size > limit {
            return Err(ServerError::PayloadTooLarge { size, limit });
        }

        let record = self
            .context
            .store
            .save(user_id, request.expected_version, request.payload)?;
        info!(user_id, version = record.version, "snapshot accepted");

        self.context
            .hub
            .publish(ChangeNotice::new(user_id, Some(record.version)));

        Ok(SaveSnapshotResponse {
            version: record.version,
            updated_at: record.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::{Domain, DomainBlock, SnapshotPayload};
    use serde_json::json;

    fn payload(books: serde_json::Value) -> SnapshotPayload {
        SnapshotPayload::new().with(
            Domain::Vocabulary,
            DomainBlock::from_value(json!({ "books": books }))
                .unwrap()
                .with_updated_at("2024-01-01T00:00:00Z"),
        )
    }

    fn create_handler(config: ServerConfig) -> (Arc<HandlerContext>, RequestHandler) {
        let context = Arc::new(HandlerContext::new(
            config,
            Arc::new(SnapshotRecordStore::new()),
        ));
        (Arc::clone(&context), RequestHandler::new(context))
    }

    #[test]
    fn get_missing_record() {
        let (_, handler) = create_handler(ServerConfig::default());
        assert!(handler.handle_get("alice").unwrap().is_none());
    }

    #[test]
    fn save_then_get() {
        let (_, handler) = create_handler(ServerConfig::default());

        let response = handler
            .handle_save("alice", SaveSnapshotRequest::new(0, payload(json!(["A"]))))
            .unwrap();
        assert_eq!(response.version, 1);

        let record = handler.handle_get("alice").unwrap().unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.updated_at, response.updated_at);
    }

    #[test]
    fn stale_save_is_conflict() {
        let (_, handler) = create_handler(ServerConfig::default());
        handler
            .handle_save("alice", SaveSnapshotRequest::new(0, payload(json!(["A"]))))
            .unwrap();

        let err = handler
            .handle_save("alice", SaveSnapshotRequest::new(0, payload(json!(["B"]))))
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[test]
    fn oversized_payload_rejected() {
        let (_, handler) = create_handler(ServerConfig::default().with_max_payload_bytes(16));

        let err = handler
            .handle_save("alice", SaveSnapshotRequest::new(0, payload(json!(["A"]))))
            .unwrap_err();
        assert!(matches!(err, ServerError::PayloadTooLarge { limit: 16, .. }));
    }

    #[tokio::test]
    async fn accepted_save_notifies_subscribers() {
        let (context, handler) = create_handler(ServerConfig::default());
        let mut notices = context.hub.subscribe("alice");

        handler
            .handle_save("alice", SaveSnapshotRequest::new(0, payload(json!([]))))
            .unwrap();

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.user_id, "alice");
        assert_eq!(notice.version, Some(1));
    }

    #[test]
    fn authenticate_without_auth_uses_bearer_as_user() {
        let (context, _) = create_handler(ServerConfig::default());
        assert_eq!(context.authenticate(Some("alice")).unwrap(), "alice");
        assert!(context.authenticate(None).is_err());
        assert!(context.authenticate(Some("")).is_err());
    }

    #[test]
    fn authenticate_with_tokens() {
        let (context, _) = create_handler(ServerConfig::default().with_auth(b"secret".to_vec()));
        let token = context.validator().unwrap().create_token("alice").unwrap();

        assert_eq!(context.authenticate(Some(&token)).unwrap(), "alice");
        assert!(matches!(
            context.authenticate(Some("alice")),
            Err(ServerError::NotAuthorized(_))
        ));
    }
}
