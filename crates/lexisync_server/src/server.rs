//! Main snapshot server.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::{HandlerContext, RequestHandler};
use crate::notify::ChangeHub;
use crate::store::SnapshotRecordStore;
use lexisync_protocol::{
    ChangeNotice, ConflictBody, RemoteRecord, SaveSnapshotRequest, SaveSnapshotResponse,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Path of the snapshot resource.
pub const SNAPSHOT_PATH: &str = "/snapshot";

/// A status code and JSON body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// JSON body.
    pub body: Vec<u8>,
}

impl HttpReply {
    fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self { status, body },
            Err(e) => {
                warn!(error = %e, "failed to encode reply");
                Self {
                    status: 500,
                    body: br#"{"error":"encoding failed"}"#.to_vec(),
                }
            }
        }
    }

    fn error(err: &ServerError) -> Self {
        match err {
            ServerError::VersionConflict { current, .. } => {
                Self::json(409, &ConflictBody::new(*current))
            }
            other => Self::json(other.status_code(), &json!({ "error": other.to_string() })),
        }
    }
}

/// The snapshot server.
///
/// Holds one record per user and serves `get_snapshot` and `save_snapshot`
/// with compare-and-swap semantics, plus change notices per user.
///
/// # Example
///
/// ```
/// use lexisync_server::{ServerConfig, SnapshotServer};
///
/// let server = SnapshotServer::new(ServerConfig::default());
/// assert!(server.get_snapshot(Some("alice")).unwrap().is_none());
/// ```
pub struct SnapshotServer {
    handler: RequestHandler,
    context: Arc<HandlerContext>,
}

impl SnapshotServer {
    /// Creates a new server with an empty record store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(SnapshotRecordStore::new()))
    }

    /// Creates a server over an existing record store.
    pub fn with_store(config: ServerConfig, store: Arc<SnapshotRecordStore>) -> Self {
        let context = Arc::new(HandlerContext::new(config, store));
        let handler = RequestHandler::new(Arc::clone(&context));

        Self { handler, context }
    }

    /// The record store.
    pub fn store(&self) -> &Arc<SnapshotRecordStore> {
        &self.context.store
    }

    /// The change-notice hub.
    pub fn hub(&self) -> &Arc<ChangeHub> {
        &self.context.hub
    }

    /// Issues a token for `user_id`. Requires a configured secret.
    pub fn issue_token(&self, user_id: &str) -> ServerResult<String> {
        self.context
            .validator()
            .ok_or_else(|| ServerError::Internal("no auth secret configured".into()))?
            .create_token(user_id)
    }

    /// Handles `get_snapshot` for the caller identified by `bearer`.
    pub fn get_snapshot(&self, bearer: Option<&str>) -> ServerResult<Option<RemoteRecord>> {
        let user_id = self.context.authenticate(bearer)?;
        self.handler.handle_get(&user_id)
    }

    /// Handles `save_snapshot` for the caller identified by `bearer`.
    pub fn save_snapshot(
        &self,
        bearer: Option<&str>,
        request: SaveSnapshotRequest,
    ) -> ServerResult<SaveSnapshotResponse> {
        let user_id = self.context.authenticate(bearer)?;
        self.handler.handle_save(&user_id, request)
    }

    /// Subscribes the caller identified by `bearer` to its change notices.
    pub fn subscribe(&self, bearer: Option<&str>) -> ServerResult<broadcast::Receiver<ChangeNotice>> {
        let user_id = self.context.authenticate(bearer)?;
        Ok(self.context.hub.subscribe(&user_id))
    }

    /// Routes an HTTP request for the snapshot resource.
    ///
    /// `GET /snapshot` answers with the record or `null`; `PUT /snapshot`
    /// takes a [`SaveSnapshotRequest`] and answers `409` with a
    /// [`ConflictBody`] on a stale version.
    pub fn handle_http(
        &self,
        method: &str,
        path: &str,
        bearer: Option<&str>,
        body: &[u8],
    ) -> HttpReply {
        if path.trim_end_matches('/') != SNAPSHOT_PATH {
            return HttpReply::json(404, &json!({ "error": "not found" }));
        }

        let result = match method {
            "GET" => self
                .get_snapshot(bearer)
                .map(|record| HttpReply::json(200, &record)),
            "PUT" | "POST" => {
                if body.len() > self.context.config.max_payload_bytes {
                    Err(ServerError::PayloadTooLarge {
                        size: body.len(),
                        limit: self.context.config.max_payload_bytes,
                    })
                } else {
                    serde_json::from_slice::<SaveSnapshotRequest>(body)
                        .map_err(ServerError::from)
                        .and_then(|request| self.save_snapshot(bearer, request))
                        .map(|response| HttpReply::json(200, &response))
                }
            }
            _ => return HttpReply::json(405, &json!({ "error": "method not allowed" })),
        };

        result.unwrap_or_else(|err| {
            if err.is_server_error() {
                warn!(error = %err, "request failed");
            }
            HttpReply::error(&err)
        })
    }
}
