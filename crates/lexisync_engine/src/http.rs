//! HTTP remote store.
//!
//! The actual HTTP client is abstracted via a trait so that any HTTP library,
//! or an in-process server, can carry the JSON protocol:
//!
//! - `GET /snapshot` returns the record, or `null` when none exists
//! - `PUT /snapshot` saves under compare-and-swap; `409` signals a conflict

use crate::error::{SyncError, SyncResult};
use crate::transport::{RemoteStore, NOTICE_CAPACITY};
use async_trait::async_trait;
use lexisync_protocol::{
    ChangeNotice, PushOutcome, RemoteRecord, SaveSnapshotRequest, SaveSnapshotResponse,
    SnapshotPayload,
};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::warn;

/// Path of the snapshot resource.
pub const SNAPSHOT_PATH: &str = "/snapshot";

/// HTTP methods used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    /// Read the record.
    Get,
    /// Save the record.
    Put,
}

impl HttpMethod {
    /// Method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Put => "PUT",
        }
    }
}

/// An outgoing request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Option<Vec<u8>>,
    /// Bearer token for the `Authorization` header.
    pub bearer: Option<String>,
}

/// A response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client abstraction.
///
/// Returns `Err` only when no response was received at all.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Sends a request.
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String>;
}

/// A [`RemoteStore`] speaking the JSON snapshot protocol over HTTP.
pub struct HttpRemoteStore<C: HttpClient> {
    base_url: String,
    client: C,
    bearer: RwLock<Option<String>>,
    last_error: RwLock<Option<String>>,
    notices: broadcast::Sender<ChangeNotice>,
}

impl<C: HttpClient> HttpRemoteStore<C> {
    /// Creates a store talking to `base_url`.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
            bearer: RwLock::new(None),
            last_error: RwLock::new(None),
            notices,
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Sets the bearer token sent with every request.
    pub fn set_bearer_token(&self, token: Option<String>) {
        *self.bearer.write() = token;
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn send(&self, method: HttpMethod, body: Option<Vec<u8>>) -> SyncResult<HttpResponse> {
        let request = HttpRequest {
            method,
            url: format!("{}{}", self.base_url, SNAPSHOT_PATH),
            body,
            bearer: self.bearer.read().clone(),
        };

        match self.client.send(request).await {
            Ok(response) => {
                *self.last_error.write() = None;
                Ok(response)
            }
            Err(e) => {
                warn!(method = method.as_str(), error = %e, "snapshot request failed");
                *self.last_error.write() = Some(e.clone());
                Err(SyncError::transport_retryable(e))
            }
        }
    }
}

fn unexpected(response: &HttpResponse) -> SyncError {
    match response.status {
        401 | 403 => SyncError::NotAuthenticated,
        status => SyncError::ServerError(format!("HTTP {}: {}", status, response.body_text())),
    }
}

#[async_trait]
impl<C: HttpClient> RemoteStore for HttpRemoteStore<C> {
    async fn pull(&self) -> SyncResult<Option<RemoteRecord>> {
        let response = self.send(HttpMethod::Get, None).await?;
        match response.status {
            200 => Ok(serde_json::from_slice(&response.body)?),
            404 => Ok(None),
            _ => Err(unexpected(&response)),
        }
    }

    async fn push(
        &self,
        expected_version: u64,
        payload: &SnapshotPayload,
    ) -> SyncResult<PushOutcome> {
        let request = SaveSnapshotRequest::new(expected_version, payload.clone());
        let body = serde_json::to_vec(&request)?;
        let response = self.send(HttpMethod::Put, Some(body)).await?;
        match response.status {
            200 | 201 => {
                let saved: SaveSnapshotResponse = serde_json::from_slice(&response.body)?;
                Ok(saved.into())
            }
            409 => Ok(PushOutcome::Conflict),
            _ => Err(unexpected(&response)),
        }
    }

    // Plain HTTP has no push channel; receivers only observe the store
    // being dropped.
    fn subscribe(&self, _user_id: &str) -> broadcast::Receiver<ChangeNotice> {
        self.notices.subscribe()
    }
}

/// Servers that can answer loopback requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request for `path`.
    fn handle(&self, method: HttpMethod, path: &str, bearer: Option<&str>, body: &[u8])
        -> HttpResponse;
}

/// An HTTP client that routes requests directly to a server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

#[async_trait]
impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, String> {
        let path = request
            .url
            .find(SNAPSHOT_PATH)
            .map(|i| &request.url[i..])
            .unwrap_or(request.url.as_str());
        let body = request.body.as_deref().unwrap_or_default();

        Ok(self
            .server
            .handle(request.method, path, request.bearer.as_deref(), body))
    }
}
