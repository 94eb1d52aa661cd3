//! Multi-device test harness.
//!
//! A [`SyncCluster`] owns one [`SnapshotServer`]; each [`TestDevice`] has its
//! own local store, backup ring and coordinator and reaches the server
//! through an [`InProcessRemote`].

use async_trait::async_trait;
use lexisync_engine::{
    BackupConfig, LocalBackupStore, LocalStore, MemoryLocalStore, RemoteStore, SessionProvider,
    StaticSession, SyncAttempt, SyncConfig, SyncCoordinator, SyncError, SyncReport, SyncResult,
    SyncTrigger,
};
use lexisync_protocol::{
    ChangeNotice, Domain, DomainBlock, PushOutcome, RemoteRecord, SaveSnapshotRequest,
    SnapshotPayload,
};
use lexisync_server::{ServerConfig, ServerError, SnapshotServer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Per-call delay, settable after construction.
#[derive(Debug, Default)]
struct Latency(AtomicU64);

impl Latency {
    fn set(&self, latency: Duration) {
        self.0.store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    async fn wait(&self) {
        let millis = self.0.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

/// A [`RemoteStore`] calling a [`SnapshotServer`] directly.
pub struct InProcessRemote {
    server: Arc<SnapshotServer>,
    bearer: String,
    latency: Latency,
}

impl InProcessRemote {
    /// Creates a remote that authenticates with `bearer`.
    pub fn new(server: Arc<SnapshotServer>, bearer: impl Into<String>) -> Self {
        Self {
            server,
            bearer: bearer.into(),
            latency: Latency::default(),
        }
    }

    /// Delays every pull and push by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency.set(latency);
    }
}

fn to_sync_error(err: ServerError) -> SyncError {
    match err {
        ServerError::NotAuthorized(_) => SyncError::NotAuthenticated,
        other => SyncError::ServerError(other.to_string()),
    }
}

#[async_trait]
impl RemoteStore for InProcessRemote {
    async fn pull(&self) -> SyncResult<Option<RemoteRecord>> {
        self.latency.wait().await;
        self.server
            .get_snapshot(Some(&self.bearer))
            .map_err(to_sync_error)
    }

    async fn push(
        &self,
        expected_version: u64,
        payload: &SnapshotPayload,
    ) -> SyncResult<PushOutcome> {
        self.latency.wait().await;
        let request = SaveSnapshotRequest::new(expected_version, payload.clone());
        match self.server.save_snapshot(Some(&self.bearer), request) {
            Ok(response) => Ok(response.into()),
            Err(ServerError::VersionConflict { .. }) => Ok(PushOutcome::Conflict),
            Err(e) => Err(to_sync_error(e)),
        }
    }

    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<ChangeNotice> {
        self.server.hub().subscribe(user_id)
    }
}

/// Coordinator type used by [`TestDevice`].
pub type DeviceCoordinator = SyncCoordinator<InProcessRemote, MemoryLocalStore>;

/// One device: local state, backups and a coordinator.
pub struct TestDevice {
    /// The device's local store.
    pub local: Arc<MemoryLocalStore>,
    /// The device's view of the server.
    pub remote: Arc<InProcessRemote>,
    /// The signed-in user.
    pub session: Arc<StaticSession>,
    /// The device's backup ring.
    pub backups: Arc<LocalBackupStore<MemoryLocalStore>>,
    /// The device's coordinator.
    pub coordinator: Arc<DeviceCoordinator>,
}

impl TestDevice {
    /// Records an edit stamped with the current time.
    pub fn edit(&self, domain: Domain, block: DomainBlock) -> String {
        self.local.record_mutation(domain, block)
    }

    /// Records an edit with an explicit marker.
    pub fn edit_at(&self, domain: Domain, block: DomainBlock, marker: &str) {
        self.local.seed(domain, block, Some(marker));
    }

    /// Runs one manual sync.
    pub async fn sync(&self) -> SyncResult<SyncAttempt> {
        self.coordinator.sync_now(SyncTrigger::Manual).await
    }

    /// Runs one manual sync that must complete.
    ///
    /// # Panics
    ///
    /// Panics if the sync fails or is declined.
    pub async fn sync_ok(&self) -> SyncReport {
        match self.sync().await {
            Ok(SyncAttempt::Completed(report)) => report,
            Ok(SyncAttempt::AlreadyRunning) => panic!("sync declined: already running"),
            Err(e) => panic!("sync failed: {e}"),
        }
    }

    /// Reads a domain block.
    pub fn block(&self, domain: Domain) -> Option<DomainBlock> {
        self.local.get(domain).expect("memory store read")
    }

    /// Reads a domain marker.
    pub fn marker(&self, domain: Domain) -> Option<String> {
        self.local.marker(domain).expect("memory store read")
    }
}

/// A snapshot server shared by any number of devices.
pub struct SyncCluster {
    /// The server.
    pub server: Arc<SnapshotServer>,
    config: SyncConfig,
}

impl SyncCluster {
    /// Creates a cluster whose server issues HMAC tokens.
    pub fn new() -> Self {
        Self::with_config(SyncConfig::default())
    }

    /// Creates a cluster whose devices use `config`.
    pub fn with_config(config: SyncConfig) -> Self {
        let server = SnapshotServer::new(
            ServerConfig::default().with_auth(b"lexisync-testkit-secret".to_vec()),
        );
        Self {
            server: Arc::new(server),
            config,
        }
    }

    /// Adds a device signed in as `user_id`.
    pub fn device(&self, user_id: &str) -> TestDevice {
        let token = self
            .server
            .issue_token(user_id)
            .expect("Failed to issue token");
        let remote = Arc::new(InProcessRemote::new(Arc::clone(&self.server), token));
        let local = Arc::new(MemoryLocalStore::new());
        let session = Arc::new(StaticSession::signed_in(user_id));
        let backups = Arc::new(LocalBackupStore::in_memory(
            BackupConfig::default(),
            Arc::clone(&local),
        ));
        let coordinator = SyncCoordinator::new(
            self.config.clone(),
            Arc::clone(&remote),
            Arc::clone(&local),
            Arc::clone(&session) as Arc<dyn SessionProvider>,
        )
        .with_backups(Arc::clone(&backups));

        TestDevice {
            local,
            remote,
            session,
            backups,
            coordinator: Arc::new(coordinator),
        }
    }

    /// The server's current version for `user_id`.
    pub fn version(&self, user_id: &str) -> u64 {
        self.server.store().version(user_id)
    }

    /// The server's current payload for `user_id`.
    pub fn payload(&self, user_id: &str) -> Option<SnapshotPayload> {
        self.server.store().get(user_id).map(|r| r.payload)
    }
}

impl Default for SyncCluster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{ts, vocabulary_block};

    #[tokio::test]
    async fn device_round_trip() {
        let cluster = SyncCluster::new();
        let a = cluster.device("alice");
        a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));

        let report = a.sync_ok().await;
        assert_eq!(report.remote_version, 1);
        assert_eq!(cluster.version("alice"), 1);
        assert_eq!(a.backups.list_backups().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn stale_push_maps_to_conflict() {
        let cluster = SyncCluster::new();
        let a = cluster.device("alice");
        let payload = SnapshotPayload::new().with(
            Domain::Vocabulary,
            vocabulary_block(&["A"]).with_updated_at(ts(1)),
        );

        assert!(!a.remote.push(0, &payload).await.unwrap().is_conflict());
        assert!(a.remote.push(0, &payload).await.unwrap().is_conflict());
    }

    #[tokio::test]
    async fn foreign_token_is_rejected() {
        let cluster = SyncCluster::new();
        let remote = InProcessRemote::new(Arc::clone(&cluster.server), "alice");
        assert!(matches!(
            remote.pull().await,
            Err(SyncError::NotAuthenticated)
        ));
    }
}
