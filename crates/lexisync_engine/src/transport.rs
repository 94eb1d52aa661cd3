//! Remote store abstraction.

use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use lexisync_protocol::{now_iso, ChangeNotice, PushOutcome, RemoteRecord, SnapshotPayload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;

/// Capacity of change-notice channels.
pub const NOTICE_CAPACITY: usize = 64;

/// The shared snapshot record, one per user.
///
/// Implementations must make `push` a single compare-and-swap: the version
/// check and the write happen as one indivisible step, so a stale writer
/// always gets [`PushOutcome::Conflict`] rather than overwriting a newer
/// record.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Fetches the current record, or `None` when nothing was ever pushed.
    async fn pull(&self) -> SyncResult<Option<RemoteRecord>>;

    /// Writes `payload` if the record is still at `expected_version`.
    ///
    /// `expected_version` is 0 when no record exists.
    async fn push(&self, expected_version: u64, payload: &SnapshotPayload)
        -> SyncResult<PushOutcome>;

    /// Subscribes to "something changed" notices for `user_id`.
    ///
    /// Notices are best-effort and carry no payload.
    fn subscribe(&self, user_id: &str) -> broadcast::Receiver<ChangeNotice>;
}

/// An in-memory remote store for testing.
///
/// Holds a single record behind a mutex, so concurrent pushes with the same
/// expected version yield exactly one acceptance.
#[derive(Debug)]
pub struct MockRemoteStore {
    record: Mutex<Option<RemoteRecord>>,
    connected: AtomicBool,
    interleaved: Mutex<VecDeque<SnapshotPayload>>,
    latency: Mutex<Option<Duration>>,
    pulls: AtomicUsize,
    pushes: AtomicUsize,
    notices: broadcast::Sender<ChangeNotice>,
}

impl MockRemoteStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        Self {
            record: Mutex::new(None),
            connected: AtomicBool::new(true),
            interleaved: Mutex::new(VecDeque::new()),
            latency: Mutex::new(None),
            pulls: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            notices,
        }
    }

    /// Creates a store already holding `payload` at `version`.
    pub fn with_record(version: u64, payload: SnapshotPayload) -> Self {
        let store = Self::new();
        store.set_record(Some(RemoteRecord {
            version,
            updated_at: now_iso(),
            payload,
        }));
        store
    }

    /// Replaces the record.
    pub fn set_record(&self, record: Option<RemoteRecord>) {
        *self.record.lock() = record;
    }

    /// Returns a copy of the record.
    pub fn record(&self) -> Option<RemoteRecord> {
        self.record.lock().clone()
    }

    /// Current version, 0 when empty.
    pub fn version(&self) -> u64 {
        self.record.lock().as_ref().map_or(0, |r| r.version)
    }

    /// Queues a write by another device that lands just before the next push.
    pub fn interleave_write(&self, payload: SnapshotPayload) {
        self.interleaved.lock().push_back(payload);
    }

    /// Makes every call wait `latency` before running.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Number of pulls served.
    pub fn pull_count(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Number of pushes received, including conflicting ones.
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }

    /// Sends a change notice to subscribers.
    pub fn announce(&self, notice: ChangeNotice) {
        // No subscribers is fine.
        let _ = self.notices.send(notice);
    }

    async fn simulate_network(&self) -> SyncResult<()> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.connected.load(Ordering::SeqCst) {
            return Err(SyncError::transport_retryable("remote unreachable"));
        }
        Ok(())
    }

    fn commit(record: &mut Option<RemoteRecord>, payload: SnapshotPayload) -> (u64, String) {
        let version = record.as_ref().map_or(0, |r| r.version) + 1;
        let updated_at = now_iso();
        *record = Some(RemoteRecord {
            version,
            updated_at: updated_at.clone(),
            payload,
        });
        (version, updated_at)
    }
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn pull(&self) -> SyncResult<Option<RemoteRecord>> {
        self.simulate_network().await?;
        self.pulls.fetch_add(1, Ordering::SeqCst);
        Ok(self.record())
    }

    async fn push(
        &self,
        expected_version: u64,
        payload: &SnapshotPayload,
    ) -> SyncResult<PushOutcome> {
        self.simulate_network().await?;
        self.pushes.fetch_add(1, Ordering::SeqCst);

        let mut record = self.record.lock();
        if let Some(other) = self.interleaved.lock().pop_front() {
            Self::commit(&mut record, other);
        }

        let current = record.as_ref().map_or(0, |r| r.version);
        if current != expected_version {
            return Ok(PushOutcome::Conflict);
        }

        let (version, updated_at) = Self::commit(&mut record, payload.clone());
        drop(record);
        self.announce(ChangeNotice::new("mock", Some(version)));
        Ok(PushOutcome::Accepted {
            version,
            updated_at,
        })
    }

    fn subscribe(&self, _user_id: &str) -> broadcast::Receiver<ChangeNotice> {
        self.notices.subscribe()
    }
}
