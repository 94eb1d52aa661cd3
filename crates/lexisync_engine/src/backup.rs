//! Local rollback backups.
//!
//! A bounded ring of recent snapshot payloads, kept independently of the
//! remote so a harmful merge can be undone offline. Ids increase
//! monotonically and are never reused, even after deletion; the backend
//! keeps the highest id ever issued. Once the ring exceeds its bound the
//! smallest ids go first.

use crate::applier::{ApplyMode, SnapshotApplier};
use crate::builder::SnapshotBuilder;
use crate::config::BackupConfig;
use crate::error::{SyncError, SyncResult};
use crate::local::LocalStore;
use lexisync_protocol::{now_iso, Domain, SnapshotPayload};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// A stored backup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Monotonic id.
    pub id: u64,
    /// When the backup was taken.
    pub ts: String,
    /// Free-form note.
    pub note: String,
    /// Snapshot payload at the time.
    pub payload: SnapshotPayload,
}

impl BackupRecord {
    /// The record without its payload.
    pub fn summary(&self) -> BackupSummary {
        BackupSummary {
            id: self.id,
            ts: self.ts.clone(),
            note: self.note.clone(),
        }
    }
}

/// A backup listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    /// Monotonic id.
    pub id: u64,
    /// When the backup was taken.
    pub ts: String,
    /// Free-form note.
    pub note: String,
}

/// Where backup records live.
pub trait BackupBackend: Send + Sync {
    /// Ids of every stored record, in any order.
    fn ids(&self) -> SyncResult<Vec<u64>>;

    /// Loads a record.
    fn load(&self, id: u64) -> SyncResult<Option<BackupRecord>>;

    /// Stores a record, replacing any with the same id.
    fn save(&self, record: &BackupRecord) -> SyncResult<()>;

    /// Deletes a record. Returns false if it did not exist.
    fn delete(&self, id: u64) -> SyncResult<bool>;

    /// The highest id ever issued, 0 if none.
    fn last_id(&self) -> SyncResult<u64>;

    /// Records `id` as the highest id issued.
    fn set_last_id(&self, id: u64) -> SyncResult<()>;
}

/// Backups held in memory.
#[derive(Debug, Default)]
pub struct MemoryBackupBackend {
    records: Mutex<BTreeMap<u64, BackupRecord>>,
    last_id: AtomicU64,
    fail_writes: AtomicBool,
}

impl MemoryBackupBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent save fail.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

impl BackupBackend for MemoryBackupBackend {
    fn ids(&self) -> SyncResult<Vec<u64>> {
        Ok(self.records.lock().keys().copied().collect())
    }

    fn load(&self, id: u64) -> SyncResult<Option<BackupRecord>> {
        Ok(self.records.lock().get(&id).cloned())
    }

    fn save(&self, record: &BackupRecord) -> SyncResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::storage("backup storage quota exceeded"));
        }
        self.records.lock().insert(record.id, record.clone());
        Ok(())
    }

    fn delete(&self, id: u64) -> SyncResult<bool> {
        Ok(self.records.lock().remove(&id).is_some())
    }

    fn last_id(&self) -> SyncResult<u64> {
        Ok(self.last_id.load(Ordering::SeqCst))
    }

    fn set_last_id(&self, id: u64) -> SyncResult<()> {
        self.last_id.fetch_max(id, Ordering::SeqCst);
        Ok(())
    }
}

const LAST_ID_FILE: &str = "last-id";

/// Backups stored as `backup-<id>.json` files in one directory, with the
/// highest issued id in `last-id`.
#[derive(Debug)]
pub struct DirBackupBackend {
    dir: PathBuf,
}

impl DirBackupBackend {
    /// Opens (and creates if needed) a backend rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> SyncResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: u64) -> PathBuf {
        self.dir.join(format!("backup-{}.json", id))
    }

    fn parse_id(file_name: &str) -> Option<u64> {
        file_name
            .strip_prefix("backup-")?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

impl BackupBackend for DirBackupBackend {
    fn ids(&self) -> SyncResult<Vec<u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(Self::parse_id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    fn load(&self, id: u64) -> SyncResult<Option<BackupRecord>> {
        let path = self.path(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn save(&self, record: &BackupRecord) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(record)?;
        fs::write(self.path(record.id), bytes)?;
        Ok(())
    }

    fn delete(&self, id: u64) -> SyncResult<bool> {
        match fs::remove_file(self.path(id)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn last_id(&self) -> SyncResult<u64> {
        match fs::read_to_string(self.dir.join(LAST_ID_FILE)) {
            Ok(text) => text
                .trim()
                .parse()
                .map_err(|_| SyncError::storage(format!("corrupt {LAST_ID_FILE} file"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn set_last_id(&self, id: u64) -> SyncResult<()> {
        fs::write(self.dir.join(LAST_ID_FILE), id.to_string())?;
        Ok(())
    }
}

/// The backup ring over a local store.
pub struct LocalBackupStore<L: LocalStore> {
    config: BackupConfig,
    builder: SnapshotBuilder<L>,
    applier: SnapshotApplier<L>,
    backend: Arc<dyn BackupBackend>,
    write_lock: Mutex<()>,
}

impl<L: LocalStore> LocalBackupStore<L> {
    /// Creates a backup store over `local`, persisting into `backend`.
    pub fn new(config: BackupConfig, local: Arc<L>, backend: Arc<dyn BackupBackend>) -> Self {
        Self {
            config,
            builder: SnapshotBuilder::new(Arc::clone(&local)),
            applier: SnapshotApplier::new(local),
            backend,
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a memory-backed backup store.
    pub fn in_memory(config: BackupConfig, local: Arc<L>) -> Self {
        Self::new(config, local, Arc::new(MemoryBackupBackend::new()))
    }

    /// Snapshots the local store into a new backup and prunes the ring.
    pub fn create_backup(&self, note: &str) -> SyncResult<BackupSummary> {
        let snapshot = self.builder.build()?;

        let _guard = self.write_lock.lock();
        let mut ids = self.backend.ids()?;
        ids.sort_unstable();
        let last = ids.last().copied().unwrap_or(0).max(self.backend.last_id()?);
        let record = BackupRecord {
            id: last + 1,
            ts: now_iso(),
            note: note.to_string(),
            payload: snapshot.payload,
        };
        self.backend.save(&record)?;
        self.backend.set_last_id(record.id)?;
        ids.push(record.id);
        debug!(id = record.id, note, "backup created");

        let excess = ids.len().saturating_sub(self.config.max_backups);
        for &id in &ids[..excess] {
            self.backend.delete(id)?;
            debug!(id, "backup evicted");
        }

        Ok(record.summary())
    }

    /// Lists backups, newest first.
    pub fn list_backups(&self) -> SyncResult<Vec<BackupSummary>> {
        let mut ids = self.backend.ids()?;
        ids.sort_unstable_by(|a, b| b.cmp(a));

        let mut summaries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.backend.load(id)? {
                summaries.push(record.summary());
            }
        }
        Ok(summaries)
    }

    /// Loads a backup's payload.
    pub fn load_backup_payload(&self, id: u64) -> SyncResult<SnapshotPayload> {
        self.backend
            .load(id)?
            .map(|record| record.payload)
            .ok_or(SyncError::BackupNotFound(id))
    }

    /// Deletes a backup. Returns false if it did not exist.
    pub fn delete_backup(&self, id: u64) -> SyncResult<bool> {
        let _guard = self.write_lock.lock();
        self.backend.delete(id)
    }

    /// Writes a backup back into local storage.
    ///
    /// Every domain in the backup replaces local state and is stamped with the
    /// current time, so the restored data wins the next sync. The remote is
    /// not contacted.
    pub fn restore(&self, id: u64) -> SyncResult<Vec<Domain>> {
        let payload = self.load_backup_payload(id)?;
        let restored = self.applier.apply_with_mode(&payload, ApplyMode::Force)?;
        info!(id, domains = restored.len(), "backup restored");
        Ok(restored)
    }
}
