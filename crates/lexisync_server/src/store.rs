//! Per-user snapshot records with compare-and-swap saves.

use crate::error::{ServerError, ServerResult};
use lexisync_protocol::{now_iso, RemoteRecord, SnapshotPayload};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Snapshot records keyed by user id.
///
/// The version check and the write of [`save`](Self::save) happen under one
/// write lock, so two saves with the same expected version can never both
/// succeed.
#[derive(Debug, Default)]
pub struct SnapshotRecordStore {
    records: RwLock<HashMap<String, RemoteRecord>>,
}

impl SnapshotRecordStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record for `user_id`.
    pub fn get(&self, user_id: &str) -> Option<RemoteRecord> {
        self.records.read().get(user_id).cloned()
    }

    /// Current version for `user_id`, 0 when no record exists.
    pub fn version(&self, user_id: &str) -> u64 {
        self.records
            .read()
            .get(user_id)
            .map_or(0, |record| record.version)
    }

    /// Number of users with a record.
    pub fn user_count(&self) -> usize {
        self.records.read().len()
    }

    /// Saves `payload` if the record is still at `expected_version`.
    ///
    /// Returns the new record, or [`ServerError::VersionConflict`] when the
    /// stored version differs.
    pub fn save(
        &self,
        user_id: &str,
        expected_version: u64,
        payload: SnapshotPayload,
    ) -> ServerResult<RemoteRecord> {
        let mut records = self.records.write();
        let current = records.get(user_id).map_or(0, |record| record.version);
        if current != expected_version {
            return Err(ServerError::VersionConflict {
                expected: expected_version,
                current,
            });
        }

        let record = RemoteRecord {
            version: current + 1,
            updated_at: now_iso(),
            payload,
        };
        records.insert(user_id.to_string(), record.clone());
        debug!(user_id, version = record.version, "snapshot saved");
        Ok(record)
    }
}
