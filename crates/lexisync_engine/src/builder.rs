//! Snapshot assembly from local domain storage.

use crate::error::SyncResult;
use crate::local::LocalStore;
use lexisync_protocol::{
    compact_articles_block, now_iso, CompactionPolicy, Domain, DomainBlock, Snapshot,
    SnapshotPayload, Timestamp, SCHEMA_VERSION,
};
use std::sync::Arc;
use tracing::trace;

/// Builds a [`Snapshot`] from independently tracked domain blocks.
///
/// A domain whose marker was never set contributes nothing: it has no opinion
/// and must not outrank a populated remote domain. The settings domain is the
/// one exception, and gets the current time when it has local state but no
/// marker.
pub struct SnapshotBuilder<L: LocalStore> {
    store: Arc<L>,
    schema_version: u32,
    compaction: CompactionPolicy,
}

impl<L: LocalStore> SnapshotBuilder<L> {
    /// Creates a builder over `store`.
    pub fn new(store: Arc<L>) -> Self {
        Self {
            store,
            schema_version: SCHEMA_VERSION,
            compaction: CompactionPolicy::default(),
        }
    }

    /// Sets the schema version written into snapshots.
    pub fn with_schema_version(mut self, schema_version: u32) -> Self {
        self.schema_version = schema_version;
        self
    }

    /// Sets the articles compaction policy.
    pub fn with_compaction(mut self, compaction: CompactionPolicy) -> Self {
        self.compaction = compaction;
        self
    }

    /// Reads every domain and assembles a snapshot.
    pub fn build(&self) -> SyncResult<Snapshot> {
        let mut payload = SnapshotPayload::new();
        for domain in Domain::ALL {
            if let Some(block) = self.build_block(domain)? {
                payload.insert(domain, block);
            }
        }

        let mut snapshot = Snapshot::new(now_iso(), payload);
        snapshot.schema_version = self.schema_version;
        Ok(snapshot)
    }

    fn build_block(&self, domain: Domain) -> SyncResult<Option<DomainBlock>> {
        let state = self.store.get(domain)?;
        let marker = self
            .store
            .marker(domain)?
            .filter(|m| Timestamp::parse(m).is_some());

        let updated_at = match (marker, &state) {
            (Some(marker), _) => marker,
            (None, Some(_)) if domain.mints_missing_marker() => now_iso(),
            (None, _) => {
                trace!(domain = %domain, "no marker, skipping domain");
                return Ok(None);
            }
        };

        let mut block = state.unwrap_or_default().with_updated_at(updated_at);
        if domain == Domain::Articles {
            compact_articles_block(&mut block, &self.compaction);
        }
        Ok(Some(block))
    }
}
