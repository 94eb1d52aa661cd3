//! Writes merged or remote payloads back into local storage.

use crate::error::SyncResult;
use crate::local::LocalStore;
use lexisync_protocol::{now_iso, Domain, SnapshotPayload, Timestamp};
use std::sync::Arc;
use tracing::debug;

/// How incoming blocks are weighed against local markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApplyMode {
    /// Replace a domain only when the incoming block is strictly newer than
    /// the local marker, or the local marker is absent.
    #[default]
    LastWriteWins,
    /// Replace every incoming domain and stamp it with the current time.
    Force,
}

/// Applies snapshots domain by domain.
///
/// A domain is either replaced wholesale or left untouched. On replacement the
/// incoming `updatedAt` is stored verbatim as the local marker, so a freshly
/// applied domain does not look locally modified on the next build.
///
/// Every decision is made from a single read pass before anything is written,
/// and each domain's block and marker go through one [`LocalStore::replace`].
/// If storage fails partway, domains already written stay applied with their
/// markers and the rest are untouched; rerunning the apply finishes the job.
pub struct SnapshotApplier<L: LocalStore> {
    store: Arc<L>,
}

impl<L: LocalStore> SnapshotApplier<L> {
    /// Creates an applier over `store`.
    pub fn new(store: Arc<L>) -> Self {
        Self { store }
    }

    /// Applies `payload` with last-write-wins and returns the replaced domains.
    pub fn apply(&self, payload: &SnapshotPayload) -> SyncResult<Vec<Domain>> {
        self.apply_with_mode(payload, ApplyMode::LastWriteWins)
    }

    /// Applies `payload` under `mode` and returns the replaced domains.
    pub fn apply_with_mode(
        &self,
        payload: &SnapshotPayload,
        mode: ApplyMode,
    ) -> SyncResult<Vec<Domain>> {
        let forced_at = match mode {
            ApplyMode::Force => Some(now_iso()),
            ApplyMode::LastWriteWins => None,
        };

        let mut winners = Vec::new();
        for (&domain, block) in payload {
            let marker = match &forced_at {
                Some(now) => now.clone(),
                None => {
                    // Incoming blocks without a usable marker never win.
                    let Some(incoming) = block.timestamp() else {
                        continue;
                    };
                    if !self.incoming_wins(domain, &incoming)? {
                        continue;
                    }
                    incoming.as_str().to_string()
                }
            };
            winners.push((domain, block, marker));
        }

        let mut applied = Vec::with_capacity(winners.len());
        for (domain, block, marker) in winners {
            let mut replacement = block.clone();
            replacement.updated_at = Some(marker.clone());
            self.store.replace(domain, replacement, &marker)?;
            applied.push(domain);
        }

        if !applied.is_empty() {
            debug!(?applied, ?mode, "applied snapshot domains");
        }
        Ok(applied)
    }

    fn incoming_wins(&self, domain: Domain, incoming: &Timestamp) -> SyncResult<bool> {
        let local = self
            .store
            .marker(domain)?
            .as_deref()
            .and_then(Timestamp::parse);
        Ok(match local {
            None => true,
            Some(local) => incoming > &local,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::{LocalState, MemoryLocalStore};
    use lexisync_protocol::DomainBlock;
    use serde_json::json;

    fn vocab(books: serde_json::Value, ts: &str) -> DomainBlock {
        DomainBlock::from_value(json!({ "books": books }))
            .unwrap()
            .with_updated_at(ts)
    }

    fn setup() -> (Arc<MemoryLocalStore>, SnapshotApplier<MemoryLocalStore>) {
        let store = Arc::new(MemoryLocalStore::new());
        let applier = SnapshotApplier::new(Arc::clone(&store));
        (store, applier)
    }

    #[test]
    fn replaces_domain_when_marker_absent() {
        let (store, applier) = setup();
        let payload =
            SnapshotPayload::new().with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-02T00:00:00Z"));

        let applied = applier.apply(&payload).unwrap();

        assert_eq!(applied, vec![Domain::Vocabulary]);
        let stored = store.get(Domain::Vocabulary).unwrap().unwrap();
        assert_eq!(stored.field("books"), Some(&json!(["B"])));
    }

    #[test]
    fn stores_incoming_marker_verbatim() {
        let (store, applier) = setup();
        let raw = "2024-01-02T00:00:00.000+00:00";
        let payload = SnapshotPayload::new().with(Domain::Qa, vocab(json!([]), raw));

        applier.apply(&payload).unwrap();

        assert_eq!(store.marker(Domain::Qa).unwrap().as_deref(), Some(raw));
    }

    #[test]
    fn older_incoming_is_ignored() {
        let (store, applier) = setup();
        store.seed(
            Domain::Vocabulary,
            vocab(json!(["A"]), "2024-01-02T00:00:00Z"),
            Some("2024-01-02T00:00:00Z"),
        );
        let payload =
            SnapshotPayload::new().with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-01T00:00:00Z"));

        assert!(applier.apply(&payload).unwrap().is_empty());
        let stored = store.get(Domain::Vocabulary).unwrap().unwrap();
        assert_eq!(stored.field("books"), Some(&json!(["A"])));
    }

    #[test]
    fn equal_timestamp_is_ignored() {
        let (store, applier) = setup();
        store.seed(
            Domain::Vocabulary,
            vocab(json!(["A"]), "2024-01-02T00:00:00Z"),
            Some("2024-01-02T00:00:00Z"),
        );
        let payload = SnapshotPayload::new()
            .with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-02T00:00:00.000Z"));

        assert!(applier.apply(&payload).unwrap().is_empty());
    }

    #[test]
    fn unmarked_incoming_block_is_skipped() {
        let (store, applier) = setup();
        let payload = SnapshotPayload::new().with(
            Domain::Assistant,
            DomainBlock::from_value(json!({ "conversations": [] })).unwrap(),
        );

        assert!(applier.apply(&payload).unwrap().is_empty());
        assert!(store.get(Domain::Assistant).unwrap().is_none());
    }

    #[test]
    fn apply_is_idempotent() {
        let (store, applier) = setup();
        let payload = SnapshotPayload::new()
            .with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-02T00:00:00Z"))
            .with(Domain::Qa, vocab(json!([1]), "2024-01-03T00:00:00Z"));

        applier.apply(&payload).unwrap();
        let first = store.state();
        let second_applied = applier.apply(&payload).unwrap();

        assert!(second_applied.is_empty());
        assert_eq!(store.state(), first);
    }

    #[test]
    fn force_mode_overrides_newer_local_state() {
        let (store, applier) = setup();
        store.seed(
            Domain::Vocabulary,
            vocab(json!(["A"]), "2030-01-01T00:00:00Z"),
            Some("2030-01-01T00:00:00Z"),
        );
        let payload =
            SnapshotPayload::new().with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-01T00:00:00Z"));

        let applied = applier
            .apply_with_mode(&payload, ApplyMode::Force)
            .unwrap();

        assert_eq!(applied, vec![Domain::Vocabulary]);
        let stored = store.get(Domain::Vocabulary).unwrap().unwrap();
        assert_eq!(stored.field("books"), Some(&json!(["B"])));
        let marker = store.marker(Domain::Vocabulary).unwrap().unwrap();
        assert_ne!(marker, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn storage_failure_propagates() {
        let (store, applier) = setup();
        store.set_fail_writes(true);
        let payload =
            SnapshotPayload::new().with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-02T00:00:00Z"));

        assert!(applier.apply(&payload).is_err());
        assert_eq!(store.state(), LocalState::default());
    }

    #[test]
    fn failure_midway_never_splits_block_from_marker() {
        let (store, applier) = setup();
        let payload = SnapshotPayload::new()
            .with(Domain::Vocabulary, vocab(json!(["B"]), "2024-01-02T00:00:00Z"))
            .with(Domain::Qa, vocab(json!([1]), "2024-01-03T00:00:00Z"));
        store.set_write_budget(Some(1));

        assert!(applier.apply(&payload).is_err());
        let state = store.state();
        assert_eq!(state.blocks.len(), 1);
        assert_eq!(
            state.markers.get(&Domain::Vocabulary).map(String::as_str),
            Some("2024-01-02T00:00:00Z")
        );
        assert!(state.markers.get(&Domain::Qa).is_none());

        store.set_write_budget(None);
        assert_eq!(applier.apply(&payload).unwrap(), vec![Domain::Qa]);
        assert_eq!(
            store.marker(Domain::Qa).unwrap().as_deref(),
            Some("2024-01-03T00:00:00Z")
        );
    }
}
