//! Local domain storage.
//!
//! The application owns each domain's state; the engine only reads and writes
//! whole blocks through [`LocalStore`], plus the per-domain `updatedAt`
//! marker used for last-write-wins.

use crate::error::{SyncError, SyncResult};
use lexisync_protocol::{now_iso, Domain, DomainBlock};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Per-domain key-value storage supplied by the application.
pub trait LocalStore: Send + Sync {
    /// Reads a domain's current state.
    fn get(&self, domain: Domain) -> SyncResult<Option<DomainBlock>>;

    /// Replaces a domain's state.
    fn set(&self, domain: Domain, block: DomainBlock) -> SyncResult<()>;

    /// Reads a domain's last recorded `updatedAt` marker.
    fn marker(&self, domain: Domain) -> SyncResult<Option<String>>;

    /// Records a domain's `updatedAt` marker.
    fn set_marker(&self, domain: Domain, updated_at: &str) -> SyncResult<()>;

    /// Replaces a domain's state and marker together.
    ///
    /// The default writes the block, then the marker. A failure between the
    /// two leaves the new block under the old marker, which the next
    /// last-write-wins pass treats as stale and overwrites again.
    fn replace(&self, domain: Domain, block: DomainBlock, updated_at: &str) -> SyncResult<()> {
        self.set(domain, block)?;
        self.set_marker(domain, updated_at)
    }
}

/// Everything held by a [`MemoryLocalStore`], for before/after comparisons.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalState {
    /// Domain blocks.
    pub blocks: BTreeMap<Domain, DomainBlock>,
    /// Domain markers.
    pub markers: BTreeMap<Domain, String>,
}

/// In-memory local storage.
#[derive(Debug)]
pub struct MemoryLocalStore {
    state: RwLock<LocalState>,
    fail_writes: AtomicBool,
    // Writes allowed before failing; usize::MAX when unlimited.
    write_budget: AtomicUsize,
}

impl Default for MemoryLocalStore {
    fn default() -> Self {
        Self {
            state: RwLock::default(),
            fail_writes: AtomicBool::new(false),
            write_budget: AtomicUsize::new(usize::MAX),
        }
    }
}

impl MemoryLocalStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an application edit: stores the block and stamps the marker
    /// with the current time.
    pub fn record_mutation(&self, domain: Domain, block: DomainBlock) -> String {
        let now = now_iso();
        let mut state = self.state.write();
        state.blocks.insert(domain, block);
        state.markers.insert(domain, now.clone());
        now
    }

    /// Stores a block and marker without going through the failure toggle.
    pub fn seed(&self, domain: Domain, block: DomainBlock, marker: Option<&str>) {
        let mut state = self.state.write();
        state.blocks.insert(domain, block);
        match marker {
            Some(m) => state.markers.insert(domain, m.to_string()),
            None => state.markers.remove(&domain),
        };
    }

    /// Makes every subsequent write fail with a storage error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Lets `writes` more writes succeed, then fails the rest. `None` lifts
    /// the limit.
    pub fn set_write_budget(&self, writes: Option<usize>) {
        self.write_budget
            .store(writes.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    /// Returns a copy of the stored state.
    pub fn state(&self) -> LocalState {
        self.state.read().clone()
    }

    fn check_writable(&self) -> SyncResult<()> {
        let exhausted = self
            .write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                usize::MAX => Some(left),
                0 => None,
                n => Some(n - 1),
            })
            .is_err();
        if exhausted || self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::storage("local storage quota exceeded"));
        }
        Ok(())
    }
}

impl LocalStore for MemoryLocalStore {
    fn get(&self, domain: Domain) -> SyncResult<Option<DomainBlock>> {
        Ok(self.state.read().blocks.get(&domain).cloned())
    }

    fn set(&self, domain: Domain, block: DomainBlock) -> SyncResult<()> {
        self.check_writable()?;
        self.state.write().blocks.insert(domain, block);
        Ok(())
    }

    fn marker(&self, domain: Domain) -> SyncResult<Option<String>> {
        Ok(self.state.read().markers.get(&domain).cloned())
    }

    fn set_marker(&self, domain: Domain, updated_at: &str) -> SyncResult<()> {
        self.check_writable()?;
        self.state
            .write()
            .markers
            .insert(domain, updated_at.to_string());
        Ok(())
    }

    fn replace(&self, domain: Domain, block: DomainBlock, updated_at: &str) -> SyncResult<()> {
        self.check_writable()?;
        let mut state = self.state.write();
        state.blocks.insert(domain, block);
        state.markers.insert(domain, updated_at.to_string());
        Ok(())
    }
}

const MARKERS_FILE: &str = "markers.json";

/// Local storage backed by JSON files in one directory.
///
/// Each domain lives in `<domain>.json`; markers share `markers.json`.
#[derive(Debug)]
pub struct FileLocalStore {
    dir: PathBuf,
    markers_lock: RwLock<()>,
}

impl FileLocalStore {
    /// Opens (and creates if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> SyncResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            markers_lock: RwLock::new(()),
        })
    }

    /// The store's directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn domain_path(&self, domain: Domain) -> PathBuf {
        self.dir.join(format!("{}.json", domain.as_str()))
    }

    fn read_markers(&self) -> SyncResult<BTreeMap<String, String>> {
        let path = self.dir.join(MARKERS_FILE);
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl LocalStore for FileLocalStore {
    fn get(&self, domain: Domain) -> SyncResult<Option<DomainBlock>> {
        let path = self.domain_path(domain);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn set(&self, domain: Domain, block: DomainBlock) -> SyncResult<()> {
        let bytes = serde_json::to_vec_pretty(&block)?;
        fs::write(self.domain_path(domain), bytes)?;
        Ok(())
    }

    fn marker(&self, domain: Domain) -> SyncResult<Option<String>> {
        let _guard = self.markers_lock.read();
        Ok(self.read_markers()?.remove(domain.as_str()))
    }

    fn set_marker(&self, domain: Domain, updated_at: &str) -> SyncResult<()> {
        let _guard = self.markers_lock.write();
        let mut markers = self.read_markers()?;
        markers.insert(domain.as_str().to_string(), updated_at.to_string());
        let bytes = serde_json::to_vec_pretty(&markers)?;
        fs::write(self.dir.join(MARKERS_FILE), bytes)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vocab(books: serde_json::Value) -> DomainBlock {
        DomainBlock::from_value(json!({ "books": books })).unwrap()
    }

    #[test]
    fn memory_store_get_set() {
        let store = MemoryLocalStore::new();
        assert!(store.get(Domain::Vocabulary).unwrap().is_none());

        store.set(Domain::Vocabulary, vocab(json!(["A"]))).unwrap();
        store
            .set_marker(Domain::Vocabulary, "2024-01-01T00:00:00Z")
            .unwrap();

        assert_eq!(
            store.get(Domain::Vocabulary).unwrap(),
            Some(vocab(json!(["A"])))
        );
        assert_eq!(
            store.marker(Domain::Vocabulary).unwrap().as_deref(),
            Some("2024-01-01T00:00:00Z")
        );
    }

    #[test]
    fn memory_store_failing_writes() {
        let store = MemoryLocalStore::new();
        store.set_fail_writes(true);

        let result = store.set(Domain::Qa, DomainBlock::default());
        assert!(matches!(result, Err(SyncError::Storage(_))));
        assert!(store.state().blocks.is_empty());
    }

    #[test]
    fn write_budget_runs_out() {
        let store = MemoryLocalStore::new();
        store.set_write_budget(Some(1));

        store
            .replace(Domain::Qa, DomainBlock::default(), "2024-01-01T00:00:00Z")
            .unwrap();
        assert!(store
            .replace(Domain::Assistant, DomainBlock::default(), "2024-01-01T00:00:00Z")
            .is_err());
        assert_eq!(store.state().markers.len(), 1);

        store.set_write_budget(None);
        store.set(Domain::Assistant, DomainBlock::default()).unwrap();
    }

    #[test]
    fn record_mutation_stamps_marker() {
        let store = MemoryLocalStore::new();
        let stamp = store.record_mutation(Domain::Assistant, DomainBlock::default());

        assert_eq!(store.marker(Domain::Assistant).unwrap(), Some(stamp));
    }

    #[test]
    fn file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLocalStore::open(dir.path()).unwrap();

        store.set(Domain::Vocabulary, vocab(json!(["A", "B"]))).unwrap();
        store
            .set_marker(Domain::Vocabulary, "2024-01-02T00:00:00Z")
            .unwrap();
        store
            .set_marker(Domain::Qa, "2024-01-03T00:00:00Z")
            .unwrap();

        let reopened = FileLocalStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get(Domain::Vocabulary).unwrap(),
            Some(vocab(json!(["A", "B"])))
        );
        assert_eq!(
            reopened.marker(Domain::Qa).unwrap().as_deref(),
            Some("2024-01-03T00:00:00Z")
        );
        assert!(reopened.get(Domain::Qa).unwrap().is_none());
        assert!(reopened.marker(Domain::Articles).unwrap().is_none());
    }
}
