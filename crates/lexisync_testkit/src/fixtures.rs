//! Test fixtures and store helpers.
//!
//! Provides fixed timestamps, sample blocks for every domain and temporary
//! on-disk stores.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use lexisync_engine::{BackupConfig, DirBackupBackend, FileLocalStore, LocalBackupStore};
use lexisync_protocol::{Domain, DomainBlock, SnapshotPayload};
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .expect("valid base date")
}

/// Marker for midnight UTC on the given day offset from 2024-01-01.
///
/// `ts(0)` is `2024-01-01T00:00:00.000Z`; larger offsets are later.
pub fn ts(day: i64) -> String {
    (epoch() + Duration::days(day)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Marker for the given millisecond offset from 2024-01-01.
pub fn ts_millis(offset: i64) -> String {
    (epoch() + Duration::milliseconds(offset)).to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Builds a block from a JSON object.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn block(value: Value) -> DomainBlock {
    DomainBlock::from_value(value).expect("block must be a JSON object")
}

/// Builds a block from a JSON object and stamps it.
pub fn stamped(value: Value, updated_at: &str) -> DomainBlock {
    block(value).with_updated_at(updated_at)
}

/// Vocabulary block whose books have the given ids. The first is active.
pub fn vocabulary_block(book_ids: &[&str]) -> DomainBlock {
    let books: Vec<Value> = book_ids
        .iter()
        .map(|id| json!({ "id": id, "name": format!("Book {id}"), "words": [] }))
        .collect();
    block(json!({
        "books": books,
        "activeBookId": book_ids.first(),
    }))
}

/// Dictation settings block with the given playback rate.
pub fn settings_block(rate: f64) -> DomainBlock {
    block(json!({ "rate": rate, "repeat": 2 }))
}

/// A single analyzed-article item.
pub fn analyzed_item(kind: &str, sentence: &str, context: &str, updated_at: &str) -> Value {
    json!({
        "type": kind,
        "sentence": sentence,
        "context": context,
        "updatedAt": updated_at,
    })
}

/// Articles block holding the given analyzed items.
pub fn articles_block(items: Vec<Value>) -> DomainBlock {
    block(json!({ "analyzedArticles": items }))
}

/// Q&A block with one set per id.
pub fn qa_block(set_ids: &[&str]) -> DomainBlock {
    let sets: Vec<Value> = set_ids
        .iter()
        .map(|id| json!({ "id": id, "questions": [] }))
        .collect();
    block(json!({
        "manifest": { "setIds": set_ids },
        "sets": sets,
    }))
}

/// Assistant block with `count` empty conversations.
pub fn assistant_block(count: usize) -> DomainBlock {
    let conversations: Vec<Value> = (0..count)
        .map(|i| json!({ "id": format!("c{i}"), "messages": [] }))
        .collect();
    block(json!({ "conversations": conversations }))
}

/// A payload with every domain populated and stamped `updated_at`.
pub fn sample_payload(updated_at: &str) -> SnapshotPayload {
    SnapshotPayload::new()
        .with(
            Domain::DictationSettings,
            settings_block(1.0).with_updated_at(updated_at),
        )
        .with(
            Domain::Vocabulary,
            vocabulary_block(&["A"]).with_updated_at(updated_at),
        )
        .with(
            Domain::Articles,
            articles_block(vec![analyzed_item("sentence", "s1", "c1", updated_at)])
                .with_updated_at(updated_at),
        )
        .with(Domain::Qa, qa_block(&["q1"]).with_updated_at(updated_at))
        .with(
            Domain::Assistant,
            assistant_block(1).with_updated_at(updated_at),
        )
}

/// Book ids of a vocabulary block, in order.
pub fn book_ids(block: &DomainBlock) -> Vec<String> {
    block
        .field("books")
        .and_then(Value::as_array)
        .map(|books| {
            books
                .iter()
                .filter_map(|b| b.get("id").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// On-disk local and backup stores with automatic cleanup.
pub struct TempStores {
    /// The local store.
    pub local: Arc<FileLocalStore>,
    /// The backup ring over `local`.
    pub backups: Arc<LocalBackupStore<FileLocalStore>>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: TempDir,
}

impl TempStores {
    /// Creates fresh stores under a new temporary directory.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let local = Arc::new(
            FileLocalStore::open(temp_dir.path().join("local"))
                .expect("Failed to open local store"),
        );
        let backend = DirBackupBackend::open(temp_dir.path().join("backups"))
            .expect("Failed to open backup directory");
        let backups = Arc::new(LocalBackupStore::new(
            BackupConfig::default(),
            Arc::clone(&local),
            Arc::new(backend),
        ));

        Self {
            local,
            backups,
            temp_dir,
        }
    }

    /// Reopens the local store from disk.
    pub fn reopen_local(&self) -> FileLocalStore {
        FileLocalStore::open(self.temp_dir.path().join("local"))
            .expect("Failed to reopen local store")
    }
}

impl Default for TempStores {
    fn default() -> Self {
        Self::new()
    }
}
