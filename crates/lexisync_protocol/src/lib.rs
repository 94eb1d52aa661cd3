//! # lexisync Protocol
//!
//! Snapshot data model and merge rules for lexisync.
//!
//! This crate provides:
//! - `Domain` and `DomainBlock`, the independently timestamped sections of a snapshot
//! - `SnapshotPayload` with the interoperable JSON wire shape
//! - `Timestamp` parsing and ordering used for last-write-wins decisions
//! - `lww_merge`, the per-domain merge between a local and a remote payload
//! - Analyzed-article compaction
//! - Remote protocol messages (`get_snapshot`, `save_snapshot`, change notices)
//!
//! This is a pure protocol crate with no I/O operations.
//!
//! ## Merge model
//!
//! Merging happens at domain granularity. A domain is either replaced
//! wholesale by the side with the strictly newer `updatedAt`, or left as it
//! is. Two devices editing the same domain concurrently lose one device's
//! edits for that domain; this keeps merges deterministic.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compaction;
mod domain;
mod error;
mod merge;
mod messages;
mod snapshot;
mod timestamp;

pub use compaction::{
    compact_analyzed_articles, compact_articles_block, CompactionPolicy, ANALYZED_ARTICLES_FIELD,
};
pub use domain::{Domain, DomainBlock};
pub use error::{ProtocolError, ProtocolResult};
pub use merge::{lww_merge, merge_decisions, pick_side, Side};
pub use messages::{
    ChangeNotice, ConflictBody, PushOutcome, SaveSnapshotRequest, SaveSnapshotResponse,
};
pub use snapshot::{RemoteRecord, Snapshot, SnapshotPayload, SCHEMA_VERSION};
pub use timestamp::{now_iso, Timestamp};
