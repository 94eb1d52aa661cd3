//! Remote protocol messages.
//!
//! - `get_snapshot() -> RemoteRecord | null`
//! - `save_snapshot(expected_version, payload) -> SaveSnapshotResponse`, or a
//!   conflict carrying `ConflictBody`
//! - change notices keyed by user id, carrying no payload

use crate::snapshot::SnapshotPayload;
use serde::{Deserialize, Serialize};

/// Body of a `save_snapshot` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSnapshotRequest {
    /// Version observed by the caller's own pull. `0` when no record exists.
    pub expected_version: u64,
    /// Payload to store.
    pub payload: SnapshotPayload,
}

impl SaveSnapshotRequest {
    /// Creates a save request.
    pub fn new(expected_version: u64, payload: SnapshotPayload) -> Self {
        Self {
            expected_version,
            payload,
        }
    }
}

/// Successful `save_snapshot` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSnapshotResponse {
    /// The new record version.
    pub version: u64,
    /// When the record was written.
    pub updated_at: String,
}

/// Body returned alongside a version-conflict status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictBody {
    /// Machine-readable code, always `"version_conflict"`.
    pub code: String,
    /// The record's version at the time of the rejected save.
    pub current_version: u64,
}

impl ConflictBody {
    /// Code carried by every conflict body.
    pub const CODE: &'static str = "version_conflict";

    /// Creates a conflict body.
    pub fn new(current_version: u64) -> Self {
        Self {
            code: Self::CODE.to_string(),
            current_version,
        }
    }
}

/// Outcome of a compare-and-swap push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    /// The push was accepted and the record now has `version`.
    Accepted {
        /// New record version.
        version: u64,
        /// When the record was written.
        updated_at: String,
    },
    /// The caller's expected version was stale; nothing was written.
    Conflict,
}

impl PushOutcome {
    /// Returns true for a conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PushOutcome::Conflict)
    }
}

impl From<SaveSnapshotResponse> for PushOutcome {
    fn from(response: SaveSnapshotResponse) -> Self {
        PushOutcome::Accepted {
            version: response.version,
            updated_at: response.updated_at,
        }
    }
}

/// "Something changed" for one user. Only a trigger to re-pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotice {
    /// User whose record changed.
    pub user_id: String,
    /// Version after the change, when known.
    pub version: Option<u64>,
}

impl ChangeNotice {
    /// Creates a change notice.
    pub fn new(user_id: impl Into<String>, version: Option<u64>) -> Self {
        Self {
            user_id: user_id.into(),
            version,
        }
    }
}
