//! Snapshots, payloads and the remote record.
//!
//! ## Wire shape
//!
//! ```text
//! {
//!   userSettings: { dictation: { ...fields, updatedAt } },
//!   vocabulary:   { updatedAt, books: [...], activeBookId },
//!   articles:     { updatedAt, analyzedArticles: [...] },
//!   qa:           { updatedAt, manifest: [...], sets: { <id>: QASet } },
//!   assistant:    { updatedAt, conversations: [...] }
//! }
//! ```
//!
//! Absent domains are omitted rather than written as `null`. Keys this
//! client does not know, at the top level or beside `dictation` inside
//! `userSettings`, are carried through unchanged so that a newer client's
//! data survives a push from an older one.

use crate::domain::{Domain, DomainBlock};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::btree_map;
use std::collections::BTreeMap;

/// Current snapshot schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// A mapping from domain to block.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SnapshotPayload {
    blocks: BTreeMap<Domain, DomainBlock>,
    unknown: Map<String, Value>,
    unknown_settings: Map<String, Value>,
}

impl SnapshotPayload {
    /// Creates an empty payload.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the block for a domain.
    pub fn get(&self, domain: Domain) -> Option<&DomainBlock> {
        self.blocks.get(&domain)
    }

    /// Inserts or replaces a domain block.
    pub fn insert(&mut self, domain: Domain, block: DomainBlock) -> Option<DomainBlock> {
        self.blocks.insert(domain, block)
    }

    /// Removes a domain block.
    pub fn remove(&mut self, domain: Domain) -> Option<DomainBlock> {
        self.blocks.remove(&domain)
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, domain: Domain, block: DomainBlock) -> Self {
        self.blocks.insert(domain, block);
        self
    }

    /// Iterates over present domains in payload order.
    pub fn iter(&self) -> btree_map::Iter<'_, Domain, DomainBlock> {
        self.blocks.iter()
    }

    /// Present domains in payload order.
    pub fn domains(&self) -> Vec<Domain> {
        self.blocks.keys().copied().collect()
    }

    /// Number of present domains.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Returns true if no domain is present.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Top-level keys that are not a known domain.
    pub fn unknown(&self) -> &Map<String, Value> {
        &self.unknown
    }

    /// Keys inside `userSettings` other than `dictation`.
    pub fn unknown_settings(&self) -> &Map<String, Value> {
        &self.unknown_settings
    }

    /// Replaces this payload's unknown keys with `other`'s.
    pub fn adopt_unknown(&mut self, other: &SnapshotPayload) {
        self.unknown = other.unknown.clone();
        self.unknown_settings = other.unknown_settings.clone();
    }

    /// Decodes a payload from a JSON value.
    pub fn from_json(value: Value) -> ProtocolResult<Self> {
        if !value.is_object() {
            return Err(ProtocolError::invalid_structure(
                "snapshot payload must be an object",
            ));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Encodes the payload as a JSON value.
    pub fn to_json(&self) -> ProtocolResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

impl<'a> IntoIterator for &'a SnapshotPayload {
    type Item = (&'a Domain, &'a DomainBlock);
    type IntoIter = btree_map::Iter<'a, Domain, DomainBlock>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

impl FromIterator<(Domain, DomainBlock)> for SnapshotPayload {
    fn from_iter<I: IntoIterator<Item = (Domain, DomainBlock)>>(iter: I) -> Self {
        Self {
            blocks: iter.into_iter().collect(),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePayloadRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    user_settings: Option<WireUserSettingsRef<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vocabulary: Option<&'a DomainBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    articles: Option<&'a DomainBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    qa: Option<&'a DomainBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    assistant: Option<&'a DomainBlock>,
    #[serde(flatten)]
    unknown: &'a Map<String, Value>,
}

#[derive(Serialize)]
struct WireUserSettingsRef<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    dictation: Option<&'a DomainBlock>,
    #[serde(flatten)]
    unknown: &'a Map<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct WirePayload {
    #[serde(default)]
    user_settings: Option<WireUserSettings>,
    #[serde(default)]
    vocabulary: Option<DomainBlock>,
    #[serde(default)]
    articles: Option<DomainBlock>,
    #[serde(default)]
    qa: Option<DomainBlock>,
    #[serde(default)]
    assistant: Option<DomainBlock>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

#[derive(Deserialize, Default)]
struct WireUserSettings {
    #[serde(default)]
    dictation: Option<DomainBlock>,
    #[serde(flatten)]
    unknown: Map<String, Value>,
}

impl Serialize for SnapshotPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let dictation = self.get(Domain::DictationSettings);
        let user_settings = (dictation.is_some() || !self.unknown_settings.is_empty()).then(|| {
            WireUserSettingsRef {
                dictation,
                unknown: &self.unknown_settings,
            }
        });
        let wire = WirePayloadRef {
            user_settings,
            vocabulary: self.get(Domain::Vocabulary),
            articles: self.get(Domain::Articles),
            qa: self.get(Domain::Qa),
            assistant: self.get(Domain::Assistant),
            unknown: &self.unknown,
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SnapshotPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WirePayload::deserialize(deserializer)?;
        let settings = wire.user_settings.unwrap_or_default();
        let entries = [
            (Domain::DictationSettings, settings.dictation),
            (Domain::Vocabulary, wire.vocabulary),
            (Domain::Articles, wire.articles),
            (Domain::Qa, wire.qa),
            (Domain::Assistant, wire.assistant),
        ];
        let mut payload: SnapshotPayload = entries
            .into_iter()
            .filter_map(|(domain, block)| block.map(|b| (domain, b)))
            .collect();
        payload.unknown = wire.unknown;
        payload.unknown_settings = settings.unknown;
        Ok(payload)
    }
}

/// The full exported state of one user's data.
///
/// Snapshots are ephemeral: one is rebuilt for every sync attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Schema version of the payload.
    pub schema_version: u32,
    /// When the snapshot was built.
    pub updated_at: String,
    /// Domain blocks.
    pub payload: SnapshotPayload,
}

impl Snapshot {
    /// Creates a snapshot at the current schema version.
    pub fn new(updated_at: impl Into<String>, payload: SnapshotPayload) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            updated_at: updated_at.into(),
            payload,
        }
    }

    /// Returns true when no domain carries local state.
    pub fn is_pristine(&self) -> bool {
        self.payload.is_empty()
    }
}

/// The shared record held by the remote store.
///
/// `version` strictly increases on every accepted save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Compare-and-swap version.
    pub version: u64,
    /// When the record was last written.
    pub updated_at: String,
    /// Snapshot payload.
    pub payload: SnapshotPayload,
}
