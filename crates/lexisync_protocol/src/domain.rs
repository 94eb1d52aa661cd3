//! Snapshot domains and their blocks.

use crate::timestamp::Timestamp;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// An independently timestamped section of a user's data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    /// Dictation settings, carried as `userSettings.dictation`.
    DictationSettings,
    /// Vocabulary books and the active book id.
    Vocabulary,
    /// Analyzed articles.
    Articles,
    /// Q&A manifest and sets.
    Qa,
    /// Assistant conversations.
    Assistant,
}

impl Domain {
    /// Every domain, in payload order.
    pub const ALL: [Domain; 5] = [
        Domain::DictationSettings,
        Domain::Vocabulary,
        Domain::Articles,
        Domain::Qa,
        Domain::Assistant,
    ];

    /// Stable name used for storage keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::DictationSettings => "dictationSettings",
            Domain::Vocabulary => "vocabulary",
            Domain::Articles => "articles",
            Domain::Qa => "qa",
            Domain::Assistant => "assistant",
        }
    }

    /// Looks a domain up by its stable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.as_str() == name)
    }

    /// Whether a snapshot may mint a fresh marker for local state that has none.
    ///
    /// Only the settings domain does; any other domain without a marker has
    /// no opinion and must never outrank a populated remote domain.
    pub fn mints_missing_marker(&self) -> bool {
        matches!(self, Domain::DictationSettings)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Domain-specific fields plus the `updatedAt` marker used for LWW.
///
/// The fields are opaque to the sync engine; they are produced and consumed
/// by the application features that own each domain.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomainBlock {
    /// Last-write marker, an RFC 3339 string.
    #[serde(
        rename = "updatedAt",
        default,
        deserialize_with = "lenient_marker",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<String>,
    /// Everything else in the block.
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

/// Non-string markers decode as absent instead of failing the block.
fn lenient_marker<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

impl DomainBlock {
    /// Creates a block without a marker.
    pub fn new(fields: Map<String, Value>) -> Self {
        Self {
            updated_at: None,
            fields,
        }
    }

    /// Builds a block from a JSON object. Non-object values yield `None`.
    ///
    /// A string `updatedAt` inside the object becomes the marker.
    pub fn from_value(value: Value) -> Option<Self> {
        let Value::Object(mut fields) = value else {
            return None;
        };
        let updated_at = match fields.remove("updatedAt") {
            Some(Value::String(s)) => Some(s),
            _ => None,
        };
        Some(Self { updated_at, fields })
    }

    /// Sets the marker.
    #[must_use]
    pub fn with_updated_at(mut self, updated_at: impl Into<String>) -> Self {
        self.updated_at = Some(updated_at.into());
        self
    }

    /// The parsed marker, or `None` when missing or unusable.
    pub fn timestamp(&self) -> Option<Timestamp> {
        self.updated_at.as_deref().and_then(Timestamp::parse)
    }

    /// Returns a field.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Sets a field.
    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Returns true if this block's marker is strictly newer than `other`'s.
    ///
    /// A block without a usable marker is never newer than anything.
    pub fn is_newer_than(&self, other: &DomainBlock) -> bool {
        match (self.timestamp(), other.timestamp()) {
            (Some(mine), Some(theirs)) => mine > theirs,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}
