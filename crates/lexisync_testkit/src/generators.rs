//! Property-based test generators using proptest.
//!
//! Provides strategies for markers, domain blocks and payloads. Generated
//! markers always parse; blocks are always JSON objects.

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use lexisync_protocol::{Domain, DomainBlock, SnapshotPayload};
use proptest::prelude::*;
use serde_json::{Map, Value};

const MIN_MILLIS: i64 = 1_577_836_800_000; // 2020-01-01
const MAX_MILLIS: i64 = 1_893_456_000_000; // 2030-01-01

/// Formats epoch millis as an RFC 3339 marker in the given offset.
pub fn marker_at(millis: i64, offset_minutes: i32) -> String {
    let utc = DateTime::<Utc>::from_timestamp_millis(millis).expect("millis in range");
    match FixedOffset::east_opt(offset_minutes * 60) {
        Some(offset) if offset_minutes != 0 => utc
            .with_timezone(&offset)
            .to_rfc3339_opts(SecondsFormat::Millis, false),
        _ => utc.to_rfc3339_opts(SecondsFormat::Millis, true),
    }
}

/// Strategy for epoch millis between 2020 and 2030.
pub fn millis_strategy() -> impl Strategy<Value = i64> {
    MIN_MILLIS..MAX_MILLIS
}

/// Strategy for valid markers, in `Z` or with a whole-hour offset.
pub fn marker_strategy() -> impl Strategy<Value = String> {
    (millis_strategy(), -12i32..=12).prop_map(|(millis, hours)| marker_at(millis, hours * 60))
}

/// Strategy for strings that never parse as a marker.
pub fn bad_marker_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("yesterday".to_string()),
        Just("2024-13-45T99:00:00Z".to_string()),
        prop::string::string_regex("[a-z]{1,12}").expect("Invalid regex"),
    ]
}

/// Strategy for any domain.
pub fn domain_strategy() -> impl Strategy<Value = Domain> {
    prop::sample::select(Domain::ALL.to_vec())
}

fn field_value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(Value::from),
    ]
}

/// Strategy for block fields. Never produces an `updatedAt` key.
pub fn fields_strategy() -> impl Strategy<Value = Map<String, Value>> {
    prop::collection::btree_map(
        prop::string::string_regex("[a-z]{1,8}").expect("Invalid regex"),
        field_value_strategy(),
        0..5,
    )
    .prop_map(|fields| fields.into_iter().collect())
}

/// Strategy for blocks that carry a valid marker.
pub fn stamped_block_strategy() -> impl Strategy<Value = DomainBlock> {
    (fields_strategy(), marker_strategy())
        .prop_map(|(fields, marker)| DomainBlock::new(fields).with_updated_at(marker))
}

/// Strategy for blocks whose marker may be valid, unusable or absent.
pub fn block_strategy() -> impl Strategy<Value = DomainBlock> {
    (
        fields_strategy(),
        prop_oneof![
            3 => marker_strategy().prop_map(Some),
            1 => bad_marker_strategy().prop_map(Some),
            1 => Just(None),
        ],
    )
        .prop_map(|(fields, marker)| {
            let mut block = DomainBlock::new(fields);
            block.updated_at = marker;
            block
        })
}

/// Strategy for payloads where each domain is independently present.
pub fn payload_strategy() -> impl Strategy<Value = SnapshotPayload> {
    prop::collection::vec(prop::option::of(block_strategy()), Domain::ALL.len()).prop_map(
        |blocks| {
            Domain::ALL
                .into_iter()
                .zip(blocks)
                .filter_map(|(domain, block)| block.map(|b| (domain, b)))
                .collect()
        },
    )
}

/// Strategy for analyzed-article items of every kind.
pub fn analyzed_item_strategy() -> impl Strategy<Value = Value> {
    (
        prop::sample::select(vec!["sentence", "phrase", "word"]),
        prop::sample::select(vec!["s1", "s2", "s3"]),
        prop::sample::select(vec!["c1", "c2"]),
        marker_strategy(),
    )
        .prop_map(|(kind, sentence, context, marker)| {
            crate::fixtures::analyzed_item(kind, sentence, context, &marker)
        })
}

/// Configuration for property-based tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexisync_protocol::Timestamp;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn markers_parse_to_their_instant(millis in millis_strategy(), hours in -12i32..=12) {
            let marker = marker_at(millis, hours * 60);
            let parsed = Timestamp::parse(&marker);
            prop_assert_eq!(parsed.map(|t| t.millis()), Some(millis));
        }

        #[test]
        fn bad_markers_never_parse(raw in bad_marker_strategy()) {
            prop_assert!(Timestamp::parse(&raw).is_none());
        }

        #[test]
        fn stamped_blocks_have_timestamps(block in stamped_block_strategy()) {
            prop_assert!(block.timestamp().is_some());
            prop_assert!(!block.fields.contains_key("updatedAt"));
        }
    }
}
