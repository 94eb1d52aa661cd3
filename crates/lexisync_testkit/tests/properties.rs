//! Property tests for merge, apply and compaction.

use lexisync_engine::{LocalStore, MemoryLocalStore, SnapshotApplier};
use lexisync_protocol::{
    compact_analyzed_articles, lww_merge, CompactionPolicy, Domain, SnapshotPayload, Timestamp,
};
use lexisync_testkit::prelude::*;
use proptest::prelude::*;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

proptest! {
    #![proptest_config(PropTestConfig::default().to_proptest_config())]

    #[test]
    fn merge_takes_whole_blocks_from_one_side(
        local in payload_strategy(),
        remote in payload_strategy(),
    ) {
        let merged = lww_merge(&local, &remote);
        for domain in Domain::ALL {
            let expected_present = local.get(domain).is_some() || remote.get(domain).is_some();
            prop_assert_eq!(merged.get(domain).is_some(), expected_present);
            if let Some(block) = merged.get(domain) {
                prop_assert!(
                    Some(block) == local.get(domain) || Some(block) == remote.get(domain)
                );
            }
        }
    }

    #[test]
    fn merging_again_with_the_same_remote_changes_nothing(
        local in payload_strategy(),
        remote in payload_strategy(),
    ) {
        let merged = lww_merge(&local, &remote);
        prop_assert_eq!(lww_merge(&merged, &remote), merged);
    }

    #[test]
    fn remote_wins_unless_local_is_strictly_newer(
        local in stamped_block_strategy(),
        remote in stamped_block_strategy(),
    ) {
        let local_ts = local.timestamp().unwrap();
        let remote_ts = remote.timestamp().unwrap();
        let merged = lww_merge(
            &SnapshotPayload::new().with(Domain::Qa, local.clone()),
            &SnapshotPayload::new().with(Domain::Qa, remote.clone()),
        );
        let expected = if local_ts > remote_ts { &local } else { &remote };
        prop_assert_eq!(merged.get(Domain::Qa), Some(expected));
    }

    #[test]
    fn applying_twice_is_a_no_op(payload in payload_strategy()) {
        let store = Arc::new(MemoryLocalStore::new());
        let applier = SnapshotApplier::new(Arc::clone(&store));

        let first = applier.apply(&payload).unwrap();
        let after_first = store.state();
        let second = applier.apply(&payload).unwrap();

        prop_assert!(second.is_empty());
        prop_assert_eq!(store.state(), after_first);
        for domain in first {
            prop_assert_eq!(
                store.marker(domain).unwrap(),
                payload.get(domain).and_then(|b| b.updated_at.clone())
            );
        }
    }

    #[test]
    fn unstamped_blocks_are_never_applied(payload in payload_strategy()) {
        let store = Arc::new(MemoryLocalStore::new());
        let applied = SnapshotApplier::new(Arc::clone(&store)).apply(&payload).unwrap();

        for domain in Domain::ALL {
            let usable = payload.get(domain).and_then(|b| b.timestamp()).is_some();
            prop_assert_eq!(applied.contains(&domain), usable);
        }
    }

    #[test]
    fn compaction_caps_each_key(items in prop::collection::vec(analyzed_item_strategy(), 0..40)) {
        let policy = CompactionPolicy::default();
        let words_before = items.iter().filter(|i| i["type"] == "word").count();
        let compacted = compact_analyzed_articles(items.clone(), &policy);

        let mut per_key: HashMap<(String, String, String), usize> = HashMap::new();
        for item in &compacted {
            let key = (
                item["type"].as_str().unwrap_or_default().to_string(),
                item["sentence"].as_str().unwrap_or_default().to_string(),
                item["context"].as_str().unwrap_or_default().to_string(),
            );
            *per_key.entry(key).or_default() += 1;
        }
        for ((kind, _, _), count) in &per_key {
            match kind.as_str() {
                "sentence" => prop_assert!(*count <= policy.sentence_keep),
                "phrase" => prop_assert!(*count <= policy.phrase_keep),
                _ => {}
            }
        }
        prop_assert_eq!(
            compacted.iter().filter(|i| i["type"] == "word").count(),
            words_before
        );
        prop_assert!(compacted.iter().all(|i| items.contains(i)));
    }

    #[test]
    fn compaction_keeps_the_newest_sentence(
        items in prop::collection::vec(analyzed_item_strategy(), 1..20),
    ) {
        let compacted = compact_analyzed_articles(items.clone(), &CompactionPolicy::default());
        let millis = |item: &Value| {
            item["updatedAt"]
                .as_str()
                .and_then(Timestamp::parse)
                .map(|t| t.millis())
                .unwrap_or(i64::MIN)
        };

        for kept in compacted.iter().filter(|i| i["type"] == "sentence") {
            let newest = items
                .iter()
                .filter(|i| {
                    i["type"] == "sentence"
                        && i["sentence"] == kept["sentence"]
                        && i["context"] == kept["context"]
                })
                .map(|i| millis(i))
                .max()
                .unwrap();
            prop_assert_eq!(millis(kept), newest);
        }
    }
}
