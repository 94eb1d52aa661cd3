//! Growth cap for the analyzed-articles domain.
//!
//! Items are grouped by analysis kind and `(sentence, context)`. Sentence
//! analyses keep the single most recently updated item per key; phrase
//! analyses keep the three most recent. Items of any other kind pass
//! through untouched. Surviving items keep their original order.

use crate::domain::DomainBlock;
use crate::timestamp::Timestamp;
use serde_json::Value;
use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

/// Field carrying the analysis list inside the articles block.
pub const ANALYZED_ARTICLES_FIELD: &str = "analyzedArticles";

/// How many items survive per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionPolicy {
    /// Items kept per key for sentence-level analyses.
    pub sentence_keep: usize,
    /// Items kept per key for phrase-level analyses.
    pub phrase_keep: usize,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            sentence_keep: 1,
            phrase_keep: 3,
        }
    }
}

impl CompactionPolicy {
    fn keep_for(&self, kind: &str) -> Option<usize> {
        match kind {
            "sentence" => Some(self.sentence_keep),
            "phrase" => Some(self.phrase_keep),
            _ => None,
        }
    }
}

fn text_field<'a>(item: &'a Value, name: &str) -> &'a str {
    item.get(name).and_then(Value::as_str).unwrap_or_default()
}

/// Compacts a list of analyzed-article items.
pub fn compact_analyzed_articles(items: Vec<Value>, policy: &CompactionPolicy) -> Vec<Value> {
    let mut groups: HashMap<(&str, &str, &str), Vec<usize>> = HashMap::new();
    for (index, item) in items.iter().enumerate() {
        let kind = text_field(item, "type");
        if policy.keep_for(kind).is_none() {
            continue;
        }
        let key = (kind, text_field(item, "sentence"), text_field(item, "context"));
        groups.entry(key).or_default().push(index);
    }

    let mut dropped = HashSet::new();
    for ((kind, _, _), mut indices) in groups {
        let keep = policy.keep_for(kind).unwrap_or(usize::MAX);
        if indices.len() <= keep {
            continue;
        }
        // Stable sort: equal markers keep their original relative order.
        indices.sort_by_key(|&i| {
            Reverse(
                items[i]
                    .get("updatedAt")
                    .and_then(Value::as_str)
                    .and_then(Timestamp::parse)
                    .map(|t| t.instant()),
            )
        });
        dropped.extend(indices.into_iter().skip(keep));
    }

    items
        .into_iter()
        .enumerate()
        .filter(|(i, _)| !dropped.contains(i))
        .map(|(_, item)| item)
        .collect()
}

/// Compacts the `analyzedArticles` list of an articles block in place.
pub fn compact_articles_block(block: &mut DomainBlock, policy: &CompactionPolicy) {
    if let Some(Value::Array(items)) = block.fields.get_mut(ANALYZED_ARTICLES_FIELD) {
        let taken = std::mem::take(items);
        *items = compact_analyzed_articles(taken, policy);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(kind: &str, sentence: &str, context: &str, updated_at: &str, id: u32) -> Value {
        json!({
            "id": id,
            "type": kind,
            "sentence": sentence,
            "context": context,
            "updatedAt": updated_at,
        })
    }

    fn ids(items: &[Value]) -> Vec<u64> {
        items.iter().map(|i| i["id"].as_u64().unwrap()).collect()
    }

    #[test]
    fn sentence_keeps_latest_per_key() {
        let items = vec![
            item("sentence", "s1", "c1", "2024-01-01T00:00:00Z", 1),
            item("sentence", "s1", "c1", "2024-01-03T00:00:00Z", 2),
            item("sentence", "s1", "c1", "2024-01-02T00:00:00Z", 3),
            item("sentence", "s1", "c2", "2024-01-01T00:00:00Z", 4),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![2, 4]);
    }

    #[test]
    fn sub_millisecond_markers_decide_the_survivor() {
        let items = vec![
            item("sentence", "s1", "c1", "2024-01-01T00:00:00.000900Z", 1),
            item("sentence", "s1", "c1", "2024-01-01T00:00:00.000100Z", 2),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![1]);
    }

    #[test]
    fn phrase_keeps_three_latest_in_original_order() {
        let items = vec![
            item("phrase", "s", "c", "2024-01-01T00:00:00Z", 1),
            item("phrase", "s", "c", "2024-01-05T00:00:00Z", 2),
            item("phrase", "s", "c", "2024-01-02T00:00:00Z", 3),
            item("phrase", "s", "c", "2024-01-04T00:00:00Z", 4),
            item("phrase", "s", "c", "2024-01-03T00:00:00Z", 5),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![2, 4, 5]);
    }

    #[test]
    fn kinds_are_grouped_separately() {
        let items = vec![
            item("sentence", "s", "c", "2024-01-01T00:00:00Z", 1),
            item("phrase", "s", "c", "2024-01-01T00:00:00Z", 2),
            item("sentence", "s", "c", "2024-01-02T00:00:00Z", 3),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![2, 3]);
    }

    #[test]
    fn unknown_kinds_pass_through() {
        let items = vec![
            json!({"id": 1, "title": "raw article"}),
            json!({"id": 2, "title": "raw article"}),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[test]
    fn unmarked_items_lose_to_marked() {
        let items = vec![
            json!({"id": 1, "type": "sentence", "sentence": "s", "context": "c"}),
            item("sentence", "s", "c", "2020-01-01T00:00:00Z", 2),
        ];

        let out = compact_analyzed_articles(items, &CompactionPolicy::default());
        assert_eq!(ids(&out), vec![2]);
    }

    #[test]
    fn compacts_block_field() {
        let mut block = DomainBlock::from_value(json!({
            "updatedAt": "2024-01-01T00:00:00Z",
            "analyzedArticles": [
                item("sentence", "s", "c", "2024-01-01T00:00:00Z", 1),
                item("sentence", "s", "c", "2024-01-02T00:00:00Z", 2),
            ],
        }))
        .unwrap();

        compact_articles_block(&mut block, &CompactionPolicy::default());
        let items = block.field(ANALYZED_ARTICLES_FIELD).unwrap().as_array().unwrap();
        assert_eq!(ids(items), vec![2]);
        assert_eq!(block.updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    }
}
