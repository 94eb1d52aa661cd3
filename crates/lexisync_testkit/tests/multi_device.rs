//! Multi-device sync scenarios against one in-process server.

use lexisync_engine::{RemoteStore, SyncAttempt, SyncError, SyncOutcome};
use lexisync_protocol::{Domain, ANALYZED_ARTICLES_FIELD};
use lexisync_testkit::prelude::*;
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn first_sync_creates_version_one_then_idles() {
    init_tracing();
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));

    let first = a.sync_ok().await;
    assert_eq!(first.outcome, SyncOutcome::Pushed);
    assert_eq!(first.remote_version, 1);

    let second = a.sync_ok().await;
    assert_eq!(second.outcome, SyncOutcome::UpToDate);
    assert_eq!(second.remote_version, 1);
    assert_eq!(cluster.version("alice"), 1);
}

#[tokio::test]
async fn devices_converge_on_disjoint_domains() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    a.sync_ok().await;

    b.edit_at(Domain::DictationSettings, settings_block(1.5), &ts(2));
    let report = b.sync_ok().await;
    assert_eq!(report.outcome, SyncOutcome::Pushed);
    assert_eq!(report.remote_version, 2);
    assert_eq!(book_ids(&b.block(Domain::Vocabulary).unwrap()), vec!["A"]);

    let report = a.sync_ok().await;
    assert_eq!(report.outcome, SyncOutcome::AppliedRemote);
    assert_eq!(report.applied, vec![Domain::DictationSettings]);
    assert_eq!(cluster.version("alice"), 2);

    for domain in [Domain::Vocabulary, Domain::DictationSettings] {
        assert_eq!(a.marker(domain), b.marker(domain), "{domain}");
    }
    assert_eq!(
        a.block(Domain::DictationSettings).unwrap().fields,
        b.block(Domain::DictationSettings).unwrap().fields
    );
}

#[tokio::test]
async fn newer_domain_overwrites_older_wholesale() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A", "Shared"]), &ts(1));
    a.sync_ok().await;

    b.edit_at(Domain::Vocabulary, vocabulary_block(&["B"]), &ts(2));
    b.sync_ok().await;

    a.sync_ok().await;
    assert_eq!(book_ids(&a.block(Domain::Vocabulary).unwrap()), vec!["B"]);
    assert_eq!(a.marker(Domain::Vocabulary), Some(ts(2)));
}

#[tokio::test]
async fn older_local_edit_is_discarded_without_push() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    a.sync_ok().await;

    b.edit_at(Domain::Vocabulary, vocabulary_block(&["Stale"]), &ts(0));
    let report = b.sync_ok().await;

    assert_eq!(report.outcome, SyncOutcome::AppliedRemote);
    assert_eq!(cluster.version("alice"), 1);
    assert_eq!(book_ids(&b.block(Domain::Vocabulary).unwrap()), vec!["A"]);
}

#[tokio::test]
async fn unmarked_local_domain_never_clobbers_remote() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    a.sync_ok().await;

    // Local data with no marker, as on a freshly installed device.
    b.local
        .seed(Domain::Vocabulary, vocabulary_block(&["Default"]), None);
    let report = b.sync_ok().await;

    assert_eq!(report.outcome, SyncOutcome::RestoredFromRemote);
    assert_eq!(cluster.version("alice"), 1);
    assert_eq!(book_ids(&b.block(Domain::Vocabulary).unwrap()), vec!["A"]);
    assert_eq!(b.marker(Domain::Vocabulary), Some(ts(1)));
}

#[tokio::test]
async fn unmarked_settings_are_stamped_and_pushed() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    a.local
        .seed(Domain::DictationSettings, settings_block(0.8), None);

    let report = a.sync_ok().await;
    assert_eq!(report.outcome, SyncOutcome::Pushed);

    let remote = cluster.payload("alice").unwrap();
    let pushed = remote.get(Domain::DictationSettings).unwrap();
    assert!(pushed.timestamp().is_some());
    assert_eq!(a.marker(Domain::DictationSettings), pushed.updated_at.clone());
}

#[tokio::test]
async fn analyzed_articles_are_compacted_on_the_wire() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    a.edit_at(
        Domain::Articles,
        articles_block(vec![
            analyzed_item("sentence", "s1", "c1", &ts(1)),
            analyzed_item("sentence", "s1", "c1", &ts(3)),
            analyzed_item("sentence", "s1", "c1", &ts(2)),
            analyzed_item("word", "s1", "c1", &ts(1)),
        ]),
        &ts(4),
    );
    a.sync_ok().await;

    let remote = cluster.payload("alice").unwrap();
    let items = remote
        .get(Domain::Articles)
        .and_then(|b| b.field(ANALYZED_ARTICLES_FIELD))
        .and_then(Value::as_array)
        .cloned()
        .unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(items[0]["updatedAt"], Value::from(ts(3)));
    assert_eq!(items[1]["type"], "word");
}

#[tokio::test]
async fn other_devices_hear_about_pushes() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");
    let mut notices = b.remote.subscribe("alice");

    a.edit_at(Domain::Qa, qa_block(&["q1"]), &ts(1));
    a.sync_ok().await;

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.user_id, "alice");
    assert_eq!(notice.version, Some(1));
}

#[tokio::test]
async fn users_never_see_each_other() {
    let cluster = SyncCluster::new();
    let alice = cluster.device("alice");
    let bob = cluster.device("bob");

    alice.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    alice.sync_ok().await;

    let report = bob.sync_ok().await;
    assert_eq!(report.outcome, SyncOutcome::UpToDate);
    assert!(bob.block(Domain::Vocabulary).is_none());
    assert_eq!(cluster.version("bob"), 0);
}

#[tokio::test]
async fn signed_out_device_does_nothing() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    a.edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    a.session.sign_out();

    assert!(matches!(a.sync().await, Err(SyncError::NotAuthenticated)));
    assert_eq!(cluster.version("alice"), 0);
}

#[tokio::test(start_paused = true)]
async fn three_devices_contend_for_one_version() {
    init_tracing();
    let cluster = SyncCluster::new();
    let devices = [
        cluster.device("alice"),
        cluster.device("alice"),
        cluster.device("alice"),
    ];
    devices[0].edit_at(Domain::Vocabulary, vocabulary_block(&["A"]), &ts(1));
    devices[1].edit_at(Domain::Qa, qa_block(&["q1"]), &ts(1));
    devices[2].edit_at(Domain::Assistant, assistant_block(2), &ts(1));
    for device in &devices {
        device.remote.set_latency(Duration::from_millis(50));
    }

    let (r0, r1, r2) = tokio::join!(devices[0].sync(), devices[1].sync(), devices[2].sync());
    let results = [r0, r1, r2];

    // Round one: one push wins. Round two: one of the two retries wins.
    // The last device exhausts its single retry.
    let pushed: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, Ok(SyncAttempt::Completed(_))))
        .map(|(i, _)| i)
        .collect();
    let conflicted: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| matches!(r, Err(SyncError::Conflict { .. })))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(pushed.len(), 2);
    assert_eq!(conflicted.len(), 1);
    assert_eq!(cluster.version("alice"), 2);

    let retries: Vec<u32> = results
        .iter()
        .filter_map(|r| r.as_ref().ok().and_then(|a| a.report()))
        .map(|report| report.conflict_retries)
        .collect();
    assert!(retries.contains(&0));
    assert!(retries.contains(&1));

    // The loser wrote nothing locally and succeeds on the next attempt.
    let loser = &devices[conflicted[0]];
    let report = loser.sync_ok().await;
    assert_eq!(report.outcome, SyncOutcome::Pushed);
    assert_eq!(report.remote_version, 3);

    let remote = cluster.payload("alice").unwrap();
    assert_eq!(
        remote.domains(),
        vec![Domain::Vocabulary, Domain::Qa, Domain::Assistant]
    );
}

#[tokio::test]
async fn backup_ring_follows_syncs_and_restore_wins() {
    let cluster = SyncCluster::new();
    let a = cluster.device("alice");
    let b = cluster.device("alice");

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["Good"]), &ts(1));
    a.sync_ok().await;
    let good = a.backups.list_backups().unwrap()[0].id;

    a.edit_at(Domain::Vocabulary, vocabulary_block(&["Bad"]), &ts(2));
    a.sync_ok().await;
    assert_eq!(a.backups.list_backups().unwrap().len(), 2);

    a.backups.restore(good).unwrap();
    assert_eq!(book_ids(&a.block(Domain::Vocabulary).unwrap()), vec!["Good"]);
    assert_eq!(cluster.version("alice"), 2);

    a.sync_ok().await;
    b.sync_ok().await;
    assert_eq!(book_ids(&b.block(Domain::Vocabulary).unwrap()), vec!["Good"]);
}
