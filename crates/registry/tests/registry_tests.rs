//! Registry store integration tests, run against SQLite and (when Docker is available) PostgreSQL.

mod common;

use common::{TestRegistry, at_ms, run_registry_test_both};
use std::sync::Arc;
use tally_core::ScanResult;
use tally_registry::{IngestBatch, RegistryError, RegistryStore};

fn batch(id: &str, millis: i64, codes: &[&str]) -> IngestBatch {
    IngestBatch {
        batch_id: id.to_string(),
        ingested_at: at_ms(millis),
        codes: codes.iter().map(|c| c.to_string()).collect(),
    }
}

#[tokio::test]
async fn test_upsert_entry_creates_then_bumps_upload_count() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        let created = store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();
        assert_eq!(created.total_upload_count, 1);
        assert_eq!(created.total_scan_count, 0);
        assert!(created.last_scan_time.is_none());
        assert_eq!(created.first_seen_time, at_ms(0));

        let bumped = store.upsert_entry("A", "b2", at_ms(5_000)).await.unwrap();
        assert_eq!(bumped.total_upload_count, 2);
        assert_eq!(bumped.first_seen_time, at_ms(0));
        assert_eq!(bumped.last_seen_time, at_ms(5_000));

        let history = store.list_ingestions("A").await.unwrap();
        let batches: Vec<_> = history.iter().map(|r| r.batch_id.as_str()).collect();
        assert_eq!(batches, vec!["b1", "b2"]);
        assert_eq!(store.count_codes().await.unwrap(), 1);
    })
    .await;
}

#[tokio::test]
async fn test_bulk_upsert_counts_repeats_within_batch() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store
            .bulk_upsert(&batch("b1", 0, &["A", "A", "B"]))
            .await
            .unwrap();

        let a = store.find_by_code("A").await.unwrap().unwrap();
        let b = store.find_by_code("B").await.unwrap().unwrap();
        assert_eq!(a.total_upload_count, 2);
        assert_eq!(b.total_upload_count, 1);
        assert_eq!(store.count_codes().await.unwrap(), 2);
        assert_eq!(store.list_ingestions("A").await.unwrap().len(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_find_codes_batch_returns_only_known() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.bulk_upsert(&batch("b1", 0, &["A", "B"])).await.unwrap();

        let found = store
            .find_codes_batch(&["A".to_string(), "Z".to_string(), "B".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.contains_key("A"));
        assert!(found.contains_key("B"));
        assert!(store.find_codes_batch(&[]).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_increment_counter_appends_success_event() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();

        assert_eq!(
            store
                .increment_counter_and_append_history("A", at_ms(1_000))
                .await
                .unwrap(),
            Some(1)
        );
        assert_eq!(
            store
                .increment_counter_and_append_history("A", at_ms(3_000))
                .await
                .unwrap(),
            Some(2)
        );

        let row = store.find_by_code("A").await.unwrap().unwrap();
        assert_eq!(row.total_scan_count, 2);
        assert_eq!(row.last_scan_time, Some(at_ms(3_000)));

        let events = store.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.result().unwrap() == ScanResult::Success));
        assert_eq!(events[0].occurred_at, at_ms(3_000));
    })
    .await;
}

#[tokio::test]
async fn test_increment_counter_missing_code_writes_nothing() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        let result = store
            .increment_counter_and_append_history("missing", at_ms(0))
            .await
            .unwrap();
        assert_eq!(result, None);
        assert!(store.recent_events(10).await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_recent_success_exists_window_is_exclusive() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();
        store
            .increment_counter_and_append_history("A", at_ms(10_000))
            .await
            .unwrap();

        // Scan at +0.1s: event lies inside (now - 1s, now + 1s).
        assert!(
            store
                .recent_success_exists("A", at_ms(9_100), at_ms(11_100))
                .await
                .unwrap()
        );
        // Scan at +1.0s: the event sits exactly on the lower bound.
        assert!(
            !store
                .recent_success_exists("A", at_ms(10_000), at_ms(12_000))
                .await
                .unwrap()
        );
        // Unknown events never count as successes.
        store
            .append_scan_event("B", ScanResult::Unknown, at_ms(10_000))
            .await
            .unwrap();
        assert!(
            !store
                .recent_success_exists("B", at_ms(9_500), at_ms(10_500))
                .await
                .unwrap()
        );
    })
    .await;
}

#[tokio::test]
async fn test_recent_success_exists_across_offsets() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();
        store
            .increment_counter_and_append_history("A", at_ms(10_000))
            .await
            .unwrap();

        let utc_since = at_ms(9_500).to_offset(time::UtcOffset::UTC);
        let utc_until = at_ms(10_500).to_offset(time::UtcOffset::UTC);
        assert!(
            store
                .recent_success_exists("A", utc_since, utc_until)
                .await
                .unwrap()
        );
    })
    .await;
}

#[tokio::test]
async fn test_delete_entry_and_not_found() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();

        store.delete_entry("A").await.unwrap();
        assert!(store.find_by_code("A").await.unwrap().is_none());

        let err = store.delete_entry("A").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_delete_all_wipes_every_table() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.bulk_upsert(&batch("b1", 0, &["A", "B"])).await.unwrap();
        store
            .increment_counter_and_append_history("A", at_ms(1_000))
            .await
            .unwrap();
        store
            .append_scan_event("X", ScanResult::Unknown, at_ms(2_000))
            .await
            .unwrap();

        let cleared = store.delete_all().await.unwrap();
        assert_eq!(cleared.codes, 2);
        assert_eq!(cleared.ingestion_records, 2);
        assert_eq!(cleared.scan_events, 2);

        assert_eq!(store.count_codes().await.unwrap(), 0);
        assert!(store.list_codes().await.unwrap().is_empty());
        assert!(store.recent_events(10).await.unwrap().is_empty());
        assert!(store.list_ingestions("A").await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_stats_counts_distinct_scanned_codes() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store
            .bulk_upsert(&batch("b1", 0, &["A", "B", "C"]))
            .await
            .unwrap();
        store
            .increment_counter_and_append_history("A", at_ms(1_000))
            .await
            .unwrap();
        store
            .increment_counter_and_append_history("A", at_ms(5_000))
            .await
            .unwrap();
        store
            .increment_counter_and_append_history("B", at_ms(5_000))
            .await
            .unwrap();
        store
            .append_scan_event("nope", ScanResult::Unknown, at_ms(6_000))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_codes, 3);
        assert_eq!(stats.scanned_codes, 2);
        assert_eq!(stats.successful_scans, 3);
        assert_eq!(stats.failed_scans, 1);
    })
    .await;
}

#[tokio::test]
async fn test_list_entries_newest_first_and_between() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        store.upsert_entry("old", "b1", at_ms(0)).await.unwrap();
        store.upsert_entry("mid", "b2", at_ms(60_000)).await.unwrap();
        store.upsert_entry("new", "b3", at_ms(120_000)).await.unwrap();

        let all = store.list_entries(500).await.unwrap();
        let codes: Vec<_> = all.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["new", "mid", "old"]);

        let limited = store.list_entries(2).await.unwrap();
        assert_eq!(limited.len(), 2);

        let window = store
            .list_entries_between(Some(at_ms(30_000)), Some(at_ms(120_000)))
            .await
            .unwrap();
        let codes: Vec<_> = window.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["new", "mid"]);

        let open_start = store
            .list_entries_between(None, Some(at_ms(60_000)))
            .await
            .unwrap();
        assert_eq!(open_start.len(), 2);

        let unbounded = store.list_entries_between(None, None).await.unwrap();
        assert_eq!(unbounded.len(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_recent_events_limit_and_order() {
    run_registry_test_both(|store: Arc<dyn RegistryStore>| async move {
        for i in 0..15 {
            store
                .append_scan_event(&format!("C{i}"), ScanResult::Unknown, at_ms(i * 1_000))
                .await
                .unwrap();
        }

        let events = store.recent_events(10).await.unwrap();
        assert_eq!(events.len(), 10);
        assert_eq!(events[0].code, "C14");
        assert_eq!(events[9].code, "C5");
    })
    .await;
}

#[tokio::test]
async fn test_sqlite_concurrent_increments_do_not_lose_updates() {
    let registry = TestRegistry::new().await.unwrap();
    let store = registry.store();
    store.upsert_entry("A", "b1", at_ms(0)).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .increment_counter_and_append_history("A", at_ms(1_000 + i * 2_000))
                .await
                .unwrap()
        }));
    }

    let mut counts = Vec::new();
    for handle in handles {
        counts.push(handle.await.unwrap().unwrap());
    }
    counts.sort_unstable();
    assert_eq!(counts, (1..=20).collect::<Vec<i64>>());

    let row = store.find_by_code("A").await.unwrap().unwrap();
    assert_eq!(row.total_scan_count, 20);
    assert_eq!(store.stats().await.unwrap().successful_scans, 20);
}

#[tokio::test]
async fn test_sqlite_raw_timestamps_use_configured_offset() {
    let registry = TestRegistry::new().await.unwrap();
    registry
        .store()
        .upsert_entry("A", "b1", at_ms(0))
        .await
        .unwrap();

    let raw: String = sqlx::query_scalar("SELECT first_seen_time FROM codes WHERE code = 'A'")
        .fetch_one(registry.pool())
        .await
        .unwrap();
    assert!(raw.ends_with("+08:00"), "unexpected timestamp text: {raw}");
}
