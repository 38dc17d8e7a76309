//! Integration tests for the redb event store
//!
//! These run against a real database file in a temporary directory and
//! cover ordering, per-streamer isolation, reopen, and concurrent appends.

use std::sync::Arc;

use chatline_core::{Event, EventKind, EventStore};
use chatline_storage::{RedbEventStore, RedbStorageConfig, export_last};
use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

fn create_test_store() -> (RedbEventStore, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let store = RedbEventStore::open(RedbStorageConfig {
        db_path: temp_dir.path().join("events.redb"),
    })
    .unwrap();
    (store, temp_dir)
}

fn at(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::milliseconds(millis)
}

fn chat(streamer: &str, millis: i64) -> Event {
    Event::chat(streamer, "user", format!("{streamer}-{millis}"), at(millis))
}

fn contents(events: &[Event]) -> Vec<&str> {
    events.iter().map(|e| e.content()).collect()
}

// ============================================================================
// Query semantics
// ============================================================================

#[tokio::test]
async fn test_query_returns_newest_oldest_first() {
    let (store, _temp) = create_test_store();
    let batch: Vec<Event> = (0..20).map(|i| chat("forsen", i)).collect();
    store.append_batch(&batch).await.unwrap();

    let last = store.query("forsen", 3).await.unwrap();
    assert_eq!(contents(&last), vec!["forsen-17", "forsen-18", "forsen-19"]);

    let everything = store.query("forsen", 1000).await.unwrap();
    assert_eq!(everything.len(), 20);
}

#[tokio::test]
async fn test_out_of_order_appends_sort_by_timestamp() {
    let (store, _temp) = create_test_store();
    store.append_batch(&[chat("forsen", 50)]).await.unwrap();
    store.append_batch(&[chat("forsen", 10)]).await.unwrap();

    // An image derived 1ms after an earlier chat lands between them
    let parent = chat("forsen", 20);
    let image = parent.derive_image("a cat", Duration::milliseconds(1));
    store.append_batch(&[parent, image]).await.unwrap();

    let events = store.query("forsen", 10).await.unwrap();
    assert_eq!(
        contents(&events),
        vec!["forsen-10", "forsen-20", "a cat", "forsen-50"]
    );
    assert_eq!(events[2].kind(), EventKind::Image);
}

#[tokio::test]
async fn test_streamers_are_isolated() {
    let (store, _temp) = create_test_store();
    let batch = vec![
        chat("abc", 1),
        chat("abcd", 2),
        chat("abc", 3),
        chat("xqc", 4),
    ];
    store.append_batch(&batch).await.unwrap();

    assert_eq!(store.count("abc").await.unwrap(), 2);
    assert_eq!(store.count("abcd").await.unwrap(), 1);
    assert_eq!(store.count("nobody").await.unwrap(), 0);
    assert_eq!(
        contents(&store.query("abc", 10).await.unwrap()),
        vec!["abc-1", "abc-3"]
    );

    let all = store.query_all(3).await.unwrap();
    assert_eq!(contents(&all), vec!["abcd-2", "abc-3", "xqc-4"]);
}

#[tokio::test]
async fn test_query_range_is_inclusive() {
    let (store, _temp) = create_test_store();
    let batch: Vec<Event> = (0..10).map(|i| chat("forsen", i * 100)).collect();
    store.append_batch(&batch).await.unwrap();

    let range = store
        .query_range("forsen", at(200), at(500))
        .await
        .unwrap();
    assert_eq!(
        contents(&range),
        vec!["forsen-200", "forsen-300", "forsen-400", "forsen-500"]
    );

    let inverted = store.query_range("forsen", at(500), at(200)).await.unwrap();
    assert!(inverted.is_empty());
}

#[tokio::test]
async fn test_identical_timestamps_keep_append_order() {
    let (store, _temp) = create_test_store();
    let ts = at(0);
    let batch: Vec<Event> = (0..5)
        .map(|i| Event::chat("forsen", "user", i.to_string(), ts))
        .collect();
    store.append_batch(&batch).await.unwrap();

    let events = store.query("forsen", 10).await.unwrap();
    assert_eq!(contents(&events), vec!["0", "1", "2", "3", "4"]);
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_events_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = RedbStorageConfig {
        db_path: temp_dir.path().join("events.redb"),
    };

    {
        let store = RedbEventStore::open(config.clone()).unwrap();
        let ts = at(0);
        store
            .append_batch(&[Event::chat("forsen", "a", "first", ts)])
            .await
            .unwrap();
    }

    let store = RedbEventStore::open(config).unwrap();
    // Same timestamp again: the reopened store must not reuse the sequence
    store
        .append_batch(&[Event::chat("forsen", "b", "second", at(0))])
        .await
        .unwrap();

    let events = store.query("forsen", 10).await.unwrap();
    assert_eq!(contents(&events), vec!["first", "second"]);
    assert_eq!(store.len().await.unwrap(), 2);
}

#[tokio::test]
async fn test_concurrent_appends() {
    let (store, _temp) = create_test_store();
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let streamer = format!("streamer_{worker}");
            for chunk in 0..10 {
                let batch: Vec<Event> = (0..10)
                    .map(|i| chat(&streamer, chunk * 10 + i))
                    .collect();
                store.append_batch(&batch).await.unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(store.len().await.unwrap(), 800);
    for worker in 0..8 {
        assert_eq!(store.count(&format!("streamer_{worker}")).await.unwrap(), 100);
    }
}

#[tokio::test]
async fn test_export_last_from_store() {
    let (store, temp) = create_test_store();
    let batch: Vec<Event> = (0..5).map(|i| chat("forsen", i)).collect();
    store.append_batch(&batch).await.unwrap();

    let dir = temp.path().join("logs");
    let path = export_last(&store, &dir, "forsen", 2).await.unwrap();
    let body = std::fs::read_to_string(path).unwrap();

    assert_eq!(body.lines().count(), 2);
    assert!(body.ends_with("user: forsen-4\n"));
}
