//! In-memory storage implementation
//!
//! Keeps every appended batch in a `Vec`, suitable for tests. Appends can be
//! made to fail on demand to exercise the persistence worker's error path.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chatline_core::{Event, EventStore, StorageError};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::{debug, trace};

/// In-memory implementation of [`EventStore`]
///
/// Besides the flat event list, the store remembers the boundaries of each
/// successful `append_batch` call so tests can check how the stream was
/// partitioned into batches.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: RwLock<Vec<Event>>,
    batches: RwLock<Vec<Vec<Event>>>,
    /// Number of upcoming appends that should fail
    fail_appends: AtomicUsize,
    /// Number of appends rejected so far
    failed_appends: AtomicUsize,
}

impl InMemoryEventStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `append_batch` fail
    pub fn fail_next_appends(&self, count: usize) {
        self.fail_appends.store(count, Ordering::SeqCst);
    }

    /// Every batch accepted so far, in append order
    pub fn batches(&self) -> Vec<Vec<Event>> {
        self.batches.read().clone()
    }

    /// Every event accepted so far, in append order
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Number of events stored
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Number of appends rejected through fault injection
    pub fn failed_appends(&self) -> usize {
        self.failed_appends.load(Ordering::SeqCst)
    }

    fn sorted_matching(&self, filter: impl Fn(&Event) -> bool) -> Vec<Event> {
        let mut out: Vec<Event> = self
            .events
            .read()
            .iter()
            .filter(|e| filter(e))
            .cloned()
            .collect();
        // Stable sort keeps append order for equal timestamps
        out.sort_by_key(|e| e.timestamp());
        out
    }
}

fn newest(mut events: Vec<Event>, limit: usize) -> Vec<Event> {
    if events.len() > limit {
        events.drain(..events.len() - limit);
    }
    events
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append_batch(&self, events: &[Event]) -> Result<(), StorageError> {
        let pending_failures = self.fail_appends.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.fail_appends.store(pending_failures - 1, Ordering::SeqCst);
            self.failed_appends.fetch_add(1, Ordering::SeqCst);
            debug!(count = events.len(), "Injected append failure");
            return Err(StorageError::database("injected append failure"));
        }

        if events.is_empty() {
            return Ok(());
        }

        self.events.write().extend_from_slice(events);
        self.batches.write().push(events.to_vec());
        trace!(count = events.len(), "Appended batch");
        Ok(())
    }

    async fn query(&self, streamer: &str, limit: usize) -> Result<Vec<Event>, StorageError> {
        Ok(newest(
            self.sorted_matching(|e| e.streamer() == streamer),
            limit,
        ))
    }

    async fn query_all(&self, limit: usize) -> Result<Vec<Event>, StorageError> {
        Ok(newest(self.sorted_matching(|_| true), limit))
    }

    async fn query_range(
        &self,
        streamer: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError> {
        Ok(self.sorted_matching(|e| {
            e.streamer() == streamer && e.timestamp() >= from && e.timestamp() <= to
        }))
    }

    async fn count(&self, streamer: &str) -> Result<u64, StorageError> {
        Ok(self
            .events
            .read()
            .iter()
            .filter(|e| e.streamer() == streamer)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn chat(streamer: &str, i: i64) -> Event {
        Event::chat(streamer, format!("user_{i}"), i.to_string(), at(i))
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = InMemoryEventStore::new();
        let batch: Vec<Event> = (0..5).map(|i| chat("forsen", i)).collect();
        store.append_batch(&batch).await.unwrap();
        store.append_batch(&[chat("xqc", 10)]).await.unwrap();

        let last = store.query("forsen", 3).await.unwrap();
        let contents: Vec<_> = last.iter().map(|e| e.content()).collect();
        assert_eq!(contents, vec!["2", "3", "4"]);

        assert_eq!(store.count("forsen").await.unwrap(), 5);
        assert_eq!(store.count("xqc").await.unwrap(), 1);
        assert_eq!(store.query_all(100).await.unwrap().len(), 6);
        assert_eq!(store.batches().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures_store_nothing() {
        let store = InMemoryEventStore::new();
        store.fail_next_appends(1);

        assert!(store.append_batch(&[chat("forsen", 1)]).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.failed_appends(), 1);

        store.append_batch(&[chat("forsen", 2)]).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_query_range_inclusive() {
        let store = InMemoryEventStore::new();
        let batch: Vec<Event> = (0..10).map(|i| chat("forsen", i)).collect();
        store.append_batch(&batch).await.unwrap();

        let range = store
            .query_range("forsen", at(3), at(3) + Duration::seconds(2))
            .await
            .unwrap();
        let contents: Vec<_> = range.iter().map(|e| e.content()).collect();
        assert_eq!(contents, vec!["3", "4", "5"]);
    }
}
