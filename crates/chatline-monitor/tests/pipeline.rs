//! End-to-end pipeline tests driving the monitor through in-process doubles

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatline_core::mock::{MockChatSource, MockDescriber, StaticImagePredicate};
use chatline_core::{Event, EventKind, EventStore, StorageError};
use chatline_monitor::{LifecycleState, Monitor, MonitorConfig, MonitorError, MonitorResult};
use chatline_storage::{InMemoryEventStore, RedbEventStore, RedbStorageConfig};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

const CAT: &str = "https://i.imgur.com/cat.png";

fn config() -> MonitorConfig {
    MonitorConfig::default()
        .with_ingest_capacity(1000)
        .with_batch_size(50)
        .with_flush_interval(Duration::from_secs(3600))
        .with_shutdown_grace(Duration::from_millis(10))
}

async fn launch(monitor: &Arc<Monitor>, channels: &[&str]) -> JoinHandle<MonitorResult<()>> {
    chatline_logging::init_testing();
    let channels: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
    let runner = Arc::clone(monitor);
    let handle = tokio::spawn(async move { runner.start(&channels).await });

    let mut state = monitor.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        state.wait_for(|s| *s == LifecycleState::Running),
    )
    .await
    .expect("monitor never reached Running")
    .unwrap();
    handle
}

async fn shutdown(monitor: &Monitor, handle: JoinHandle<MonitorResult<()>>) {
    monitor.stop();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("shutdown timed out")
        .unwrap()
        .unwrap();
    assert_eq!(monitor.state(), LifecycleState::Stopped);
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_flushes_by_size_and_on_shutdown() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(config(), source.clone(), store.clone()));

    let handle = launch(&monitor, &["forsen"]).await;
    for i in 0..60 {
        assert!(source.say("forsen", "user_1", &i.to_string()));
    }
    wait_until(|| monitor.timeline().len() == 61).await;
    shutdown(&monitor, handle).await;

    // start marker + 49 chats by size, then 11 chats + stop marker on close
    let sizes: Vec<usize> = store.batches().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![50, 12]);

    let events = store.events();
    assert_eq!(events[0].kind(), EventKind::Global);
    assert_eq!(events[0].content(), "Starting monitoring for channel: forsen");
    assert_eq!(events[61].kind(), EventKind::Global);
    assert_eq!(events[61].content(), "Stopping monitoring for channel: forsen");

    let chats: Vec<&str> = events[1..61].iter().map(|e| e.content()).collect();
    let expected: Vec<String> = (0..60).map(|i| i.to_string()).collect();
    assert_eq!(chats, expected);

    let stats = monitor.batch_stats();
    assert_eq!(stats.flushes, 2);
    assert_eq!(stats.persisted, 62);
}

#[tokio::test]
async fn test_interval_flush_while_running() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(
        config().with_flush_interval(Duration::from_millis(50)),
        source.clone(),
        store.clone(),
    ));

    let handle = launch(&monitor, &["forsen"]).await;
    source.say("forsen", "user_1", "hello");
    wait_until(|| store.len() == 2).await;
    assert_eq!(monitor.state(), LifecycleState::Running);

    shutdown(&monitor, handle).await;
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_channels_are_normalized_and_deduplicated() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(config(), source.clone(), store.clone()));

    let handle = launch(&monitor, &["#Forsen", "forsen", " xqc "]).await;
    assert_eq!(source.joined(), vec!["forsen", "xqc"]);
    assert_eq!(source.connect_count(), 1);
    shutdown(&monitor, handle).await;

    assert_eq!(source.disconnect_count(), 1);
    let markers: Vec<(String, String)> = store
        .events()
        .iter()
        .map(|e| (e.streamer().to_string(), e.content().to_string()))
        .collect();
    assert_eq!(
        markers,
        vec![
            ("forsen".into(), "Starting monitoring for channel: forsen".into()),
            ("xqc".into(), "Starting monitoring for channel: xqc".into()),
            ("forsen".into(), "Stopping monitoring for channel: forsen".into()),
            ("xqc".into(), "Stopping monitoring for channel: xqc".into()),
        ]
    );
}

#[tokio::test]
async fn test_timeline_queries() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(
        config().with_ring_capacity(3),
        source.clone(),
        store.clone(),
    ));

    let handle = launch(&monitor, &["forsen"]).await;
    for text in ["A", "B", "C", "D", "E"] {
        source.say("forsen", "user", text);
    }
    wait_until(|| {
        monitor
            .get_all_events()
            .last()
            .is_some_and(|e| e.content() == "E")
    })
    .await;

    let all: Vec<String> = monitor
        .get_all_events()
        .iter()
        .map(|e| e.content().to_string())
        .collect();
    assert_eq!(all, vec!["C", "D", "E"]);
    assert_eq!(monitor.get_last_events(2).len(), 2);
    assert_eq!(monitor.get_last_events(2)[0].content(), "D");
    assert_eq!(monitor.get_recent_events(chrono::Duration::minutes(1)).len(), 3);

    shutdown(&monitor, handle).await;
    // The ring only keeps three, storage keeps everything
    assert_eq!(store.len(), 7);
}

#[tokio::test]
async fn test_overflow_drops_without_blocking() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(
        config().with_ingest_capacity(10),
        source.clone(),
        store.clone(),
    ));

    let handle = launch(&monitor, &["forsen"]).await;
    // No await between sends: the writer cannot drain on this runtime
    for i in 0..20 {
        source.say("forsen", "user", &i.to_string());
    }
    assert!(monitor.dropped_events() >= 10);

    let dropped = monitor.dropped_events() as usize;
    wait_until(|| monitor.timeline().len() + dropped == 21).await;
    shutdown(&monitor, handle).await;

    assert_eq!(store.len() + dropped, 22);
}

#[tokio::test]
async fn test_storage_failure_drops_batch_only() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    store.fail_next_appends(1);
    let monitor = Arc::new(Monitor::new(
        config().with_batch_size(5),
        source.clone(),
        store.clone(),
    ));

    let handle = launch(&monitor, &["forsen"]).await;
    for i in 0..6 {
        source.say("forsen", "user", &i.to_string());
    }
    wait_until(|| monitor.timeline().len() == 7).await;
    shutdown(&monitor, handle).await;

    // Start marker + chats 0..=3 rejected; 4, 5 and the stop marker persisted
    let stored: Vec<String> = store
        .events()
        .iter()
        .map(|e| e.content().to_string())
        .collect();
    assert_eq!(
        stored,
        vec!["4", "5", "Stopping monitoring for channel: forsen"]
    );
    assert_eq!(monitor.timeline().len(), 8);

    let stats = monitor.batch_stats();
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.dropped, 5);
    assert_eq!(stats.persisted, 3);
}

#[tokio::test]
async fn test_failed_final_flush_still_stops() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    store.fail_next_appends(1);
    let monitor = Arc::new(Monitor::new(config(), source.clone(), store.clone()));

    let handle = launch(&monitor, &["forsen"]).await;
    for i in 0..3 {
        source.say("forsen", "user", &i.to_string());
    }
    wait_until(|| monitor.timeline().len() == 4).await;
    // The only append is the close flush, and it is rejected
    shutdown(&monitor, handle).await;

    assert!(store.events().is_empty());
    assert_eq!(monitor.timeline().len(), 5);
    let stats = monitor.batch_stats();
    assert_eq!(stats.flushes, 0);
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.dropped, 5);
}

/// Store whose appends wait until the test opens the gate
struct GatedStore {
    inner: InMemoryEventStore,
    gate: Semaphore,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: InMemoryEventStore::new(),
            gate: Semaphore::new(0),
        }
    }

    fn open(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl EventStore for GatedStore {
    async fn append_batch(&self, events: &[Event]) -> Result<(), StorageError> {
        let _permit = self.gate.acquire().await.map_err(StorageError::database)?;
        self.inner.append_batch(events).await
    }

    async fn query(&self, streamer: &str, limit: usize) -> Result<Vec<Event>, StorageError> {
        self.inner.query(streamer, limit).await
    }

    async fn query_all(&self, limit: usize) -> Result<Vec<Event>, StorageError> {
        self.inner.query_all(limit).await
    }

    async fn query_range(
        &self,
        streamer: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError> {
        self.inner.query_range(streamer, from, to).await
    }

    async fn count(&self, streamer: &str) -> Result<u64, StorageError> {
        self.inner.count(streamer).await
    }
}

#[tokio::test]
async fn test_stalled_store_bounds_backlog() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(GatedStore::new());
    let monitor = Arc::new(Monitor::new(
        config()
            .with_ring_capacity(2000)
            .with_ingest_capacity(10)
            .with_persist_capacity(20)
            .with_batch_size(1),
        source.clone(),
        store.clone(),
    ));

    let handle = launch(&monitor, &["forsen"]).await;
    for i in 0..1000 {
        source.say("forsen", "user", &i.to_string());
        if i % 10 == 9 {
            tokio::task::yield_now().await;
        }
    }
    let ingest_dropped = monitor.dropped_events();
    wait_until(|| monitor.timeline().len() as u64 + ingest_dropped == 1001).await;

    // Nothing stored yet; at most one batch in hand plus the full backlog
    // made it past the writer
    assert!(store.inner.is_empty());
    let backlog_dropped = monitor.batch_stats().backlog_dropped;
    assert!(backlog_dropped + ingest_dropped >= 1001 - 21);

    store.open();
    let accepted = 1001 - ingest_dropped - backlog_dropped;
    wait_until(|| store.inner.len() as u64 == accepted).await;
    shutdown(&monitor, handle).await;

    assert_eq!(store.inner.len() as u64, accepted + 1);
    assert_eq!(monitor.batch_stats().persisted, accepted + 1);
}

#[tokio::test]
async fn test_image_links_are_described() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let predicate = Arc::new(StaticImagePredicate::new().with_image(CAT));
    let describer = Arc::new(MockDescriber::new());
    let monitor = Arc::new(
        Monitor::new(config(), source.clone(), store.clone())
            .with_image_enrichment(predicate.clone(), describer.clone()),
    );

    let handle = launch(&monitor, &["forsen"]).await;
    source.say(
        "forsen",
        "user_1",
        &format!("look https://example.com/page and {CAT}"),
    );
    wait_until(|| {
        monitor
            .get_all_events()
            .iter()
            .any(|e| e.kind() == EventKind::Image)
    })
    .await;
    shutdown(&monitor, handle).await;

    assert_eq!(predicate.calls().len(), 2);
    assert_eq!(describer.calls(), vec![CAT.to_string()]);

    let events = store.events();
    let chat = events.iter().find(|e| e.kind() == EventKind::Chat).unwrap();
    let images: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == EventKind::Image)
        .collect();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].content(), format!("description of {CAT}"));
    assert_eq!(images[0].author(), Some("user_1"));
    assert_eq!(images[0].streamer(), "forsen");
    assert_eq!(
        images[0].timestamp(),
        chat.timestamp() + chrono::Duration::milliseconds(1)
    );
}

#[tokio::test]
async fn test_shutdown_cancels_enrichment() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let describer = Arc::new(MockDescriber::new().with_delay(Duration::from_secs(30)));
    let monitor = Arc::new(
        Monitor::new(config(), source.clone(), store.clone()).with_image_enrichment(
            Arc::new(StaticImagePredicate::new().with_image(CAT)),
            describer.clone(),
        ),
    );

    let handle = launch(&monitor, &["forsen"]).await;
    source.say("forsen", "user_1", CAT);
    wait_until(|| describer.calls().len() == 1).await;

    let started = std::time::Instant::now();
    shutdown(&monitor, handle).await;
    assert!(started.elapsed() < Duration::from_secs(2));

    assert_eq!(describer.completed(), 0);
    assert!(store.events().iter().all(|e| e.kind() != EventKind::Image));
    assert_eq!(store.len(), 3);
}

#[tokio::test]
async fn test_lifecycle_and_restart() {
    let source = Arc::new(MockChatSource::new());
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Arc::new(Monitor::new(config(), source.clone(), store.clone()));
    assert_eq!(monitor.state(), LifecycleState::Idle);

    let handle = launch(&monitor, &["forsen"]).await;
    assert!(source.is_connected());

    let again = monitor.start(&["xqc".to_string()]).await;
    assert!(matches!(again, Err(MonitorError::AlreadyStarted)));

    shutdown(&monitor, handle).await;
    assert!(!source.is_connected());

    // Late chat after shutdown never reaches the pipeline
    assert!(!source.say("forsen", "user", "late"));
    assert_eq!(store.len(), 2);

    // Second stop is a no-op
    monitor.stop();
    assert_eq!(monitor.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_connect_failure_is_fatal() {
    let source = Arc::new(MockChatSource::new());
    source.fail_connect(true);
    let store = Arc::new(InMemoryEventStore::new());
    let monitor = Monitor::new(config(), source.clone(), store.clone());

    let result = monitor.start(&["forsen".to_string()]).await;
    assert!(matches!(result, Err(MonitorError::Source(_))));
    assert_eq!(monitor.state(), LifecycleState::Stopped);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_persists_to_redb() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        RedbEventStore::open(RedbStorageConfig {
            db_path: dir.path().join("chat.redb"),
        })
        .unwrap(),
    );
    let source = Arc::new(MockChatSource::new());
    let monitor = Arc::new(Monitor::new(config(), source.clone(), store.clone()));

    let handle = launch(&monitor, &["forsen", "xqc"]).await;
    source.say("forsen", "user_1", "hello");
    source.say("xqc", "user_2", "hi");
    wait_until(|| monitor.timeline().len() == 4).await;
    shutdown(&monitor, handle).await;

    assert_eq!(store.count("forsen").await.unwrap(), 3);
    let events = store.query("forsen", 15).await.unwrap();
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind()).collect();
    assert_eq!(
        kinds,
        vec![EventKind::Global, EventKind::Chat, EventKind::Global]
    );
    assert_eq!(events[1].content(), "hello");
}
