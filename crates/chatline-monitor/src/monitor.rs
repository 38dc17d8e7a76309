//! Lifecycle controller
//!
//! [`Monitor::start`] wires the pipeline together and blocks until shutdown
//! has completed:
//!
//! ```text
//! chat callback -> IngestQueue -> timeline writer -> ring buffer
//!                      ^                 \-> (bounded) batch worker -> EventStore
//!                      |
//!        enrichment task (per message) <- chat callback
//! ```
//!
//! Shutdown runs in a fixed order once the cancellation token fires:
//! disconnect the source, give in-flight enrichment a bounded wait, enqueue
//! the stop markers, pause for the grace period, close ingestion, then wait
//! for the writer and the batch worker's final flush.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chatline_core::{
    CancellationToken, ChatMessage, ChatSource, Event, EventStore, ImageDescriber, ImagePredicate,
};
use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::{BatchStats, BatchStatsSnapshot, BatchWorker, batch_channel};
use crate::config::{MonitorConfig, normalize_channels};
use crate::enrich::Enricher;
use crate::error::{MonitorError, MonitorResult};
use crate::ingest::IngestQueue;
use crate::timeline::Timeline;

/// Where a monitor is in its life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Created, `start` not called yet
    Idle,
    /// Connected and ingesting
    Running,
    /// Cancellation observed, source disconnecting
    ShutdownRequested,
    /// Writing stop markers and flushing
    Draining,
    /// Every worker has exited
    Stopped,
}

struct EnrichmentParts {
    predicate: Arc<dyn ImagePredicate>,
    describer: Arc<dyn ImageDescriber>,
}

/// Running pipeline handles, owned by `start`
struct Pipeline {
    queue: Arc<IngestQueue>,
    writer: JoinHandle<u64>,
    batch: JoinHandle<BatchStatsSnapshot>,
}

/// Chat monitor: ingestion, enrichment, and batched persistence
pub struct Monitor {
    config: MonitorConfig,
    source: Arc<dyn ChatSource>,
    store: Arc<dyn EventStore>,
    enrichment: Option<EnrichmentParts>,
    timeline: Timeline,
    cancel: CancellationToken,
    started: AtomicBool,
    state: watch::Sender<LifecycleState>,
    ingest: RwLock<Option<Arc<IngestQueue>>>,
    batch_stats: Arc<BatchStats>,
}

impl Monitor {
    pub fn new(
        config: MonitorConfig,
        source: Arc<dyn ChatSource>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            timeline: Timeline::new(config.ring_capacity),
            config,
            source,
            store,
            enrichment: None,
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
            state,
            ingest: RwLock::new(None),
            batch_stats: Arc::new(BatchStats::default()),
        }
    }

    /// Describe images linked from chat with the given collaborators
    pub fn with_image_enrichment(
        mut self,
        predicate: Arc<dyn ImagePredicate>,
        describer: Arc<dyn ImageDescriber>,
    ) -> Self {
        self.enrichment = Some(EnrichmentParts {
            predicate,
            describer,
        });
        self
    }

    /// Monitor `channels` until [`Monitor::stop`] is called.
    ///
    /// Returns once shutdown has fully completed. Only configuration and
    /// connection problems are reported as errors; everything after a
    /// successful connect is logged instead.
    #[instrument(skip(self))]
    pub async fn start(&self, channels: &[String]) -> MonitorResult<()> {
        if self.started.load(Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted);
        }
        self.config.validate()?;

        let tracked = normalize_channels(channels);
        if tracked.is_empty() {
            return Err(MonitorError::Config("no channels to monitor".to_string()));
        }
        // Claimed only once the arguments are known to be good
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyStarted);
        }

        let pipeline = self.spawn_pipeline();
        let tracker = TaskTracker::new();
        self.register_handler(&pipeline.queue, &tracker);

        let started_at = Utc::now();
        if let Err(e) = self.connect(&tracked).await {
            error!(error = %e, "Failed to connect to chat");
            self.source.disconnect().await;
            self.drain(pipeline).await;
            self.set_state(LifecycleState::Stopped);
            return Err(e);
        }

        for channel in &tracked {
            if let Err(e) = pipeline
                .queue
                .add(Event::monitoring_started(channel.as_str(), started_at))
            {
                warn!(streamer = %channel, error = %e, "Could not enqueue start marker");
            }
        }
        self.set_state(LifecycleState::Running);
        info!(channels = ?tracked, "Monitoring started");

        self.cancel.cancelled().await;
        self.set_state(LifecycleState::ShutdownRequested);
        info!("Shutdown requested");

        self.source.disconnect().await;

        tracker.close();
        if tokio::time::timeout(self.config.enrichment_wait(), tracker.wait())
            .await
            .is_err()
        {
            warn!(in_flight = tracker.len(), "Abandoning in-flight enrichment");
        }

        self.set_state(LifecycleState::Draining);
        let stopped_at = Utc::now();
        for channel in &tracked {
            if let Err(e) = pipeline
                .queue
                .add(Event::monitoring_stopped(channel.as_str(), stopped_at))
            {
                warn!(streamer = %channel, error = %e, "Could not enqueue stop marker");
            }
        }

        tokio::time::sleep(self.config.shutdown_grace()).await;
        self.drain(pipeline).await;

        self.set_state(LifecycleState::Stopped);
        Ok(())
    }

    /// Request shutdown. Safe to call from any task, any number of times.
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            info!("Stop requested");
            self.cancel.cancel();
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    /// Every retained event, oldest first
    pub fn get_all_events(&self) -> Vec<Event> {
        self.timeline.all()
    }

    /// The newest `n` retained events, oldest first
    pub fn get_last_events(&self, n: usize) -> Vec<Event> {
        self.timeline.last(n)
    }

    /// Retained events stamped within the last `duration`
    pub fn get_recent_events(&self, duration: chrono::Duration) -> Vec<Event> {
        self.timeline.recent(duration)
    }

    /// In-memory timeline handle
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Persistence counters
    pub fn batch_stats(&self) -> BatchStatsSnapshot {
        self.batch_stats.snapshot()
    }

    /// Events dropped because the ingestion queue was full
    pub fn dropped_events(&self) -> u64 {
        self.ingest
            .read()
            .as_ref()
            .map(|queue| queue.dropped())
            .unwrap_or(0)
    }

    fn set_state(&self, state: LifecycleState) {
        self.state.send_replace(state);
        debug!(?state, "Lifecycle state changed");
    }

    fn spawn_pipeline(&self) -> Pipeline {
        let (queue, ingest_rx) = IngestQueue::new(self.config.ingest_capacity);
        let queue = Arc::new(queue);
        *self.ingest.write() = Some(Arc::clone(&queue));

        let (batch_tx, batch_rx) =
            batch_channel(self.config.persist_capacity, Arc::clone(&self.batch_stats));
        let writer = self.timeline.spawn_writer(ingest_rx, Some(batch_tx));
        let batch = BatchWorker::new(
            Arc::clone(&self.store),
            batch_rx,
            self.config.batch_size,
            self.config.flush_interval(),
        )
        .with_stats(Arc::clone(&self.batch_stats))
        .spawn();

        Pipeline {
            queue,
            writer,
            batch,
        }
    }

    /// The callback only builds the event, enqueues it, and hands enrichment
    /// off to its own task.
    fn register_handler(&self, queue: &Arc<IngestQueue>, tracker: &TaskTracker) {
        let enricher = self.enrichment.as_ref().map(|parts| {
            Arc::new(Enricher::new(
                Arc::clone(&parts.predicate),
                Arc::clone(&parts.describer),
                Arc::clone(queue),
                self.config.image_offset(),
            ))
        });
        let queue = Arc::clone(queue);
        let tracker = tracker.clone();
        let cancel = self.cancel.clone();

        self.source.on_message(Arc::new(move |message: ChatMessage| {
            let event = message.into_event();
            let parent = enricher
                .as_ref()
                .filter(|_| !cancel.is_cancelled())
                .map(|enricher| (Arc::clone(enricher), event.clone()));

            if queue.add(event).is_err() {
                return;
            }

            if let Some((enricher, parent)) = parent {
                let cancel = cancel.clone();
                tracker.spawn(async move {
                    enricher.enrich(&parent, &cancel).await;
                });
            }
        }));
    }

    async fn connect(&self, channels: &[String]) -> MonitorResult<()> {
        self.source.join(channels).await?;
        self.source.connect().await?;
        Ok(())
    }

    /// Close ingestion and wait for the writer and the final flush
    async fn drain(&self, pipeline: Pipeline) {
        pipeline.queue.close();

        match pipeline.writer.await {
            Ok(written) => debug!(written, "Timeline writer finished"),
            Err(e) => error!(error = %e, "Timeline writer failed"),
        }
        match pipeline.batch.await {
            Ok(stats) => info!(
                persisted = stats.persisted,
                flushes = stats.flushes,
                dropped = stats.dropped,
                backlog_dropped = stats.backlog_dropped,
                ingest_dropped = pipeline.queue.dropped(),
                "Monitoring stopped"
            ),
            Err(e) => error!(error = %e, "Batch worker failed"),
        }
    }
}
