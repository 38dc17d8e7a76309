//! Batch persistence worker
//!
//! Collects events into a batch and hands it to the [`EventStore`] when any
//! of these happens:
//!
//! - the batch reaches `batch_size`
//! - the flush timer fires with a non-empty batch
//! - the input channel closes (final flush, then exit)
//!
//! Everything runs in one select loop, so events are processed in arrival
//! order and two flushes never overlap. A failed append is logged and the
//! batch is dropped; there is no retry.
//!
//! The worker's input is bounded. Producers go through [`BatchSender`],
//! which never waits: while the store is stalled and the backlog is full,
//! further events are dropped and counted rather than queued in memory.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chatline_core::{Event, EventStore, IngestError};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Counters maintained by the batch worker
#[derive(Debug, Default)]
pub struct BatchStats {
    flushes: AtomicU64,
    persisted: AtomicU64,
    failed_flushes: AtomicU64,
    dropped: AtomicU64,
    backlog_dropped: AtomicU64,
}

/// Point-in-time copy of [`BatchStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStatsSnapshot {
    /// Successful appends
    pub flushes: u64,
    /// Events stored by successful appends
    pub persisted: u64,
    /// Appends rejected by the store
    pub failed_flushes: u64,
    /// Events lost to rejected appends
    pub dropped: u64,
    /// Events never handed to the worker because its backlog was full
    pub backlog_dropped: u64,
}

impl BatchStats {
    pub fn snapshot(&self) -> BatchStatsSnapshot {
        BatchStatsSnapshot {
            flushes: self.flushes.load(Ordering::Relaxed),
            persisted: self.persisted.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            backlog_dropped: self.backlog_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Create the bounded input of a [`BatchWorker`]. Drops at the sender are
/// counted in `stats`.
pub fn batch_channel(
    capacity: usize,
    stats: Arc<BatchStats>,
) -> (BatchSender, mpsc::Receiver<Event>) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (BatchSender { tx, stats }, rx)
}

/// Non-blocking producer side of a [`BatchWorker`]'s input
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Event>,
    stats: Arc<BatchStats>,
}

impl BatchSender {
    /// Hand an event to the worker without waiting
    pub fn try_forward(&self, event: Event) -> Result<(), IngestError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                let dropped = self.stats.backlog_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    streamer = %event.streamer(),
                    kind = %event.kind(),
                    capacity = self.tx.max_capacity(),
                    dropped,
                    "Persistence backlog full, event will not be stored"
                );
                Err(IngestError::Full)
            }
            Err(TrySendError::Closed(_)) => Err(IngestError::Closed),
        }
    }
}

/// What caused a flush
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlushTrigger {
    Size,
    Interval,
    Close,
}

impl FlushTrigger {
    fn as_str(self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Interval => "interval",
            Self::Close => "close",
        }
    }
}

/// Background batch persistence task
pub struct BatchWorker {
    store: Arc<dyn EventStore>,
    input: mpsc::Receiver<Event>,
    batch: Vec<Event>,
    batch_size: usize,
    flush_interval: Duration,
    stats: Arc<BatchStats>,
}

impl BatchWorker {
    /// Create a worker. `batch_size` and `flush_interval` must be positive.
    pub fn new(
        store: Arc<dyn EventStore>,
        input: mpsc::Receiver<Event>,
        batch_size: usize,
        flush_interval: Duration,
    ) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            store,
            input,
            batch: Vec::with_capacity(batch_size),
            batch_size,
            flush_interval,
            stats: Arc::new(BatchStats::default()),
        }
    }

    /// Share an existing counter set
    pub fn with_stats(mut self, stats: Arc<BatchStats>) -> Self {
        self.stats = stats;
        self
    }

    pub fn stats(&self) -> Arc<BatchStats> {
        Arc::clone(&self.stats)
    }

    /// Spawn the worker as a background task
    pub fn spawn(self) -> JoinHandle<BatchStatsSnapshot> {
        tokio::spawn(self.run())
    }

    /// Run until the input channel closes; returns the final counters
    pub async fn run(mut self) -> BatchStatsSnapshot {
        info!(
            batch_size = self.batch_size,
            interval_ms = self.flush_interval.as_millis() as u64,
            "Batch worker started"
        );

        // First tick one full period from now, not immediately
        let first_tick = Instant::now() + self.flush_interval;
        let mut ticker = tokio::time::interval_at(first_tick, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                received = self.input.recv() => match received {
                    Some(event) => {
                        self.batch.push(event);
                        if self.batch.len() >= self.batch_size {
                            self.flush(FlushTrigger::Size).await;
                        }
                    }
                    None => {
                        self.flush(FlushTrigger::Close).await;
                        break;
                    }
                },
                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Interval).await;
                }
            }
        }

        let stats = self.stats.snapshot();
        info!(
            flushes = stats.flushes,
            persisted = stats.persisted,
            dropped = stats.dropped,
            backlog_dropped = stats.backlog_dropped,
            "Batch worker stopped"
        );
        stats
    }

    async fn flush(&mut self, trigger: FlushTrigger) {
        if self.batch.is_empty() {
            return;
        }

        let count = self.batch.len() as u64;
        match self.store.append_batch(&self.batch).await {
            Ok(()) => {
                self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                self.stats.persisted.fetch_add(count, Ordering::Relaxed);
                debug!(count, trigger = trigger.as_str(), "Flushed batch");
            }
            Err(e) => {
                self.stats.failed_flushes.fetch_add(1, Ordering::Relaxed);
                self.stats.dropped.fetch_add(count, Ordering::Relaxed);
                error!(
                    count,
                    trigger = trigger.as_str(),
                    error = %e,
                    "Failed to persist batch, dropping events"
                );
            }
        }
        self.batch.clear();
    }
}
