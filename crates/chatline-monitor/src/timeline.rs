//! In-memory timeline and its single writer
//!
//! The writer task is the only consumer of the ingestion channel. Each event
//! goes into the ring buffer and, in the same step, on to the batch worker,
//! so both consumers see the stream in send order. The forward never waits:
//! a full persistence backlog costs the stored copy of the event, never the
//! ring buffer's. When the ingestion channel closes the writer drops its
//! forwarding sender, which in turn closes the batch worker's input.

use std::sync::Arc;

use chatline_core::{Event, IngestError, RingBuffer};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::batch::BatchSender;

/// Read handle on the most recent events
#[derive(Debug, Clone)]
pub struct Timeline {
    ring: Arc<RingBuffer<Event>>,
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Arc::new(RingBuffer::new(capacity)),
        }
    }

    /// Every retained event, oldest first
    pub fn all(&self) -> Vec<Event> {
        self.ring.get_all()
    }

    /// The newest `n` retained events, oldest first
    pub fn last(&self, n: usize) -> Vec<Event> {
        self.ring.get_last(n)
    }

    /// Retained events stamped within `duration` of now
    pub fn recent(&self, duration: Duration) -> Vec<Event> {
        self.ring.get_recent(duration)
    }

    /// Retained events stamped within `[now - duration, now]`
    pub fn recent_at(&self, duration: Duration, now: DateTime<Utc>) -> Vec<Event> {
        self.ring.get_recent_at(duration, now)
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Spawn the writer draining `ingest` into this timeline.
    ///
    /// The task resolves to the number of events written once `ingest` is
    /// closed and empty.
    pub fn spawn_writer(
        &self,
        ingest: mpsc::Receiver<Event>,
        forward: Option<BatchSender>,
    ) -> JoinHandle<u64> {
        let writer = TimelineWriter {
            ring: Arc::clone(&self.ring),
            ingest,
            forward,
        };
        tokio::spawn(writer.run())
    }
}

struct TimelineWriter {
    ring: Arc<RingBuffer<Event>>,
    ingest: mpsc::Receiver<Event>,
    forward: Option<BatchSender>,
}

impl TimelineWriter {
    async fn run(mut self) -> u64 {
        debug!("Timeline writer started");
        let mut written = 0u64;

        while let Some(event) = self.ingest.recv().await {
            if let Some(forward) = &self.forward {
                if forward.try_forward(event.clone()) == Err(IngestError::Closed) {
                    warn!("Batch worker gone, events will no longer be persisted");
                    self.forward = None;
                }
            }
            self.ring.add(event);
            written += 1;
        }

        debug!(written, "Ingestion closed, timeline writer exiting");
        written
    }
}
