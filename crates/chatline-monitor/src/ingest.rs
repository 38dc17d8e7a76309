//! Ingestion channel
//!
//! A bounded FIFO between the chat callback, which must never block, and the
//! timeline writer. `add` never waits: when the queue is full the event is
//! dropped and counted.
//!
//! The queue owns the only sender. [`IngestQueue::close`] drops it, which is
//! what lets the writer drain the remainder and exit, so every clone of the
//! queue handle observes the close at the same time.

use std::sync::atomic::{AtomicU64, Ordering};

use chatline_core::{Event, IngestError};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Producer side of the ingestion channel
#[derive(Debug)]
pub struct IngestQueue {
    sender: RwLock<Option<mpsc::Sender<Event>>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl IngestQueue {
    /// Create a queue holding at most `capacity` pending events, together
    /// with its single consumer
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let queue = Self {
            sender: RwLock::new(Some(tx)),
            capacity,
            dropped: AtomicU64::new(0),
        };
        (queue, rx)
    }

    /// Enqueue without waiting
    pub fn add(&self, event: Event) -> Result<(), IngestError> {
        let sender = self.sender.read();
        let Some(tx) = sender.as_ref() else {
            debug!(
                streamer = %event.streamer(),
                kind = %event.kind(),
                "Ingestion closed, dropping event"
            );
            return Err(IngestError::Closed);
        };

        match tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(event)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    streamer = %event.streamer(),
                    kind = %event.kind(),
                    capacity = self.capacity,
                    dropped,
                    "Ingestion queue full, dropping event"
                );
                Err(IngestError::Full)
            }
            Err(TrySendError::Closed(event)) => {
                debug!(streamer = %event.streamer(), "Ingestion consumer gone, dropping event");
                Err(IngestError::Closed)
            }
        }
    }

    /// Close the queue. Events already enqueued are still delivered; later
    /// `add` calls fail with [`IngestError::Closed`]. Returns false when the
    /// queue was already closed.
    pub fn close(&self) -> bool {
        let closed = self.sender.write().take().is_some();
        if closed {
            debug!("Ingestion queue closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Events waiting to be consumed
    pub fn pending(&self) -> usize {
        self.sender
            .read()
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0)
    }

    /// Events dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
