//! Fixed-capacity ring buffer of recent events
//!
//! Storage is an arena of `capacity` slots addressed by a monotonically
//! increasing write counter modulo the capacity. The oldest retained entry is
//! always at `written - len`, so a snapshot is two slice copies and never
//! reallocates the arena.
//!
//! All mutation and every snapshot take the same [`RwLock`], so a reader can
//! never observe a torn write.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::event::Event;

#[derive(Debug)]
struct Slots<T> {
    slots: Vec<Option<T>>,
    /// Total number of entries ever written
    written: u64,
}

/// Fixed-capacity circular store holding the `capacity` most recent entries
#[derive(Debug)]
pub struct RingBuffer<T = Event> {
    capacity: usize,
    inner: RwLock<Slots<T>>,
}

impl<T: Clone> RingBuffer<T> {
    /// Create a ring buffer with room for `capacity` entries.
    ///
    /// A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            inner: RwLock::new(Slots {
                slots: vec![None; capacity],
                written: 0,
            }),
        }
    }

    /// Maximum number of retained entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of entries currently retained
    pub fn len(&self) -> usize {
        self.retained(self.inner.read().written)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().written == 0
    }

    /// Total entries ever added, including overwritten ones
    pub fn total_written(&self) -> u64 {
        self.inner.read().written
    }

    /// Append an entry, overwriting the oldest one when full. O(1).
    pub fn add(&self, item: T) {
        let mut inner = self.inner.write();
        let index = (inner.written % self.capacity as u64) as usize;
        inner.slots[index] = Some(item);
        inner.written += 1;
    }

    /// Snapshot of all retained entries, oldest first
    pub fn get_all(&self) -> Vec<T> {
        let inner = self.inner.read();
        let len = self.retained(inner.written);
        let start = ((inner.written - len as u64) % self.capacity as u64) as usize;

        let mut out = Vec::with_capacity(len);
        let (tail, head) = inner.slots.split_at(start);
        out.extend(head.iter().chain(tail.iter()).flatten().cloned());
        out
    }

    /// The last `n` entries, oldest first. Returns fewer when the buffer
    /// holds less than `n`.
    pub fn get_last(&self, n: usize) -> Vec<T> {
        let mut all = self.get_all();
        if all.len() > n {
            all.drain(..all.len() - n);
        }
        all
    }

    /// Clamp in `u64` so the counter never truncates on 32-bit targets
    fn retained(&self, written: u64) -> usize {
        written.min(self.capacity as u64) as usize
    }
}

impl RingBuffer<Event> {
    /// Events stamped within `duration` of the current wall clock.
    ///
    /// The filter trusts event timestamps to be close to their real
    /// production time; backdated or future-dated events fall outside the
    /// window regardless of when they were added.
    pub fn get_recent(&self, duration: Duration) -> Vec<Event> {
        self.get_recent_at(duration, Utc::now())
    }

    /// Events with `timestamp` in `[now - duration, now]`
    pub fn get_recent_at(&self, duration: Duration, now: DateTime<Utc>) -> Vec<Event> {
        let cutoff = now - duration;
        self.get_all()
            .into_iter()
            .filter(|event| event.timestamp() >= cutoff && event.timestamp() <= now)
            .collect()
    }
}
