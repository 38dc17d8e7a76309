//! redb-backed event store
//!
//! Events live in a single table keyed by `(timestamp, sequence)` so a plain
//! key scan yields global timestamp order. A second table indexes the same
//! keys by streamer for per-channel queries.
//!
//! ## Key layout
//!
//! - `EVENTS`: `ts(8) ++ seq(8)` -> postcard-encoded [`Event`]
//! - `STREAMER_INDEX`: `streamer ++ 0x00 ++ ts(8) ++ seq(8)` -> empty
//! - `META`: `"next_seq"` -> first unused sequence number
//!
//! `ts` is the timestamp in nanoseconds with the sign bit flipped, stored
//! big-endian, so byte order matches chronological order. `seq` breaks ties
//! between events sharing a timestamp and preserves their append order.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chatline_core::{Event, EventStore, StorageError};
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use tracing::{debug, info, instrument};

// Key: ts ++ seq, Value: serialized Event
pub const EVENTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("events");

// Key: streamer ++ 0x00 ++ ts ++ seq, Value: empty
pub const STREAMER_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("streamer_index");

// Key: metadata name, Value: u64
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const NEXT_SEQ: &str = "next_seq";
const EVENT_KEY_LEN: usize = 16;
const STREAMER_SEPARATOR: u8 = 0x00;
const EMPTY: &[u8] = &[];

/// Configuration for the redb event store
#[derive(Debug, Clone)]
pub struct RedbStorageConfig {
    /// Path to the database file
    pub db_path: PathBuf,
}

impl Default for RedbStorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./data/chatline.redb"),
        }
    }
}

/// Durable [`EventStore`] on top of redb
///
/// All database work runs on the blocking pool; each `append_batch` is a
/// single write transaction, so a batch is stored completely or not at all.
#[derive(Clone)]
pub struct RedbEventStore {
    db: Arc<Database>,
    next_seq: Arc<AtomicU64>,
    config: RedbStorageConfig,
}

impl RedbEventStore {
    /// Open or create the database
    #[instrument(skip(config), fields(path = %config.db_path.display()))]
    pub fn open(config: RedbStorageConfig) -> Result<Self, StorageError> {
        // Ensure parent directory exists
        if let Some(parent) = config.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Database::create(&config.db_path).map_err(StorageError::database)?;
        let next_seq = init_tables(&db)?;

        info!(next_seq, "Opened event database");

        Ok(Self {
            db: Arc::new(db),
            next_seq: Arc::new(AtomicU64::new(next_seq)),
            config,
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &RedbStorageConfig {
        &self.config
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(StorageError::database)?
    }
}

/// Create tables if missing and return the next free sequence number
fn init_tables(db: &Database) -> Result<u64, StorageError> {
    let write_txn = db.begin_write().map_err(StorageError::database)?;
    let next_seq = {
        write_txn
            .open_table(EVENTS)
            .map_err(StorageError::database)?;
        write_txn
            .open_table(STREAMER_INDEX)
            .map_err(StorageError::database)?;
        let meta = write_txn
            .open_table(META)
            .map_err(StorageError::database)?;

        meta.get(NEXT_SEQ)
            .map_err(StorageError::database)?
            .map(|v| v.value())
            .unwrap_or(0)
    };
    write_txn.commit().map_err(StorageError::database)?;

    debug!("Initialized event tables");
    Ok(next_seq)
}

/// Order-preserving encoding of a timestamp
fn timestamp_bytes(ts: DateTime<Utc>) -> [u8; 8] {
    let nanos = ts.timestamp_nanos_opt().unwrap_or(if ts.timestamp() < 0 {
        i64::MIN
    } else {
        i64::MAX
    });
    ((nanos as u64) ^ (1 << 63)).to_be_bytes()
}

fn event_key(ts: DateTime<Utc>, seq: u64) -> [u8; EVENT_KEY_LEN] {
    let mut key = [0u8; EVENT_KEY_LEN];
    key[..8].copy_from_slice(&timestamp_bytes(ts));
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

fn streamer_prefix(streamer: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(streamer.len() + 1 + EVENT_KEY_LEN);
    prefix.extend_from_slice(streamer.as_bytes());
    prefix.push(STREAMER_SEPARATOR);
    prefix
}

/// Exclusive upper bound of every index key for `streamer`
fn streamer_prefix_end(streamer: &str) -> Vec<u8> {
    let mut end = streamer.as_bytes().to_vec();
    end.push(STREAMER_SEPARATOR + 1);
    end
}

fn index_key(streamer: &str, key: &[u8]) -> Vec<u8> {
    let mut index = streamer_prefix(streamer);
    index.extend_from_slice(key);
    index
}

fn encode(event: &Event) -> Result<Vec<u8>, StorageError> {
    postcard::to_allocvec(event).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> Result<Event, StorageError> {
    postcard::from_bytes(bytes).map_err(|e| StorageError::Deserialization(e.to_string()))
}

/// Resolve index entries (newest first or oldest first, as given) to events
fn load_indexed(db: &Database, index_keys: Vec<Vec<u8>>) -> Result<Vec<Event>, StorageError> {
    let read_txn = db.begin_read().map_err(StorageError::database)?;
    let events = read_txn
        .open_table(EVENTS)
        .map_err(StorageError::database)?;

    let mut out = Vec::with_capacity(index_keys.len());
    for index in index_keys {
        let key = &index[index.len() - EVENT_KEY_LEN..];
        let value = events
            .get(key)
            .map_err(StorageError::database)?
            .ok_or_else(|| StorageError::NotFound(format!("indexed event {key:02x?}")))?;
        out.push(decode(value.value())?);
    }
    Ok(out)
}

#[async_trait]
impl EventStore for RedbEventStore {
    async fn append_batch(&self, events: &[Event]) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let first_seq = self
            .next_seq
            .fetch_add(events.len() as u64, Ordering::SeqCst);
        let mut rows = Vec::with_capacity(events.len());
        for (offset, event) in events.iter().enumerate() {
            let key = event_key(event.timestamp(), first_seq + offset as u64);
            rows.push((key, index_key(event.streamer(), &key), encode(event)?));
        }

        let count = rows.len();
        let next_seq = first_seq + count as u64;
        self.blocking(move |db| {
            let write_txn = db.begin_write().map_err(StorageError::database)?;
            {
                let mut table = write_txn
                    .open_table(EVENTS)
                    .map_err(StorageError::database)?;
                let mut index = write_txn
                    .open_table(STREAMER_INDEX)
                    .map_err(StorageError::database)?;

                let mut meta = write_txn
                    .open_table(META)
                    .map_err(StorageError::database)?;

                for (key, index_key, value) in &rows {
                    table
                        .insert(key.as_slice(), value.as_slice())
                        .map_err(StorageError::database)?;
                    index
                        .insert(index_key.as_slice(), EMPTY)
                        .map_err(StorageError::database)?;
                }

                // Concurrent appends may commit out of allocation order
                let stored = meta
                    .get(NEXT_SEQ)
                    .map_err(StorageError::database)?
                    .map(|v| v.value())
                    .unwrap_or(0);
                meta.insert(NEXT_SEQ, stored.max(next_seq))
                    .map_err(StorageError::database)?;
            }
            write_txn.commit().map_err(StorageError::database)
        })
        .await?;

        debug!(count, first_seq, "Appended batch");
        Ok(())
    }

    async fn query(&self, streamer: &str, limit: usize) -> Result<Vec<Event>, StorageError> {
        let start = streamer_prefix(streamer);
        let end = streamer_prefix_end(streamer);

        self.blocking(move |db| {
            let keys = {
                let read_txn = db.begin_read().map_err(StorageError::database)?;
                let index = read_txn
                    .open_table(STREAMER_INDEX)
                    .map_err(StorageError::database)?;

                let mut keys = Vec::new();
                for entry in index
                    .range(start.as_slice()..end.as_slice())
                    .map_err(StorageError::database)?
                    .rev()
                    .take(limit)
                {
                    let (key, _) = entry.map_err(StorageError::database)?;
                    keys.push(key.value().to_vec());
                }
                keys.reverse();
                keys
            };
            load_indexed(db, keys)
        })
        .await
    }

    async fn query_all(&self, limit: usize) -> Result<Vec<Event>, StorageError> {
        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(StorageError::database)?;
            let table = read_txn
                .open_table(EVENTS)
                .map_err(StorageError::database)?;

            let mut out = Vec::new();
            for entry in table
                .iter()
                .map_err(StorageError::database)?
                .rev()
                .take(limit)
            {
                let (_, value) = entry.map_err(StorageError::database)?;
                out.push(decode(value.value())?);
            }
            out.reverse();
            Ok(out)
        })
        .await
    }

    async fn query_range(
        &self,
        streamer: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError> {
        if from > to {
            return Ok(Vec::new());
        }
        let start = index_key(streamer, &event_key(from, 0));
        let end = index_key(streamer, &event_key(to, u64::MAX));

        self.blocking(move |db| {
            let keys = {
                let read_txn = db.begin_read().map_err(StorageError::database)?;
                let index = read_txn
                    .open_table(STREAMER_INDEX)
                    .map_err(StorageError::database)?;

                let mut keys = Vec::new();
                for entry in index
                    .range(start.as_slice()..=end.as_slice())
                    .map_err(StorageError::database)?
                {
                    let (key, _) = entry.map_err(StorageError::database)?;
                    keys.push(key.value().to_vec());
                }
                keys
            };
            load_indexed(db, keys)
        })
        .await
    }

    async fn count(&self, streamer: &str) -> Result<u64, StorageError> {
        let start = streamer_prefix(streamer);
        let end = streamer_prefix_end(streamer);

        self.blocking(move |db| {
            let read_txn = db.begin_read().map_err(StorageError::database)?;
            let index = read_txn
                .open_table(STREAMER_INDEX)
                .map_err(StorageError::database)?;

            let mut count = 0u64;
            for entry in index
                .range(start.as_slice()..end.as_slice())
                .map_err(StorageError::database)?
            {
                entry.map_err(StorageError::database)?;
                count += 1;
            }
            Ok(count)
        })
        .await
    }
}

impl RedbEventStore {
    /// Total number of stored events across all streamers
    pub async fn len(&self) -> Result<u64, StorageError> {
        self.blocking(|db| {
            let read_txn = db.begin_read().map_err(StorageError::database)?;
            let table = read_txn
                .open_table(EVENTS)
                .map_err(StorageError::database)?;
            table.len().map_err(StorageError::database)
        })
        .await
    }
}
