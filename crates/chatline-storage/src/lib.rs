//! # Chatline Storage
//!
//! Storage backends for persisted chat timelines.
//!
//! Both backends implement [`EventStore`] from `chatline-core`, which the
//! batch persistence worker writes through.
//!
//! ## Features
//!
//! - **InMemoryEventStore**: In-memory implementation for testing, with
//!   injectable append failures
//! - **RedbEventStore**: redb-backed implementation for production, with a
//!   per-streamer time index
//! - **export**: Render stored events to plain-text log files
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatline_storage::{RedbEventStore, RedbStorageConfig};
//! use chatline_core::{Event, EventStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedbEventStore::open(RedbStorageConfig::default()).unwrap();
//!     let event = Event::chat("forsen", "user_1", "hello", chrono::Utc::now());
//!
//!     store.append_batch(&[event]).await.unwrap();
//!
//!     let last = store.query("forsen", 15).await.unwrap();
//!     assert_eq!(last.len(), 1);
//! }
//! ```

pub mod export;
pub mod memory;
pub mod redb_store;

// Re-exports
pub use export::{export_events, export_file_name, export_last, export_range};
pub use memory::InMemoryEventStore;
pub use redb_store::{RedbEventStore, RedbStorageConfig};

// Re-export the storage contract from chatline-core for convenience
pub use chatline_core::{EventStore, StorageError};
