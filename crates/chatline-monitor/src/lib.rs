//! # Chatline Monitor
//!
//! Watches live chat channels and keeps a timeline of what was said.
//!
//! Every chat message becomes an [`Event`](chatline_core::Event) that flows
//! through a bounded ingestion queue into a fixed-size in-memory timeline and
//! on to a batch worker that persists it through an
//! [`EventStore`](chatline_core::EventStore). Links in chat can optionally be
//! checked for images and described, with the description re-injected as an
//! Image event right after its parent.
//!
//! ## Modules
//!
//! - [`monitor`]: lifecycle controller tying the pipeline together
//! - [`ingest`]: bounded, non-blocking ingestion queue
//! - [`timeline`]: ring buffer of recent events and its writer task
//! - [`batch`]: size/interval/close triggered batch persistence
//! - [`enrich`]: link-to-image-description fan-out
//! - [`irc`]: Twitch chat source over IRC
//! - [`reply`]: reply mode answering image links in chat
//! - [`config`]: TOML + environment configuration
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use chatline_monitor::{Monitor, MonitorConfig};
//! use chatline_core::mock::MockChatSource;
//! use chatline_storage::InMemoryEventStore;
//!
//! let monitor = Arc::new(Monitor::new(
//!     MonitorConfig::default(),
//!     Arc::new(MockChatSource::new()),
//!     Arc::new(InMemoryEventStore::new()),
//! ));
//!
//! let runner = Arc::clone(&monitor);
//! tokio::spawn(async move { runner.start(&["forsen".to_string()]).await });
//! // ...
//! monitor.stop();
//! ```

pub mod batch;
pub mod cli;
pub mod config;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod irc;
pub mod monitor;
pub mod reply;
pub mod timeline;

pub use batch::{BatchSender, BatchStats, BatchStatsSnapshot, BatchWorker, batch_channel};
pub use config::{
    AppConfig, MonitorConfig, ReplyConfig, StorageConfig, TwitchConfig, normalize_channel,
    normalize_channels,
};
pub use enrich::{EnrichSummary, Enricher};
pub use error::{MonitorError, MonitorResult};
pub use ingest::IngestQueue;
pub use irc::{TwitchIrcSource, parse_privmsg};
pub use monitor::{LifecycleState, Monitor};
pub use reply::{ImageResponder, ReplyBot, ReplyOutcome};
pub use timeline::Timeline;
