//! # Chatline Core
//!
//! Core traits, types, and errors for the chatline stack.
//!
//! This crate holds everything the ingestion pipeline needs that does not
//! touch the network or the disk, so the same pipeline logic can run against
//! real collaborators (IRC, HTTP, redb) and against the in-process doubles in
//! [`mock`].
//!
//! ## Key Traits
//!
//! - [`ChatSource`]: Live chat network exposing a message callback
//! - [`ImagePredicate`]: "Is this URL an image?"
//! - [`ImageDescriber`]: "Describe the image at this URL"
//! - [`ResponseGenerator`]: "What should the bot say about it?"
//! - [`EventStore`]: Bulk append and query of persisted events
//!
//! ## Key Types
//!
//! - [`Event`]: A timestamped unit of observed activity
//! - [`RingBuffer`]: Fixed-capacity store of the most recent events
//! - [`find_links`]: Link extraction used by the enrichment fan-out

pub mod error;
pub mod event;
pub mod links;
pub mod mock;
pub mod ring;
pub mod traits;

// Re-export main types
pub use error::*;
pub use event::*;
pub use links::find_links;
pub use ring::RingBuffer;
pub use traits::*;

// Cancellation is threaded through every collaborator call that can block.
pub use tokio_util::sync::CancellationToken;
