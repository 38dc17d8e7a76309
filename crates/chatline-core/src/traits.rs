//! Collaborator traits for chatline
//!
//! The pipeline only ever talks to the outside world through these traits,
//! which keeps the concurrency logic testable with the doubles in
//! [`crate::mock`].
//!
//! ## Key Traits
//!
//! - [`ChatSource`]: Message-callback registration plus join/connect/disconnect
//! - [`ImagePredicate`]: Network-bound "is this an image" check
//! - [`ImageDescriber`]: Network-bound, cancellation-aware image description
//! - [`ResponseGenerator`]: Chat reply to an image description
//! - [`EventStore`]: All-or-nothing batch append and oldest-first queries

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::{EnrichError, SourceError, StorageError};
use crate::event::Event;

/// A message delivered by a chat source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Channel (streamer) the message was posted in
    pub channel: String,
    /// Login name of the sender
    pub author: String,
    /// Message text
    pub text: String,
    /// Time the message was received
    pub time: DateTime<Utc>,
}

impl ChatMessage {
    /// Convert into a chat event
    pub fn into_event(self) -> Event {
        Event::chat(self.channel, self.author, self.text, self.time)
    }
}

/// Callback invoked once per inbound message.
///
/// Runs on the source's read loop, so it must return promptly and never
/// block.
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

/// A live chat network
#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Register the message callback, replacing any previous one
    fn on_message(&self, handler: MessageHandler);

    /// Join channels. Channels joined before `connect` are joined once the
    /// connection is up.
    async fn join(&self, channels: &[String]) -> Result<(), SourceError>;

    /// Establish the connection and start delivering messages
    async fn connect(&self) -> Result<(), SourceError>;

    /// Tear down the connection. Idempotent.
    async fn disconnect(&self);

    /// Post `text` to `channel`
    async fn send_message(&self, channel: &str, text: &str) -> Result<(), SourceError>;
}

/// Decides whether a URL points at an image
#[async_trait]
pub trait ImagePredicate: Send + Sync {
    async fn is_image(&self, url: &str) -> Result<bool, EnrichError>;
}

/// Produces a text description of the image at a URL
#[async_trait]
pub trait ImageDescriber: Send + Sync {
    /// Describe the image at `url`.
    ///
    /// Implementations return [`EnrichError::Cancelled`] promptly once
    /// `cancel` fires.
    async fn describe(&self, url: &str, cancel: &CancellationToken)
    -> Result<String, EnrichError>;
}

/// Turns an image description into a chat reply
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    /// Same cancellation contract as [`ImageDescriber::describe`]
    async fn respond(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EnrichError>;
}

/// Durable event storage
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch atomically: either every event is stored or none is
    async fn append_batch(&self, events: &[Event]) -> Result<(), StorageError>;

    /// The newest `limit` events of `streamer`, oldest first
    async fn query(&self, streamer: &str, limit: usize) -> Result<Vec<Event>, StorageError>;

    /// The newest `limit` events across all streamers, oldest first
    async fn query_all(&self, limit: usize) -> Result<Vec<Event>, StorageError>;

    /// Events of `streamer` with `from <= timestamp <= to`, oldest first
    async fn query_range(
        &self,
        streamer: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Event>, StorageError>;

    /// Number of stored events for `streamer`
    async fn count(&self, streamer: &str) -> Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventKind;

    fn _assert_object_safe(
        _: &dyn ChatSource,
        _: &dyn ImagePredicate,
        _: &dyn ImageDescriber,
        _: &dyn ResponseGenerator,
        _: &dyn EventStore,
    ) {
    }

    #[test]
    fn test_chat_message_into_event() {
        let time = Utc::now();
        let msg = ChatMessage {
            channel: "forsen".to_string(),
            author: "user_1".to_string(),
            text: "hello".to_string(),
            time,
        };
        let event = msg.into_event();
        assert_eq!(event.kind(), EventKind::Chat);
        assert_eq!(event.streamer(), "forsen");
        assert_eq!(event.author(), Some("user_1"));
        assert_eq!(event.timestamp(), time);
    }
}
