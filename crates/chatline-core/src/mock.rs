//! In-process collaborator doubles
//!
//! These stand in for the chat network and the HTTP enrichment services in
//! tests. Each double records the calls it received so tests can assert on
//! the exact sequence the pipeline produced.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::error::{EnrichError, SourceError};
use crate::traits::{
    ChatMessage, ChatSource, ImageDescriber, ImagePredicate, MessageHandler, ResponseGenerator,
};

/// Chat source driven by the test through [`MockChatSource::emit`]
#[derive(Default)]
pub struct MockChatSource {
    handler: Mutex<Option<MessageHandler>>,
    joined: Mutex<Vec<String>>,
    sent: Mutex<Vec<(String, String)>>,
    connected: AtomicBool,
    fail_connect: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockChatSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `connect` calls fail
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Deliver a message to the registered handler, as the network read
    /// loop would. Returns false when nothing is registered or the source
    /// is not connected.
    pub fn emit(&self, message: ChatMessage) -> bool {
        if !self.is_connected() {
            return false;
        }
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }

    /// Convenience wrapper around [`MockChatSource::emit`] stamped with the
    /// current time
    pub fn say(&self, channel: &str, author: &str, text: &str) -> bool {
        self.emit(ChatMessage {
            channel: channel.to_string(),
            author: author.to_string(),
            text: text.to_string(),
            time: Utc::now(),
        })
    }

    pub fn joined(&self) -> Vec<String> {
        self.joined.lock().clone()
    }

    /// `(channel, text)` pairs posted through `send_message`
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn has_handler(&self) -> bool {
        self.handler.lock().is_some()
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatSource for MockChatSource {
    fn on_message(&self, handler: MessageHandler) {
        *self.handler.lock() = Some(handler);
    }

    async fn join(&self, channels: &[String]) -> Result<(), SourceError> {
        self.joined.lock().extend(channels.iter().cloned());
        Ok(())
    }

    async fn connect(&self) -> Result<(), SourceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(SourceError::ConnectionFailed("mock refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), SourceError> {
        if !self.is_connected() {
            return Err(SourceError::NotConnected);
        }
        self.sent.lock().push((channel.to_string(), text.to_string()));
        Ok(())
    }
}

/// Image predicate answering from fixed URL sets
#[derive(Default)]
pub struct StaticImagePredicate {
    images: HashSet<String>,
    failing: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl StaticImagePredicate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `url` as an image
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.images.insert(url.into());
        self
    }

    /// Fail the check for `url`
    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    /// URLs checked so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ImagePredicate for StaticImagePredicate {
    async fn is_image(&self, url: &str) -> Result<bool, EnrichError> {
        self.calls.lock().push(url.to_string());
        if self.failing.contains(url) {
            return Err(EnrichError::Http(format!("mock failure for {url}")));
        }
        Ok(self.images.contains(url))
    }
}

/// Describer returning `description of <url>`
#[derive(Default)]
pub struct MockDescriber {
    failing: HashSet<String>,
    delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
    completed: AtomicUsize,
}

impl MockDescriber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail descriptions of `url`
    pub fn with_failure(mut self, url: impl Into<String>) -> Self {
        self.failing.insert(url.into());
        self
    }

    /// Take `delay` per description, aborting early on cancellation
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// URLs described so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of descriptions that ran to completion
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageDescriber for MockDescriber {
    async fn describe(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EnrichError> {
        self.calls.lock().push(url.to_string());

        if let Some(delay) = self.delay {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    trace!(url, "mock description cancelled");
                    return Err(EnrichError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if self.failing.contains(url) {
            return Err(EnrichError::Status {
                status: 500,
                body: format!("mock failure for {url}"),
            });
        }

        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(format!("description of {url}"))
    }
}

/// Responder answering `reply to <description>`
#[derive(Default)]
pub struct MockResponder {
    failing: bool,
    calls: Mutex<Vec<String>>,
}

impl MockResponder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every response
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    /// Descriptions answered so far
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ResponseGenerator for MockResponder {
    async fn respond(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EnrichError> {
        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }
        self.calls.lock().push(description.to_string());
        if self.failing {
            return Err(EnrichError::EmptyResponse);
        }
        Ok(format!("reply to {description}"))
    }
}
