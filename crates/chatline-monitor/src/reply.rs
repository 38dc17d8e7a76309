//! Reply mode
//!
//! Instead of recording chat, answer it. The first link of a message is
//! checked with the [`ImagePredicate`], described by the [`ImageDescriber`],
//! turned into a chat line by the [`ResponseGenerator`] and posted back to
//! the channel, addressed to the author. A message that mentions the bot
//! gets a fixed answer when it has no link or the link is not an image.
//!
//! Every answer runs on its own task so the source's read loop is never
//! held up by the HTTP round trips.

use std::sync::Arc;
use std::time::Duration;

use chatline_core::{
    CancellationToken, ChatMessage, ChatSource, EnrichError, ImageDescriber, ImagePredicate,
    ResponseGenerator, find_links,
};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::{ReplyConfig, normalize_channels};
use crate::error::{MonitorError, MonitorResult};

const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(2);

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyOutcome {
    /// Not addressed to the bot and no link
    Ignored,
    /// Mentioned without a link, fixed answer posted
    NoLink,
    /// Mentioned with a link that is not an image, fixed answer posted
    NotImage,
    /// Generated reply posted
    Replied(String),
    /// A collaborator failed; nothing was posted
    Failed,
    /// Shutdown cut the chain short
    Cancelled,
}

/// Answers image links in chat
pub struct ImageResponder {
    predicate: Arc<dyn ImagePredicate>,
    describer: Arc<dyn ImageDescriber>,
    responder: Arc<dyn ResponseGenerator>,
    source: Arc<dyn ChatSource>,
    config: ReplyConfig,
}

impl ImageResponder {
    pub fn new(
        predicate: Arc<dyn ImagePredicate>,
        describer: Arc<dyn ImageDescriber>,
        responder: Arc<dyn ResponseGenerator>,
        source: Arc<dyn ChatSource>,
        config: ReplyConfig,
    ) -> Self {
        Self {
            predicate,
            describer,
            responder,
            source,
            config,
        }
    }

    /// Whether `message` can lead to an answer at all
    pub fn is_candidate(&self, message: &ChatMessage) -> bool {
        self.mentions_bot(&message.text) || !find_links(&message.text).is_empty()
    }

    fn mentions_bot(&self, text: &str) -> bool {
        let mention = self.config.mention.trim().to_lowercase();
        !mention.is_empty() && text.to_lowercase().contains(&mention)
    }

    #[instrument(skip_all, fields(streamer = %message.channel, author = %message.author))]
    pub async fn handle(&self, message: &ChatMessage, cancel: &CancellationToken) -> ReplyOutcome {
        let mentioned = self.mentions_bot(&message.text);
        let links = find_links(&message.text);

        let Some(url) = links.first() else {
            if !mentioned {
                return ReplyOutcome::Ignored;
            }
            return self.post(message, &self.config.no_link_answer, ReplyOutcome::NoLink).await;
        };

        match self.answer_image(url, cancel).await {
            Ok(Some(reply)) => {
                let outcome = ReplyOutcome::Replied(reply.clone());
                self.post(message, &reply, outcome).await
            }
            Ok(None) if mentioned => {
                let answer = &self.config.not_image_answer;
                self.post(message, answer, ReplyOutcome::NotImage).await
            }
            Ok(None) => ReplyOutcome::Ignored,
            Err(EnrichError::Cancelled) => {
                debug!(%url, "Reply cancelled");
                ReplyOutcome::Cancelled
            }
            Err(e) => {
                warn!(%url, error = %e, "Could not answer image");
                ReplyOutcome::Failed
            }
        }
    }

    /// Predicate, description, then reply. `Ok(None)` when `url` is not an
    /// image.
    async fn answer_image(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<String>, EnrichError> {
        let is_image = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EnrichError::Cancelled),
            result = self.predicate.is_image(url) => result?,
        };
        if !is_image {
            debug!(%url, "Not an image");
            return Ok(None);
        }

        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }
        let description = self.describer.describe(url, cancel).await?;

        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }
        let reply = self.responder.respond(&description, cancel).await?;
        Ok(Some(reply))
    }

    async fn post(&self, to: &ChatMessage, text: &str, outcome: ReplyOutcome) -> ReplyOutcome {
        let line = format!("@{} {}", to.author, text.trim());
        match self.source.send_message(&to.channel, &line).await {
            Ok(()) => {
                info!(streamer = %to.channel, author = %to.author, "Replied in chat");
                outcome
            }
            Err(e) => {
                warn!(streamer = %to.channel, error = %e, "Could not post reply");
                ReplyOutcome::Failed
            }
        }
    }
}

/// Runs an [`ImageResponder`] against a live chat source
pub struct ReplyBot {
    source: Arc<dyn ChatSource>,
    responder: Arc<ImageResponder>,
    cancel: CancellationToken,
    stop_wait: Duration,
}

impl ReplyBot {
    pub fn new(source: Arc<dyn ChatSource>, responder: ImageResponder) -> Self {
        Self {
            source,
            responder: Arc::new(responder),
            cancel: CancellationToken::new(),
            stop_wait: DEFAULT_STOP_WAIT,
        }
    }

    /// Bound on waiting for in-flight answers at shutdown
    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait = wait;
        self
    }

    /// Answer chat in `channels` until [`ReplyBot::stop`] is called
    pub async fn run(&self, channels: &[String]) -> MonitorResult<()> {
        let channels = normalize_channels(channels);
        if channels.is_empty() {
            return Err(MonitorError::Config("no channels to reply in".to_string()));
        }

        let tracker = TaskTracker::new();
        let responder = Arc::clone(&self.responder);
        let cancel = self.cancel.clone();
        let tasks = tracker.clone();
        self.source.on_message(Arc::new(move |message: ChatMessage| {
            if cancel.is_cancelled() || !responder.is_candidate(&message) {
                return;
            }
            let responder = Arc::clone(&responder);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                responder.handle(&message, &cancel).await;
            });
        }));

        let connected = async {
            self.source.join(&channels).await?;
            self.source.connect().await
        };
        if let Err(e) = connected.await {
            self.source.disconnect().await;
            return Err(e.into());
        }
        info!(channels = ?channels, "Reply mode started");

        self.cancel.cancelled().await;
        self.source.disconnect().await;

        tracker.close();
        if tokio::time::timeout(self.stop_wait, tracker.wait())
            .await
            .is_err()
        {
            warn!(in_flight = tracker.len(), "Abandoning in-flight replies");
        }
        info!("Reply mode stopped");
        Ok(())
    }

    /// Request shutdown
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_core::mock::{MockChatSource, MockDescriber, MockResponder, StaticImagePredicate};
    use chrono::Utc;

    const CAT: &str = "https://i.imgur.com/cat.png";
    const PAGE: &str = "https://example.com/page";

    struct Fixture {
        source: Arc<MockChatSource>,
        describer: Arc<MockDescriber>,
        responder: ImageResponder,
    }

    async fn fixture(describer: MockDescriber, responder: MockResponder) -> Fixture {
        let source = Arc::new(MockChatSource::new());
        source.connect().await.unwrap();
        let describer = Arc::new(describer);
        let predicate = StaticImagePredicate::new().with_image(CAT);
        let responder = ImageResponder::new(
            Arc::new(predicate),
            describer.clone(),
            Arc::new(responder),
            source.clone(),
            ReplyConfig::default(),
        );
        Fixture {
            source,
            describer,
            responder,
        }
    }

    fn message(text: &str) -> ChatMessage {
        ChatMessage {
            channel: "forsen".to_string(),
            author: "user_1".to_string(),
            text: text.to_string(),
            time: Utc::now(),
        }
    }

    fn sent(source: &MockChatSource) -> Vec<String> {
        source.sent().into_iter().map(|(_, text)| text).collect()
    }

    #[tokio::test]
    async fn test_image_link_gets_generated_reply() {
        let f = fixture(MockDescriber::new(), MockResponder::new()).await;
        let cancel = CancellationToken::new();

        let outcome = f.responder.handle(&message(&format!("look {CAT}")), &cancel).await;

        let reply = format!("reply to description of {CAT}");
        assert_eq!(outcome, ReplyOutcome::Replied(reply.clone()));
        assert_eq!(
            f.source.sent(),
            vec![("forsen".to_string(), format!("@user_1 {reply}"))]
        );
    }

    #[tokio::test]
    async fn test_mentions_get_fixed_answers() {
        let f = fixture(MockDescriber::new(), MockResponder::new()).await;
        let cancel = CancellationToken::new();

        let outcome = f.responder.handle(&message("@Chatline hi"), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::NoLink);

        let text = format!("@chatline what is {PAGE}");
        let outcome = f.responder.handle(&message(&text), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::NotImage);

        assert_eq!(
            sent(&f.source),
            vec![
                "@user_1 I can only answer images for now",
                "@user_1 that's not an image"
            ]
        );
        assert!(f.describer.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unaddressed_chat_is_ignored() {
        let f = fixture(MockDescriber::new(), MockResponder::new()).await;
        let cancel = CancellationToken::new();

        assert!(!f.responder.is_candidate(&message("just chatting")));
        let outcome = f.responder.handle(&message("just chatting"), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::Ignored);

        let outcome = f.responder.handle(&message(&format!("see {PAGE}")), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::Ignored);
        assert!(f.source.sent().is_empty());
    }

    #[tokio::test]
    async fn test_collaborator_failure_posts_nothing() {
        let f = fixture(MockDescriber::new().with_failure(CAT), MockResponder::new()).await;
        let cancel = CancellationToken::new();
        let outcome = f.responder.handle(&message(CAT), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::Failed);

        let f = fixture(MockDescriber::new(), MockResponder::failing()).await;
        let outcome = f.responder.handle(&message(CAT), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::Failed);
        assert!(f.source.sent().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_describing() {
        let f = fixture(MockDescriber::new(), MockResponder::new()).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = f.responder.handle(&message(CAT), &cancel).await;
        assert_eq!(outcome, ReplyOutcome::Cancelled);
        assert!(f.describer.calls().is_empty());
        assert!(f.source.sent().is_empty());
    }

    #[tokio::test]
    async fn test_bot_answers_until_stopped() {
        let source = Arc::new(MockChatSource::new());
        let responder = ImageResponder::new(
            Arc::new(StaticImagePredicate::new().with_image(CAT)),
            Arc::new(MockDescriber::new()),
            Arc::new(MockResponder::new()),
            source.clone(),
            ReplyConfig::default(),
        );
        let bot = Arc::new(ReplyBot::new(source.clone(), responder));

        let runner = Arc::clone(&bot);
        let channels = vec!["#Forsen".to_string()];
        let handle = tokio::spawn(async move { runner.run(&channels).await });

        tokio::time::timeout(Duration::from_secs(2), async {
            while !source.is_connected() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(source.joined(), vec!["forsen"]);

        assert!(source.say("forsen", "user_1", CAT));
        tokio::time::timeout(Duration::from_secs(2), async {
            while source.sent().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        bot.stop();
        handle.await.unwrap().unwrap();
        assert_eq!(source.disconnect_count(), 1);
        assert_eq!(sent(&source), vec![format!("@user_1 reply to description of {CAT}")]);
    }

    #[tokio::test]
    async fn test_bot_reports_connect_failure() {
        let source = Arc::new(MockChatSource::new());
        source.fail_connect(true);
        let responder = ImageResponder::new(
            Arc::new(StaticImagePredicate::new()),
            Arc::new(MockDescriber::new()),
            Arc::new(MockResponder::new()),
            source.clone(),
            ReplyConfig::default(),
        );
        let bot = ReplyBot::new(source.clone(), responder);

        let result = bot.run(&["forsen".to_string()]).await;
        assert!(matches!(result, Err(MonitorError::Source(_))));
        assert!(matches!(bot.run(&[]).await, Err(MonitorError::Config(_))));
    }
}
