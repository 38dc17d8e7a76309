//! Image enrichment fan-out
//!
//! For one chat event: find the links in its text and, one candidate at a
//! time, ask the [`ImagePredicate`] whether it is an image and the
//! [`ImageDescriber`] what it shows. Each description becomes an Image event
//! stamped just after its parent and goes back through the ingestion queue.
//!
//! The cancellation token is checked before every external call. Once it
//! fires the remaining candidates are skipped quietly. A failing candidate
//! is logged and skipped without affecting the others.

use std::sync::Arc;

use chatline_core::{
    CancellationToken, EnrichError, Event, EventKind, ImageDescriber, ImagePredicate, find_links,
};
use tracing::{debug, info, warn};

use crate::ingest::IngestQueue;

/// Outcome of enriching one event
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichSummary {
    /// Links found in the text
    pub candidates: usize,
    /// Links the predicate reported as images
    pub images: usize,
    /// Derived events accepted by the ingestion queue
    pub injected: usize,
    /// Candidates skipped after a predicate or description failure
    pub failures: usize,
    /// Whether cancellation cut the chain short
    pub cancelled: bool,
}

/// Derives Image events from chat links
pub struct Enricher {
    predicate: Arc<dyn ImagePredicate>,
    describer: Arc<dyn ImageDescriber>,
    queue: Arc<IngestQueue>,
    offset: chrono::Duration,
}

impl Enricher {
    pub fn new(
        predicate: Arc<dyn ImagePredicate>,
        describer: Arc<dyn ImageDescriber>,
        queue: Arc<IngestQueue>,
        offset: chrono::Duration,
    ) -> Self {
        Self {
            predicate,
            describer,
            queue,
            offset,
        }
    }

    /// Enrich `event`, re-injecting one Image event per described link
    pub async fn enrich(&self, event: &Event, cancel: &CancellationToken) -> EnrichSummary {
        let mut summary = EnrichSummary::default();
        if event.kind() != EventKind::Chat {
            return summary;
        }

        let links = find_links(event.content());
        summary.candidates = links.len();

        for url in &links {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            match self.check_candidate(event, url, cancel).await {
                Ok(Some(image)) => {
                    summary.images += 1;
                    match self.queue.add(image) {
                        Ok(()) => {
                            summary.injected += 1;
                            info!(streamer = %event.streamer(), %url, "Image described");
                        }
                        Err(e) => {
                            warn!(
                                streamer = %event.streamer(),
                                %url,
                                error = %e,
                                "Could not enqueue image event"
                            );
                        }
                    }
                }
                Ok(None) => {}
                Err(EnrichError::Cancelled) => {
                    summary.cancelled = true;
                    break;
                }
                Err(e) => {
                    summary.failures += 1;
                    warn!(
                        streamer = %event.streamer(),
                        %url,
                        error = %e,
                        "Link enrichment failed"
                    );
                }
            }
        }

        if summary.cancelled {
            debug!(
                streamer = %event.streamer(),
                candidates = summary.candidates,
                "Enrichment cancelled"
            );
        }
        summary
    }

    /// Predicate then description for one link. `Ok(None)` when the link is
    /// not an image.
    async fn check_candidate(
        &self,
        parent: &Event,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, EnrichError> {
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

        Ok(Some(parent.derive_image(description, self.offset)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_core::mock::{MockDescriber, StaticImagePredicate};
    use chrono::Utc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn enricher(
        predicate: StaticImagePredicate,
        describer: MockDescriber,
    ) -> (Enricher, Arc<StaticImagePredicate>, Arc<MockDescriber>, mpsc::Receiver<Event>) {
        let (queue, rx) = IngestQueue::new(16);
        let predicate = Arc::new(predicate);
        let describer = Arc::new(describer);
        let enricher = Enricher::new(
            predicate.clone(),
            describer.clone(),
            Arc::new(queue),
            chrono::Duration::milliseconds(1),
        );
        (enricher, predicate, describer, rx)
    }

    #[tokio::test]
    async fn test_only_images_are_described() {
        let (enricher, predicate, describer, mut rx) = enricher(
            StaticImagePredicate::new().with_image("https://i.imgur.com/cat.png"),
            MockDescriber::new(),
        );
        let parent = Event::chat(
            "forsen",
            "user_1",
            "look https://example.com/page and https://i.imgur.com/cat.png",
            Utc::now(),
        );

        let summary = enricher.enrich(&parent, &CancellationToken::new()).await;
        assert_eq!(summary.candidates, 2);
        assert_eq!(summary.images, 1);
        assert_eq!(summary.injected, 1);
        assert_eq!(predicate.calls().len(), 2);
        assert_eq!(describer.calls(), vec!["https://i.imgur.com/cat.png".to_string()]);

        let image = rx.recv().await.unwrap();
        assert_eq!(image.kind(), EventKind::Image);
        assert_eq!(image.content(), "description of https://i.imgur.com/cat.png");
        assert_eq!(image.author(), Some("user_1"));
        assert_eq!(
            image.timestamp(),
            parent.timestamp() + chrono::Duration::milliseconds(1)
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let (enricher, _predicate, _describer, mut rx) = enricher(
            StaticImagePredicate::new()
                .with_failure("https://down.io")
                .with_image("https://a.io/1.png")
                .with_image("https://a.io/2.png"),
            MockDescriber::new().with_failure("https://a.io/1.png"),
        );
        let parent = Event::chat(
            "forsen",
            "user",
            "https://down.io https://a.io/1.png https://a.io/2.png",
            Utc::now(),
        );

        let summary = enricher.enrich(&parent, &CancellationToken::new()).await;
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.injected, 1);
        assert_eq!(
            rx.recv().await.unwrap().content(),
            "description of https://a.io/2.png"
        );
    }

    #[tokio::test]
    async fn test_cancelled_token_makes_no_calls() {
        let (enricher, predicate, describer, _rx) = enricher(
            StaticImagePredicate::new().with_image("https://a.io/1.png"),
            MockDescriber::new(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let parent = Event::chat("forsen", "user", "https://a.io/1.png", Utc::now());
        let summary = enricher.enrich(&parent, &cancel).await;

        assert!(summary.cancelled);
        assert!(predicate.calls().is_empty());
        assert!(describer.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_description_stops_chain() {
        let (enricher, _predicate, describer, mut rx) = enricher(
            StaticImagePredicate::new()
                .with_image("https://a.io/1.png")
                .with_image("https://a.io/2.png"),
            MockDescriber::new().with_delay(Duration::from_secs(30)),
        );
        let cancel = CancellationToken::new();
        let parent = Event::chat(
            "forsen",
            "user",
            "https://a.io/1.png https://a.io/2.png",
            Utc::now(),
        );

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let summary = enricher.enrich(&parent, &cancel).await;
        assert!(summary.cancelled);
        assert_eq!(summary.injected, 0);
        assert_eq!(describer.calls().len(), 1);
        assert_eq!(describer.completed(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_non_chat_events_are_ignored() {
        let (enricher, predicate, _describer, _rx) =
            enricher(StaticImagePredicate::new(), MockDescriber::new());
        let marker = Event::monitoring_started("forsen.tv", Utc::now());

        let summary = enricher.enrich(&marker, &CancellationToken::new()).await;
        assert_eq!(summary, EnrichSummary::default());
        assert!(predicate.calls().is_empty());
    }
}
