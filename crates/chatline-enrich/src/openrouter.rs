//! Image description and chat replies through an OpenAI-compatible
//! chat-completions API
//!
//! Defaults target OpenRouter, which requires the `HTTP-Referer` and
//! `X-Title` attribution headers alongside the bearer token.

use std::time::Duration;

use async_trait::async_trait;
use chatline_core::{CancellationToken, EnrichError, ImageDescriber, ResponseGenerator};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::probe::normalize_url;

/// Configuration for [`OpenRouterDescriber`] and [`OpenRouterResponder`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    /// API base, without the trailing `/chat/completions`
    pub base_url: String,
    /// Vision model identifier
    pub model: String,
    /// Instruction sent alongside the image
    pub prompt: String,
    /// Text model used for chat replies
    pub reply_model: String,
    /// System prompt for chat replies; the description is the user turn
    pub reply_prompt: String,
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// Value of the `HTTP-Referer` attribution header
    pub referer: String,
    /// Value of the `X-Title` attribution header
    pub title: String,
    /// Bearer token. Never read from config files.
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            model: "google/gemini-2.5-flash-lite-preview-06-17".to_string(),
            prompt: "Describe this image in one or two short sentences.".to_string(),
            reply_model: "deepseek/deepseek-chat".to_string(),
            reply_prompt: "You are a chat bot in a Twitch channel. You are given the \
                           description of an image someone posted. React to it in one \
                           short, casual chat message without quoting the description."
                .to_string(),
            timeout_secs: 60,
            referer: "https://github.com/chatline/chatline".to_string(),
            title: "chatline".to_string(),
            api_key: None,
        }
    }
}

impl OpenRouterConfig {
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<CompletionMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct CompletionMessage<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

impl<'a> CompletionMessage<'a> {
    fn text(role: &'static str, text: &'a str) -> Self {
        Self {
            role,
            content: vec![ContentPart::Text { text }],
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

fn build_request<'a>(model: &'a str, prompt: &'a str, url: &str) -> CompletionRequest<'a> {
    CompletionRequest {
        model,
        messages: vec![CompletionMessage {
            role: "user",
            content: vec![
                ContentPart::Text { text: prompt },
                ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: normalize_url(url),
                    },
                },
            ],
        }],
    }
}

fn build_reply_request<'a>(
    model: &'a str,
    system: &'a str,
    description: &'a str,
) -> CompletionRequest<'a> {
    CompletionRequest {
        model,
        messages: vec![
            CompletionMessage::text("system", system),
            CompletionMessage::text("user", description),
        ],
    }
}

/// First non-blank choice of a completion response
fn first_description(response: CompletionResponse) -> Result<String, EnrichError> {
    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.content)
        .map(|content| content.trim().to_string())
        .find(|content| !content.is_empty())
        .ok_or(EnrichError::EmptyResponse)
}

/// Authenticated chat-completions client shared by the describer and the
/// responder
#[derive(Debug, Clone)]
struct CompletionClient {
    client: reqwest::Client,
    config: OpenRouterConfig,
    api_key: String,
}

impl CompletionClient {
    fn new(config: OpenRouterConfig) -> Result<Self, EnrichError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| EnrichError::Http("missing OpenRouter API key".to_string()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EnrichError::Http(e.to_string()))?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    async fn complete(&self, body: &CompletionRequest<'_>) -> Result<String, EnrichError> {
        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.config.referer)
            .header("X-Title", &self.config.title)
            .json(body)
            .send()
            .await
            .map_err(|e| EnrichError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EnrichError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let completion: CompletionResponse = response
            .json()
            .await
            .map_err(|e| EnrichError::Http(format!("invalid completion response: {e}")))?;
        first_description(completion)
    }
}

/// [`ImageDescriber`] backed by a chat-completions vision model
#[derive(Debug, Clone)]
pub struct OpenRouterDescriber {
    inner: CompletionClient,
}

impl OpenRouterDescriber {
    /// Build a describer. Fails when no API key is configured.
    pub fn new(config: OpenRouterConfig) -> Result<Self, EnrichError> {
        Ok(Self {
            inner: CompletionClient::new(config)?,
        })
    }

    pub fn config(&self) -> &OpenRouterConfig {
        &self.inner.config
    }

    async fn request(&self, url: &str) -> Result<String, EnrichError> {
        let config = &self.inner.config;
        let body = build_request(&config.model, &config.prompt, url);
        self.inner.complete(&body).await
    }
}

#[async_trait]
impl ImageDescriber for OpenRouterDescriber {
    #[instrument(skip(self, cancel), fields(model = %self.inner.config.model))]
    async fn describe(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EnrichError> {
        let description = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EnrichError::Cancelled),
            result = self.request(url) => result?,
        };
        debug!(len = description.len(), "Received image description");
        Ok(description)
    }
}

/// [`ResponseGenerator`] backed by a chat-completions text model
#[derive(Debug, Clone)]
pub struct OpenRouterResponder {
    inner: CompletionClient,
}

impl OpenRouterResponder {
    /// Build a responder. Fails when no API key is configured.
    pub fn new(config: OpenRouterConfig) -> Result<Self, EnrichError> {
        Ok(Self {
            inner: CompletionClient::new(config)?,
        })
    }
}

#[async_trait]
impl ResponseGenerator for OpenRouterResponder {
    #[instrument(skip_all, fields(model = %self.inner.config.reply_model))]
    async fn respond(
        &self,
        description: &str,
        cancel: &CancellationToken,
    ) -> Result<String, EnrichError> {
        let config = &self.inner.config;
        let body = build_reply_request(&config.reply_model, &config.reply_prompt, description);
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EnrichError::Cancelled),
            result = self.inner.complete(&body) => result?,
        };
        debug!(len = reply.len(), "Received chat reply");
        Ok(reply)
    }
}
