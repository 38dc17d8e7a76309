//! Image detection by `HEAD` request

use std::time::Duration;

use async_trait::async_trait;
use chatline_core::{EnrichError, ImagePredicate};
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Configuration for [`HeadImagePredicate`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Per-request timeout in seconds
    pub timeout_secs: u64,
    /// `User-Agent` sent with each probe
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            user_agent: concat!("chatline/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Prefix scheme-less links (`www.x.com`, `x.com/a.png`) with `https://`
pub fn normalize_url(url: &str) -> String {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        url.to_string()
    } else {
        format!("https://{url}")
    }
}

/// Reports a URL as an image when a `HEAD` to it answers `Content-Type: image/*`
#[derive(Debug, Clone)]
pub struct HeadImagePredicate {
    client: reqwest::Client,
}

impl HeadImagePredicate {
    pub fn new(config: &ProbeConfig) -> Result<Self, EnrichError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| EnrichError::Http(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ImagePredicate for HeadImagePredicate {
    #[instrument(skip(self))]
    async fn is_image(&self, url: &str) -> Result<bool, EnrichError> {
        let url = normalize_url(url);
        let parsed = reqwest::Url::parse(&url).map_err(|_| EnrichError::InvalidUrl(url.clone()))?;

        let response = self
            .client
            .head(parsed)
            .send()
            .await
            .map_err(|e| EnrichError::Http(e.to_string()))?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let is_image = is_image_content_type(content_type);

        debug!(%url, content_type, is_image, "Probed link");
        Ok(is_image)
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    content_type
        .trim_start()
        .to_ascii_lowercase()
        .starts_with("image/")
}
