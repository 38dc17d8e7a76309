//! Configuration for the monitor
//!
//! [`AppConfig`] is built once at startup, from an optional TOML file plus
//! credentials taken from the environment, and handed to every component by
//! reference. Nothing reads configuration after that point.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chatline_enrich::{OpenRouterConfig, ProbeConfig};
use chatline_logging::LogConfig;
use chatline_storage::RedbStorageConfig;
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

/// Environment variable holding the OpenRouter API key
pub const OPENROUTER_TOKEN_ENV: &str = "OPENROUTER_TOKEN";

/// Environment variable holding the Twitch OAuth token
pub const TWITCH_TOKEN_ENV: &str = "TWITCH_ACCESS_TOKEN";

/// Upper bound for `image_offset_ms`. A derived image must stay adjacent to
/// its parent.
pub const MAX_IMAGE_OFFSET_MS: u64 = 1_000;

/// Pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Events retained in memory for the read API
    pub ring_capacity: usize,
    /// Ingestion queue capacity; events beyond it are dropped
    pub ingest_capacity: usize,
    /// Events waiting for the batch worker; beyond it they are not stored
    pub persist_capacity: usize,
    /// Events per storage append
    pub batch_size: usize,
    /// Flush period for partially filled batches
    pub flush_interval_ms: u64,
    /// Pause between enqueuing the stop markers and closing ingestion
    pub shutdown_grace_ms: u64,
    /// Timestamp offset of a derived image event from its parent
    pub image_offset_ms: u64,
    /// How long shutdown waits for in-flight enrichment
    pub enrichment_wait_ms: u64,
    /// Describe images linked from chat
    pub enrich_images: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1000,
            ingest_capacity: 100,
            persist_capacity: 500,
            batch_size: 50,
            flush_interval_ms: 15_000,
            shutdown_grace_ms: 100,
            image_offset_ms: 1,
            enrichment_wait_ms: 2_000,
            enrich_images: false,
        }
    }
}

impl MonitorConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn enrichment_wait(&self) -> Duration {
        Duration::from_millis(self.enrichment_wait_ms)
    }

    /// Offset of a derived image event, clamped to [`MAX_IMAGE_OFFSET_MS`]
    pub fn image_offset(&self) -> chrono::Duration {
        let millis = self.image_offset_ms.clamp(1, MAX_IMAGE_OFFSET_MS);
        chrono::Duration::milliseconds(millis as i64)
    }

    /// Set the ring buffer capacity
    pub fn with_ring_capacity(mut self, capacity: usize) -> Self {
        self.ring_capacity = capacity;
        self
    }

    /// Set the ingestion queue capacity
    pub fn with_ingest_capacity(mut self, capacity: usize) -> Self {
        self.ingest_capacity = capacity;
        self
    }

    /// Set the persistence backlog capacity
    pub fn with_persist_capacity(mut self, capacity: usize) -> Self {
        self.persist_capacity = capacity;
        self
    }

    /// Set the offset of derived image events
    pub fn with_image_offset(mut self, offset: Duration) -> Self {
        self.image_offset_ms = offset.as_millis() as u64;
        self
    }

    /// Set the batch size threshold
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the flush interval
    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the shutdown grace period
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Set the bound on waiting for in-flight enrichment at shutdown
    pub fn with_enrichment_wait(mut self, wait: Duration) -> Self {
        self.enrichment_wait_ms = wait.as_millis() as u64;
        self
    }

    /// Enable or disable image enrichment
    pub fn with_image_enrichment(mut self, enabled: bool) -> Self {
        self.enrich_images = enabled;
        self
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> MonitorResult<()> {
        let checks = [
            (self.ring_capacity == 0, "ring_capacity must be positive"),
            (self.ingest_capacity == 0, "ingest_capacity must be positive"),
            (self.persist_capacity == 0, "persist_capacity must be positive"),
            (self.batch_size == 0, "batch_size must be positive"),
            (self.flush_interval_ms == 0, "flush_interval_ms must be positive"),
            (self.image_offset_ms == 0, "image_offset_ms must be positive"),
            (
                self.image_offset_ms > MAX_IMAGE_OFFSET_MS,
                "image_offset_ms must be at most 1000",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, reason)) => Err(MonitorError::Config(reason.to_string())),
            None => Ok(()),
        }
    }
}

/// Storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file
    pub db_path: PathBuf,
    /// Default directory for `export`
    pub export_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: RedbStorageConfig::default().db_path,
            export_dir: PathBuf::from("./logs/chat"),
        }
    }
}

impl StorageConfig {
    pub fn redb(&self) -> RedbStorageConfig {
        RedbStorageConfig {
            db_path: self.db_path.clone(),
        }
    }
}

/// Twitch IRC connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub host: String,
    pub port: u16,
    /// Login name. Anonymous (read-only) login when unset.
    pub nick: Option<String>,
    /// Channels monitored when none are given on the command line
    pub channels: Vec<String>,
    /// OAuth token, from the environment only
    #[serde(skip)]
    pub access_token: Option<String>,
    /// First delay before reconnecting after the server drops us
    pub reconnect_delay_ms: u64,
    /// Cap on the doubling reconnect delay
    pub max_reconnect_delay_ms: u64,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".to_string(),
            port: 6667,
            nick: None,
            channels: Vec::new(),
            access_token: None,
            reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
        }
    }
}

impl TwitchConfig {
    /// Delay before reconnect attempt `attempt` (zero based), doubling up to
    /// the configured cap
    pub fn reconnect_delay(&self, attempt: u32) -> Duration {
        let base = self.reconnect_delay_ms.max(1);
        let delay = base.saturating_mul(1u64 << attempt.min(16));
        Duration::from_millis(delay.min(self.max_reconnect_delay_ms.max(base)))
    }
}

/// Behaviour of the `reply` mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyConfig {
    /// Mention that addresses the bot, matched case-insensitively
    pub mention: String,
    /// Answer to a mention without any link
    pub no_link_answer: String,
    /// Answer to a mention whose link is not an image
    pub not_image_answer: String,
}

impl Default for ReplyConfig {
    fn default() -> Self {
        Self {
            mention: "@chatline".to_string(),
            no_link_answer: "I can only answer images for now".to_string(),
            not_image_answer: "that's not an image".to_string(),
        }
    }
}

/// Everything the binary needs, assembled once at startup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub monitor: MonitorConfig,
    pub storage: StorageConfig,
    pub openrouter: OpenRouterConfig,
    pub probe: ProbeConfig,
    pub twitch: TwitchConfig,
    pub reply: ReplyConfig,
    pub logging: LogConfig,
}

impl AppConfig {
    /// Parse a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml_str(text: &str) -> MonitorResult<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path` when given, defaults otherwise, then pick up
    /// credentials from the environment
    pub fn load(path: Option<&Path>) -> MonitorResult<Self> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|e| {
                    MonitorError::Config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&text)?
            }
            None => Self::default(),
        };
        config.apply_credentials(
            std::env::var(OPENROUTER_TOKEN_ENV).ok(),
            std::env::var(TWITCH_TOKEN_ENV).ok(),
        );
        Ok(config)
    }

    /// Install credentials; blank values count as missing
    pub fn apply_credentials(&mut self, openrouter: Option<String>, twitch: Option<String>) {
        let present = |value: Option<String>| value.filter(|v| !v.trim().is_empty());
        if let Some(key) = present(openrouter) {
            self.openrouter.api_key = Some(key);
        }
        if let Some(token) = present(twitch) {
            self.twitch.access_token = Some(token);
        }
    }

    /// Validate for a reply run, which needs a logged-in chat account and
    /// the LLM credentials
    pub fn validate_reply(&self) -> MonitorResult<()> {
        if self.openrouter.api_key.is_none() {
            return Err(MonitorError::Config(format!(
                "reply mode requires {OPENROUTER_TOKEN_ENV} to be set"
            )));
        }
        if self.twitch.access_token.is_none() || self.twitch.nick.is_none() {
            return Err(MonitorError::Config(format!(
                "reply mode requires {TWITCH_TOKEN_ENV} and twitch.nick"
            )));
        }
        if self.reply.mention.trim().is_empty() {
            return Err(MonitorError::Config("reply.mention must not be empty".to_string()));
        }
        Ok(())
    }

    /// Validate for a monitoring run
    pub fn validate(&self) -> MonitorResult<()> {
        self.monitor.validate()?;
        if self.monitor.enrich_images && self.openrouter.api_key.is_none() {
            return Err(MonitorError::Config(format!(
                "image enrichment requires {OPENROUTER_TOKEN_ENV} to be set"
            )));
        }
        if self.twitch.access_token.is_some() && self.twitch.nick.is_none() {
            return Err(MonitorError::Config(format!(
                "{TWITCH_TOKEN_ENV} is set but twitch.nick is missing"
            )));
        }
        Ok(())
    }
}

/// Canonical channel name: lower-case, without the IRC `#` prefix
pub fn normalize_channel(channel: &str) -> String {
    channel.trim().trim_start_matches('#').to_ascii_lowercase()
}

/// Normalized, de-duplicated channel list in first-seen order, blanks
/// removed
pub fn normalize_channels(channels: &[String]) -> Vec<String> {
    let mut tracked: Vec<String> = Vec::new();
    for channel in channels.iter().map(|c| normalize_channel(c)) {
        if !channel.is_empty() && !tracked.contains(&channel) {
            tracked.push(channel);
        }
    }
    tracked
}
