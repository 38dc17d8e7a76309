//! Timeline events

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Author recorded on lifecycle markers produced by the monitor itself
pub const SYSTEM_AUTHOR: &str = "system";

/// Kinds of observed activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Lifecycle and other channel-wide markers
    Global,
    /// A chat message
    Chat,
    /// A description of an image linked from a chat message
    Image,
    /// Transcribed speech from the stream
    Speech,
    /// A description of a stream screenshot
    Screenshot,
}

impl EventKind {
    /// Stable numeric code, used by storage backends that index by kind
    pub fn code(self) -> u8 {
        match self {
            Self::Global => 0,
            Self::Chat => 1,
            Self::Image => 2,
            Self::Speech => 3,
            Self::Screenshot => 4,
        }
    }

    /// Inverse of [`EventKind::code`]
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Global),
            1 => Some(Self::Chat),
            2 => Some(Self::Image),
            3 => Some(Self::Speech),
            4 => Some(Self::Screenshot),
            _ => None,
        }
    }

    /// Upper-case label used in exported log lines
    pub fn label(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::Chat => "CHAT",
            Self::Image => "IMAGE",
            Self::Speech => "SPEECH",
            Self::Screenshot => "SCREENSHOT",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A timestamped unit of observed activity
///
/// Events are immutable once constructed. `timestamp` is the only ordering
/// key: two events for the same streamer are ordered by it and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    kind: EventKind,
    content: String,
    author: Option<String>,
    streamer: String,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event with an explicit timestamp
    pub fn new(
        kind: EventKind,
        content: impl Into<String>,
        author: Option<String>,
        streamer: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            content: content.into(),
            author,
            streamer: streamer.into(),
            timestamp,
        }
    }

    /// Create a chat event
    pub fn chat(
        streamer: impl Into<String>,
        author: impl Into<String>,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(
            EventKind::Chat,
            content,
            Some(author.into()),
            streamer,
            timestamp,
        )
    }

    /// Marker emitted when monitoring of a channel begins
    pub fn monitoring_started(streamer: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let streamer = streamer.into();
        Self::new(
            EventKind::Global,
            format!("Starting monitoring for channel: {streamer}"),
            Some(SYSTEM_AUTHOR.to_string()),
            streamer,
            timestamp,
        )
    }

    /// Marker emitted when monitoring of a channel stops
    pub fn monitoring_stopped(streamer: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        let streamer = streamer.into();
        Self::new(
            EventKind::Global,
            format!("Stopping monitoring for channel: {streamer}"),
            Some(SYSTEM_AUTHOR.to_string()),
            streamer,
            timestamp,
        )
    }

    /// Derive an image event from this one.
    ///
    /// The derived event keeps the parent's author and streamer and is
    /// stamped `offset` after the parent so it sorts directly behind it.
    pub fn derive_image(&self, description: impl Into<String>, offset: Duration) -> Self {
        Self {
            kind: EventKind::Image,
            content: description.into(),
            author: self.author.clone(),
            streamer: self.streamer.clone(),
            timestamp: self.timestamp + offset,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    pub fn streamer(&self) -> &str {
        &self.streamer
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Render as an export log line: `[HH:MM:SS] [KIND] author: content`
    /// for chat, `[HH:MM:SS] [KIND] content` for everything else.
    pub fn log_line(&self) -> String {
        let time = self.timestamp.format("%H:%M:%S");
        match (self.kind, self.author.as_deref()) {
            (EventKind::Chat, Some(author)) => {
                format!("[{time}] [{}] {author}: {}", self.kind, self.content)
            }
            _ => format!("[{time}] [{}] {}", self.kind, self.content),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.streamer,
            self.author.as_deref().unwrap_or(""),
            self.content
        )
    }
}
