//! Error types for the monitor

use chatline_core::{EnrichError, SourceError, StorageError};
use thiserror::Error;

/// Errors surfaced to callers of the monitor.
///
/// Only startup problems end up here. Enrichment, persistence and overflow
/// failures during a run are logged and absorbed by the pipeline.
#[derive(Debug, Error)]
pub enum MonitorError {
    /// Invalid or incomplete configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Chat source failed to join or connect
    #[error("Chat source error: {0}")]
    Source(#[from] SourceError),

    /// Storage could not be opened or queried
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// An enrichment collaborator could not be built
    #[error("Enrichment setup error: {0}")]
    Enrich(#[from] EnrichError),

    /// `start` was called twice on the same monitor
    #[error("Monitor already started")]
    AlreadyStarted,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for MonitorError {
    fn from(e: std::io::Error) -> Self {
        MonitorError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for MonitorError {
    fn from(e: toml::de::Error) -> Self {
        MonitorError::Config(e.to_string())
    }
}

/// Result type alias for monitor operations
pub type MonitorResult<T> = Result<T, MonitorError>;
