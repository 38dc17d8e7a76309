//! Console and file logging for chatline
//!
//! Wraps `tracing-subscriber` with the handful of outputs a chat monitor
//! needs:
//!
//! - **Console**: pretty human-readable output (default) or JSONL
//! - **File**: JSONL lines through `tracing-appender`, with daily/hourly
//!   rotation and a retention limit
//! - **Filtering**: a default level overridable through `RUST_LOG`, plus an
//!   optional stricter level for the console alone
//!
//! # Quick Start
//!
//! ```ignore
//! use chatline_logging::{ChatlineSubscriberBuilder, LogConfig};
//!
//! // Development mode with pretty human-readable output
//! let _guard = ChatlineSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init()?;
//! ```

pub mod config;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};

use std::fs::{self, File};

use thiserror::Error;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

/// Errors raised while installing the global subscriber
#[derive(Debug, Error)]
pub enum LogInitError {
    #[error("Failed to prepare log file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to create rolling appender: {0}")]
    Appender(String),

    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("A global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Builder for configuring and initializing the chatline logging subscriber
///
/// By default, console output is pretty-printed. File output, when
/// configured, is always JSONL.
pub struct ChatlineSubscriberBuilder {
    config: LogConfig,
}

impl ChatlineSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    /// Initialize the subscriber globally
    ///
    /// Returns the file writer guard when file output is enabled; it must be
    /// kept alive for the duration of the program or buffered lines are lost.
    pub fn init(self) -> Result<Option<WorkerGuard>, LogInitError> {
        let (layers, guard) = self.build_layers()?;
        Registry::default()
            .with(layers)
            .try_init()
            .map_err(|e| LogInitError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    fn build_layers(&self) -> Result<(Vec<BoxedLayer>, Option<WorkerGuard>), LogInitError> {
        let env_filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.config.default_level))
            .map_err(|e| LogInitError::InvalidLevel(e.to_string()))?;

        let mut layers: Vec<BoxedLayer> = vec![env_filter.boxed()];
        let mut guard = None;

        if self.config.console.enabled {
            let console = &self.config.console;
            let console_filter = match &console.level {
                Some(level) => level
                    .parse::<LevelFilter>()
                    .map_err(|_| LogInitError::InvalidLevel(level.clone()))?,
                None => LevelFilter::TRACE,
            };

            let layer = if console.pretty {
                tracing_subscriber::fmt::layer()
                    .with_ansi(console.ansi)
                    .with_target(true)
                    .with_filter(console_filter)
                    .boxed()
            } else {
                self.jsonl_layer()
                    .with_writer(std::io::stdout)
                    .with_filter(console_filter)
                    .boxed()
            };
            layers.push(layer);
        }

        if let Some(file_config) = &self.config.file {
            let (writer, file_guard) = create_file_writer(file_config)?;
            guard = Some(file_guard);
            layers.push(self.jsonl_layer().with_writer(writer).boxed());
        }

        Ok((layers, guard))
    }

    fn jsonl_layer<S>(
        &self,
    ) -> tracing_subscriber::fmt::Layer<
        S,
        tracing_subscriber::fmt::format::JsonFields,
        tracing_subscriber::fmt::format::Format<tracing_subscriber::fmt::format::Json>,
    >
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        let jsonl = &self.config.jsonl;
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(jsonl.include_spans)
            .flatten_event(jsonl.flatten_events)
            .with_file(jsonl.include_location)
            .with_line_number(jsonl.include_location)
    }
}

impl Default for ChatlineSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Create the file writer: truncates for `Never` rotation, appends otherwise
fn create_file_writer(
    file_config: &FileConfig,
) -> Result<(NonBlocking, WorkerGuard), LogInitError> {
    fs::create_dir_all(&file_config.directory)?;

    let rotation = match file_config.rotation {
        RotationStrategy::Never => {
            let path = file_config
                .directory
                .join(format!("{}.log", file_config.prefix));
            return Ok(tracing_appender::non_blocking(File::create(path)?));
        }
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file_config.prefix)
        .filename_suffix("log");
    if let Some(max_files) = file_config.max_files {
        builder = builder.max_log_files(max_files);
    }
    let appender = builder
        .build(&file_config.directory)
        .map_err(|e| LogInitError::Appender(e.to_string()))?;

    Ok(tracing_appender::non_blocking(appender))
}

/// Install warn-level console logging for tests. Repeated calls, and calls
/// after another subscriber was installed, are ignored.
pub fn init_testing() {
    let _ = ChatlineSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .init();
}
