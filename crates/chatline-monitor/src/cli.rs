use std::path::PathBuf;

use chatline_logging::LogConfig;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "chatline", version, about = "Live chat monitor with image enrichment")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Also write JSONL logs to this directory, with a quieter console
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Verbose console output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// `configured` with the command-line logging flags applied
    pub fn log_config(&self, configured: LogConfig) -> LogConfig {
        let mut config = match &self.log_dir {
            Some(dir) => LogConfig::production(dir.clone()),
            None => configured,
        };
        if self.verbose {
            config = LogConfig {
                file: config.file.take(),
                ..LogConfig::development()
            };
        }
        config
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Monitor channels until interrupted
    Monitor {
        /// Channels to join; falls back to `twitch.channels` from the config
        channels: Vec<String>,
        /// Describe images linked in chat
        #[arg(long)]
        images: bool,
    },
    /// Answer images linked in chat, and mentions of the bot, until
    /// interrupted
    Reply {
        /// Channels to join; falls back to `twitch.channels` from the config
        channels: Vec<String>,
    },
    /// Print the most recent stored events for a streamer
    Last {
        /// Streamer to show; every streamer when omitted
        streamer: Option<String>,
        /// Number of events
        #[arg(long, short = 'n', default_value_t = 15)]
        limit: usize,
    },
    /// Count stored events for a streamer
    Count {
        streamer: String,
    },
    /// Write stored events for a streamer to a log file
    Export {
        streamer: String,
        /// Export the newest N events
        #[arg(long, conflicts_with_all = ["from", "to"])]
        count: Option<usize>,
        /// Range start (RFC 3339)
        #[arg(long, requires = "to")]
        from: Option<DateTime<Utc>>,
        /// Range end (RFC 3339, inclusive)
        #[arg(long, requires = "from")]
        to: Option<DateTime<Utc>>,
        /// Output directory; defaults to `storage.export_dir`
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}
