use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use chatline_core::{EventStore, ImageDescriber, ImagePredicate};
use chatline_enrich::{HeadImagePredicate, OpenRouterDescriber, OpenRouterResponder};
use chatline_logging::ChatlineSubscriberBuilder;
use chatline_monitor::cli::{Cli, Command};
use chatline_monitor::{
    AppConfig, ImageResponder, Monitor, ReplyBot, TwitchIrcSource, normalize_channel,
};
use chatline_storage::{RedbEventStore, export_last, export_range};
use clap::Parser;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref())?;

    let mut logging =
        ChatlineSubscriberBuilder::new().with_config(cli.log_config(config.logging.clone()));
    if let Some(level) = &cli.log_level {
        logging = logging.with_level(level.clone());
    }
    // Held until exit so buffered file output is flushed
    let _log_guard = logging.init()?;

    match cli.command {
        Command::Monitor { channels, images } => {
            if images {
                config.monitor.enrich_images = true;
            }
            run_monitor(config, channels).await
        }
        Command::Reply { channels } => run_reply(config, channels).await,
        Command::Last { streamer, limit } => {
            let store = open_store(&config)?;
            let events = match streamer {
                Some(streamer) => store.query(&normalize_channel(&streamer), limit).await?,
                None => store.query_all(limit).await?,
            };
            for event in &events {
                println!("[{}] {}", event.streamer(), event.log_line());
            }
            Ok(())
        }
        Command::Count { streamer } => {
            let store = open_store(&config)?;
            let streamer = normalize_channel(&streamer);
            println!("{streamer}: {}", store.count(&streamer).await?);
            Ok(())
        }
        Command::Export {
            streamer,
            count,
            from,
            to,
            dir,
        } => {
            let store = open_store(&config)?;
            let streamer = normalize_channel(&streamer);
            let dir = dir.unwrap_or_else(|| config.storage.export_dir.clone());
            let path = export(&store, &dir, &streamer, count, from.zip(to)).await?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

fn open_store(config: &AppConfig) -> anyhow::Result<RedbEventStore> {
    RedbEventStore::open(config.storage.redb())
        .with_context(|| format!("opening {}", config.storage.db_path.display()))
}

async fn export(
    store: &RedbEventStore,
    dir: &std::path::Path,
    streamer: &str,
    count: Option<usize>,
    range: Option<(chrono::DateTime<chrono::Utc>, chrono::DateTime<chrono::Utc>)>,
) -> anyhow::Result<PathBuf> {
    let path = match (count, range) {
        (_, Some((from, to))) => export_range(store, dir, streamer, from, to).await?,
        (count, None) => export_last(store, dir, streamer, count.unwrap_or(100)).await?,
    };
    Ok(path)
}

async fn run_monitor(config: AppConfig, channels: Vec<String>) -> anyhow::Result<()> {
    config.validate()?;

    let channels = channels_or_configured(&config, channels)?;

    let store: Arc<dyn EventStore> = Arc::new(open_store(&config)?);
    let source = Arc::new(TwitchIrcSource::new(config.twitch.clone()));

    let mut monitor = Monitor::new(config.monitor.clone(), source, store);
    if config.monitor.enrich_images {
        let predicate: Arc<dyn ImagePredicate> = Arc::new(HeadImagePredicate::new(&config.probe)?);
        let describer: Arc<dyn ImageDescriber> =
            Arc::new(OpenRouterDescriber::new(config.openrouter.clone())?);
        monitor = monitor.with_image_enrichment(predicate, describer);
        info!(model = %config.openrouter.model, "Image enrichment enabled");
    }
    let monitor = Arc::new(monitor);

    let stopper = Arc::clone(&monitor);
    tokio::spawn(async move {
        wait_for_signal().await;
        stopper.stop();
    });

    monitor.start(&channels).await?;
    Ok(())
}

async fn run_reply(config: AppConfig, channels: Vec<String>) -> anyhow::Result<()> {
    config.validate_reply()?;
    let channels = channels_or_configured(&config, channels)?;

    let source = Arc::new(TwitchIrcSource::new(config.twitch.clone()));
    let responder = ImageResponder::new(
        Arc::new(HeadImagePredicate::new(&config.probe)?),
        Arc::new(OpenRouterDescriber::new(config.openrouter.clone())?),
        Arc::new(OpenRouterResponder::new(config.openrouter.clone())?),
        source.clone(),
        config.reply.clone(),
    );
    let bot = Arc::new(
        ReplyBot::new(source, responder).with_stop_wait(config.monitor.enrichment_wait()),
    );
    info!(model = %config.openrouter.reply_model, mention = %config.reply.mention, "Reply mode");

    let stopper = Arc::clone(&bot);
    tokio::spawn(async move {
        wait_for_signal().await;
        stopper.stop();
    });

    bot.run(&channels).await?;
    Ok(())
}

fn channels_or_configured(
    config: &AppConfig,
    channels: Vec<String>,
) -> anyhow::Result<Vec<String>> {
    let channels = if channels.is_empty() {
        config.twitch.channels.clone()
    } else {
        channels
    };
    if channels.is_empty() {
        bail!("no channels given on the command line or in twitch.channels");
    }
    Ok(channels)
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received interrupt"),
                    _ = term.recv() => info!("Received SIGTERM"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Cannot listen for SIGTERM"),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt"),
        Err(e) => {
            warn!(error = %e, "Cannot listen for interrupt");
            std::future::pending::<()>().await;
        }
    }
}
