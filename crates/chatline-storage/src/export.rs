//! Plain-text export of stored events
//!
//! Writes one [`Event::log_line`] per line to
//! `<dir>/<streamer>_<YYYY-MM-DD>_<HH:MM>-<HH:MM>.log`, where the date and
//! times are those of the first and last exported events. An export with no
//! events still writes an empty file, stamped with the current time.

use std::path::{Path, PathBuf};

use chatline_core::{Event, EventStore, StorageError};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// File name for an export covering `events` (oldest first). `now` names
/// an empty export.
pub fn export_file_name(streamer: &str, events: &[Event], now: DateTime<Utc>) -> String {
    let first = events.first().map_or(now, Event::timestamp);
    let last = events.last().map_or(now, Event::timestamp);
    format!(
        "{streamer}_{}_{}-{}.log",
        first.format("%Y-%m-%d"),
        first.format("%H:%M"),
        last.format("%H:%M"),
    )
}

/// Write `events` for `streamer` into `dir`, returning the written path
#[instrument(skip(events), fields(count = events.len(), dir = %dir.display()))]
pub async fn export_events(
    dir: &Path,
    streamer: &str,
    events: &[Event],
) -> Result<PathBuf, StorageError> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(export_file_name(streamer, events, Utc::now()));

    let mut body = String::new();
    for event in events {
        body.push_str(&event.log_line());
        body.push('\n');
    }

    let mut file = tokio::fs::File::create(&path).await?;
    file.write_all(body.as_bytes()).await?;
    file.flush().await?;

    info!(path = %path.display(), "Exported events");
    Ok(path)
}

/// Export the newest `count` events of `streamer`
pub async fn export_last(
    store: &dyn EventStore,
    dir: &Path,
    streamer: &str,
    count: usize,
) -> Result<PathBuf, StorageError> {
    let events = store.query(streamer, count).await?;
    export_events(dir, streamer, &events).await
}

/// Export the events of `streamer` between `from` and `to` inclusive
pub async fn export_range(
    store: &dyn EventStore,
    dir: &Path,
    streamer: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<PathBuf, StorageError> {
    let events = store.query_range(streamer, from, to).await?;
    export_events(dir, streamer, &events).await
}
