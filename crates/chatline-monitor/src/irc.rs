//! Twitch chat over plain IRC
//!
//! A small client: log in (anonymously as `justinfanNNNNN` unless a token
//! is configured), JOIN the channels, answer PINGs, and hand every PRIVMSG
//! to the registered [`MessageHandler`] from the read task. Lines are read
//! as bytes, so a line with invalid UTF-8 is decoded lossily instead of
//! ending the session.
//!
//! When the server closes the connection, or asks for a `RECONNECT`, the
//! read task reconnects with a doubling delay and re-joins every channel.
//! Only [`ChatSource::disconnect`] stops it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatline_core::{CancellationToken, ChatMessage, ChatSource, MessageHandler, SourceError};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{TwitchConfig, normalize_channel};

const ANONYMOUS_NICK: &str = "justinfan";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a session's read loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionEnd {
    Cancelled,
    Lost { lines: u64 },
}

/// Connection state shared between the source and its read task
struct Session {
    config: TwitchConfig,
    handler: Mutex<Option<MessageHandler>>,
    channels: Mutex<Vec<String>>,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
}

impl Session {
    fn login_lines(&self) -> Vec<String> {
        match (&self.config.access_token, &self.config.nick) {
            (Some(token), Some(nick)) => {
                let token = token.trim_start_matches("oauth:");
                vec![
                    format!("PASS oauth:{token}"),
                    format!("NICK {}", nick.to_ascii_lowercase()),
                ]
            }
            _ => {
                let suffix = Utc::now().timestamp_subsec_micros() % 100_000;
                vec![format!("NICK {ANONYMOUS_NICK}{suffix}")]
            }
        }
    }

    async fn send_lines(&self, lines: &[String]) -> Result<(), SourceError> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SourceError::NotConnected)?;
        for line in lines {
            write_line(writer, line).await?;
        }
        Ok(())
    }

    /// Connect, log in and join every known channel
    async fn open(&self) -> Result<OwnedReadHalf, SourceError> {
        let host = self.config.host.as_str();
        let connect = TcpStream::connect((host, self.config.port));
        let stream = match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
            Ok(stream) => stream.map_err(|e| SourceError::ConnectionFailed(e.to_string()))?,
            Err(_) => {
                let reason = format!("timed out connecting to {host}");
                return Err(SourceError::ConnectionFailed(reason));
            }
        };
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);

        let mut lines = self.login_lines();
        lines.extend(join_line(&self.channels.lock()));
        if let Err(e) = self.send_lines(&lines).await {
            self.writer.lock().await.take();
            return Err(e);
        }
        Ok(read_half)
    }

    /// Read one connection until it is lost or `cancel` fires
    async fn read(&self, read_half: OwnedReadHalf, cancel: &CancellationToken) -> SessionEnd {
        let mut reader = BufReader::new(read_half);
        let mut buf = Vec::new();
        let mut lines = 0u64;

        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => return SessionEnd::Cancelled,
                read = reader.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) => {
                    warn!("Chat connection closed by server");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Chat read failed");
                    break;
                }
            }
            lines += 1;

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\r', '\n']);
            trace!(%line, "irc <");
            if !self.dispatch(line).await {
                break;
            }
        }

        SessionEnd::Lost { lines }
    }

    /// Handle one server line. Returns false when the server asked us to
    /// reconnect.
    async fn dispatch(&self, line: &str) -> bool {
        if let Some(payload) = line.strip_prefix("PING") {
            if let Some(writer) = self.writer.lock().await.as_mut() {
                if let Err(e) = write_line(writer, &format!("PONG{payload}")).await {
                    warn!(error = %e, "Failed to answer PING");
                }
            }
            return true;
        }

        if let Some(message) = parse_privmsg(line, Utc::now()) {
            let handler = self.handler.lock().clone();
            if let Some(handler) = handler {
                handler(message);
            }
        } else if line.split(' ').nth(1) == Some("RECONNECT") {
            info!("Server requested a reconnect");
            return false;
        } else if line.contains(" NOTICE ") {
            warn!(%line, "Server notice");
        }
        true
    }
}

/// [`ChatSource`] connected to Twitch chat
pub struct TwitchIrcSource {
    session: Arc<Session>,
    reader: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl TwitchIrcSource {
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            session: Arc::new(Session {
                config,
                handler: Mutex::new(None),
                channels: Mutex::new(Vec::new()),
                writer: tokio::sync::Mutex::new(None),
            }),
            reader: Mutex::new(None),
        }
    }
}

async fn write_line(writer: &mut OwnedWriteHalf, line: &str) -> Result<(), SourceError> {
    writer
        .write_all(format!("{line}\r\n").as_bytes())
        .await
        .map_err(|e| SourceError::SendFailed(e.to_string()))
}

fn join_line(channels: &[String]) -> Option<String> {
    if channels.is_empty() {
        return None;
    }
    let targets: Vec<String> = channels.iter().map(|c| format!("#{c}")).collect();
    Some(format!("JOIN {}", targets.join(",")))
}

/// `PRIVMSG` line for `text`, flattened to a single IRC line
fn privmsg_line(channel: &str, text: &str) -> Option<String> {
    let text = text.replace(['\r', '\n'], " ");
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(format!("PRIVMSG #{} :{text}", normalize_channel(channel)))
}

/// Read task: one session after another until cancelled
async fn run_reader(session: Arc<Session>, first: OwnedReadHalf, cancel: CancellationToken) {
    let mut read_half = first;
    let mut attempt = 0u32;

    'sessions: loop {
        match session.read(read_half, &cancel).await {
            SessionEnd::Cancelled => break,
            SessionEnd::Lost { lines } if lines > 0 => attempt = 0,
            SessionEnd::Lost { .. } => {}
        }
        session.writer.lock().await.take();

        read_half = loop {
            let delay = session.config.reconnect_delay(attempt);
            attempt = attempt.saturating_add(1);
            info!(delay_ms = delay.as_millis() as u64, attempt, "Reconnecting to chat");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => break 'sessions,
                opened = async {
                    tokio::time::sleep(delay).await;
                    session.open().await
                } => opened,
            };
            match opened {
                Ok(read_half) => {
                    info!(channels = ?session.channels.lock(), "Reconnected to chat");
                    break read_half;
                }
                Err(e) => warn!(error = %e, "Reconnect failed"),
            }
        };
    }

    debug!("Chat reader stopped");
}

#[async_trait]
impl ChatSource for TwitchIrcSource {
    fn on_message(&self, handler: MessageHandler) {
        *self.session.handler.lock() = Some(handler);
    }

    async fn join(&self, channels: &[String]) -> Result<(), SourceError> {
        let new: Vec<String> = {
            let mut joined = self.session.channels.lock();
            let new: Vec<String> = channels
                .iter()
                .map(|c| normalize_channel(c))
                .filter(|c| !c.is_empty() && !joined.contains(c))
                .collect();
            joined.extend(new.iter().cloned());
            new
        };

        // Before connect the JOIN goes out with the login
        if self.session.writer.lock().await.is_some() {
            if let Some(line) = join_line(&new) {
                self.session.send_lines(&[line]).await?;
            }
        }
        Ok(())
    }

    async fn connect(&self) -> Result<(), SourceError> {
        let read_half = self.session.open().await?;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_reader(
            Arc::clone(&self.session),
            read_half,
            cancel.clone(),
        ));
        if let Some((old_cancel, _)) = self.reader.lock().replace((cancel, handle)) {
            old_cancel.cancel();
        }

        let channels = self.session.channels.lock().clone();
        info!(host = %self.session.config.host, ?channels, "Connected to chat");
        Ok(())
    }

    async fn disconnect(&self) {
        let reader = self.reader.lock().take();
        let Some((cancel, handle)) = reader else {
            return;
        };
        cancel.cancel();

        if let Some(mut writer) = self.session.writer.lock().await.take() {
            let _ = write_line(&mut writer, "QUIT").await;
            let _ = writer.shutdown().await;
        }

        if tokio::time::timeout(READER_STOP_TIMEOUT, handle).await.is_err() {
            warn!("Chat reader did not stop in time");
        }
        // A reconnect racing the cancel may have installed a new writer
        self.session.writer.lock().await.take();
        info!("Disconnected from chat");
    }

    async fn send_message(&self, channel: &str, text: &str) -> Result<(), SourceError> {
        let line = privmsg_line(channel, text)
            .ok_or_else(|| SourceError::SendFailed("empty message".to_string()))?;
        self.session.send_lines(&[line]).await
    }
}

/// Parse an IRC `PRIVMSG` line, with or without IRCv3 tags.
///
/// `/me` actions (`\x01ACTION ...\x01`) are reduced to their text.
pub fn parse_privmsg(line: &str, time: DateTime<Utc>) -> Option<ChatMessage> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = match line.strip_prefix('@') {
        Some(tagged) => tagged.split_once(' ')?.1,
        None => line,
    };

    let rest = line.strip_prefix(':')?;
    let (prefix, rest) = rest.split_once(' ')?;
    let (command, rest) = rest.split_once(' ')?;
    if command != "PRIVMSG" {
        return None;
    }
    let (target, text) = rest.split_once(" :")?;

    let author = prefix.split('!').next().filter(|a| !a.is_empty())?;
    let channel = normalize_channel(target);
    let text = text
        .strip_prefix("\u{1}ACTION ")
        .and_then(|action| action.strip_suffix('\u{1}'))
        .unwrap_or(text);

    Some(ChatMessage {
        channel,
        author: author.to_string(),
        text: text.to_string(),
        time,
    })
}
