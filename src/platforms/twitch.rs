// src/platforms/twitch.rs - Anonymous Twitch IRC over WebSocket

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ChatConfig;
use crate::emotes::twitch_native_url;
use crate::platforms::{open_socket, AdapterError, AdapterLink, ChatSocket, PlatformAdapter, TaskSlot};
use crate::types::{CanonicalMessage, ChatEvent, ConnectionState, Platform};

type IrcWriter = SplitSink<ChatSocket, Message>;
type IrcReader = SplitStream<ChatSocket>;

/// Anonymous read-only login accepted by Twitch
const ANONYMOUS_NICK: &str = "justinfan12345";

/// Configuration for the Twitch IRC connection
#[derive(Debug, Clone)]
pub struct TwitchConfig {
    /// Lowercased login used in JOIN
    pub channel: String,
    /// Channel name as configured, for banners
    pub display_name: String,
    pub irc_url: String,
    pub request_timeout: Duration,
}

impl TwitchConfig {
    pub fn from_chat_config(config: &ChatConfig) -> Option<Self> {
        config.twitch_channel().map(|channel| {
            let name = channel.trim_start_matches('#');
            Self {
                channel: name.to_lowercase(),
                display_name: name.to_string(),
                irc_url: config.endpoints.twitch_irc.clone(),
                request_timeout: config.request_timeout(),
            }
        })
    }
}

/// One IRC line after decoding
#[derive(Debug, Clone, PartialEq)]
pub enum IrcLine {
    /// Server keep-alive; `reply` must be written back on the same socket
    Ping { reply: String },
    /// Chat post, plus any native emotes announced in its tags
    Chat {
        message: CanonicalMessage,
        emotes: Vec<(String, String)>,
    },
    /// Welcome (376) or JOIN acknowledgment
    Joined,
    Ignored,
}

/// Lines sent right after the socket opens
pub fn login_sequence(channel: &str) -> Vec<String> {
    vec![
        "CAP REQ :twitch.tv/tags\r\n".to_string(),
        format!("PASS oauth:{}\r\n", ANONYMOUS_NICK),
        format!("NICK {}\r\n", ANONYMOUS_NICK),
        format!("JOIN #{}\r\n", channel.to_lowercase()),
    ]
}

/// A socket frame can carry several CRLF-delimited lines
pub fn frame_lines(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.is_empty())
}

fn hex_color() -> &'static Regex {
    static HEX_COLOR: OnceLock<Regex> = OnceLock::new();
    HEX_COLOR.get_or_init(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid colour pattern"))
}

/// Decode a single IRC line
pub fn parse_line(line: &str) -> IrcLine {
    if line.starts_with("PING") {
        return IrcLine::Ping {
            reply: format!("{}\r\n", line.replacen("PING", "PONG", 1)),
        };
    }

    // Format: [@tags] [:prefix] COMMAND params
    let (tags, rest) = match line.strip_prefix('@') {
        Some(tagged) => match tagged.split_once(' ') {
            Some((tags, rest)) => (parse_tags(tags), rest),
            None => return IrcLine::Ignored,
        },
        None => (HashMap::new(), line),
    };

    let (prefix, rest) = match rest.strip_prefix(':') {
        Some(prefixed) => match prefixed.split_once(' ') {
            Some((prefix, rest)) => (Some(prefix), rest),
            None => return IrcLine::Ignored,
        },
        None => (None, rest),
    };

    let (command, params) = rest.split_once(' ').unwrap_or((rest, ""));

    match command {
        "PRIVMSG" => match parse_privmsg(&tags, prefix, params) {
            Some(line) => line,
            None => {
                debug!("Dropping malformed PRIVMSG: {}", line);
                IrcLine::Ignored
            }
        },
        "376" | "JOIN" => IrcLine::Joined,
        _ => IrcLine::Ignored,
    }
}

fn parse_tags(raw: &str) -> HashMap<&str, &str> {
    raw.split(';')
        .filter_map(|tag| tag.split_once('='))
        .collect()
}

fn parse_privmsg(tags: &HashMap<&str, &str>, prefix: Option<&str>, params: &str) -> Option<IrcLine> {
    let (username, _) = prefix?.split_once('!')?;
    if username.is_empty() {
        return None;
    }

    // params: "#channel :message text"
    let (_channel, text) = params.split_once(" :")?;
    let text = strip_action(text);
    if text.is_empty() {
        return None;
    }

    let color = tags
        .get("color")
        .filter(|value| hex_color().is_match(value))
        .map(|value| value.to_string());

    let emotes = tags
        .get("emotes")
        .map(|value| parse_emote_tag(value, text))
        .unwrap_or_default();

    Some(IrcLine::Chat {
        message: CanonicalMessage::chat(Platform::Twitch, username, text, color),
        emotes,
    })
}

/// `/me` posts arrive wrapped as CTCP ACTION
fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .map(|inner| inner.trim_end_matches('\u{1}'))
        .unwrap_or(text)
}

/// Decode `emotes=25:0-4,12-16/1902:6-10` into (code, url) pairs, using the
/// character ranges to read each code out of the message text.
fn parse_emote_tag(value: &str, text: &str) -> Vec<(String, String)> {
    let chars: Vec<char> = text.chars().collect();
    let mut emotes: Vec<(String, String)> = Vec::new();

    for entry in value.split('/').filter(|e| !e.is_empty()) {
        let Some((id, ranges)) = entry.split_once(':') else {
            continue;
        };
        let Some(first_range) = ranges.split(',').next() else {
            continue;
        };
        let Some((start, end)) = first_range.split_once('-') else {
            continue;
        };
        let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) else {
            continue;
        };
        if start > end || end >= chars.len() {
            continue;
        }

        let code: String = chars[start..=end].iter().collect();
        if !emotes.iter().any(|(existing, _)| *existing == code) {
            emotes.push((code, twitch_native_url(id)));
        }
    }

    emotes
}

/// Twitch IRC-over-WebSocket adapter
pub struct TwitchConnection {
    config: TwitchConfig,
    task: TaskSlot,
}

impl TwitchConnection {
    pub fn new(config: TwitchConfig) -> Self {
        Self {
            config,
            task: TaskSlot::default(),
        }
    }

    async fn open(&self) -> Result<(IrcWriter, IrcReader), AdapterError> {
        let ws_stream = open_socket(&self.config.irc_url, self.config.request_timeout).await?;
        let (mut write, read) = ws_stream.split();

        for line in login_sequence(&self.config.channel) {
            write.send(Message::Text(line)).await?;
        }
        info!("Requested to join Twitch channel #{}", self.config.channel);

        Ok((write, read))
    }
}

#[async_trait]
impl PlatformAdapter for TwitchConnection {
    fn platform(&self) -> Platform {
        Platform::Twitch
    }

    async fn connect(&mut self, link: AdapterLink) -> Result<(), AdapterError> {
        self.task.stop(Platform::Twitch).await;
        link.set_status(ConnectionState::Connecting).await;
        info!("Connecting to Twitch IRC...");

        let (write, read) = match self.open().await {
            Ok(halves) => halves,
            Err(e) => {
                error!("Failed to connect to Twitch: {}", e);
                link.set_status(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };

        let shutdown = self.task.arm();
        let channel = self.config.display_name.clone();
        let handle = tokio::spawn(read_loop(write, read, link, channel, shutdown));
        self.task.attach(handle);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.task.is_running() {
            info!("Disconnecting from Twitch");
        }
        self.task.stop(Platform::Twitch).await;
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn read_loop(
    mut write: IrcWriter,
    mut read: IrcReader,
    link: AdapterLink,
    channel: String,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!("Twitch reader started");
    let mut joined = false;

    'frames: loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    for line in frame_lines(&text) {
                        match parse_line(line) {
                            IrcLine::Ping { reply } => {
                                debug!("Answering Twitch PING");
                                if let Err(e) = write.send(Message::Text(reply)).await {
                                    error!("Failed to send PONG: {}", e);
                                    break 'frames;
                                }
                            }
                            IrcLine::Chat { message, emotes } => {
                                if !emotes.is_empty() && !link.send(ChatEvent::NativeEmotes(emotes)).await {
                                    break 'frames;
                                }
                                if !link.emit(message).await {
                                    break 'frames;
                                }
                            }
                            IrcLine::Joined if !joined => {
                                joined = true;
                                link.set_status(ConnectionState::Connected).await;
                                link.emit_system(
                                    format!("Connected to {}'s chat", channel),
                                    Platform::Twitch.system_color(),
                                ).await;
                            }
                            IrcLine::Joined | IrcLine::Ignored => {}
                        }
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        error!("Failed to send pong: {}", e);
                        break;
                    }
                }
                Some(Ok(Message::Close(close_frame))) => {
                    info!("Twitch WebSocket closed: {:?}", close_frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Twitch WebSocket error: {}", e);
                    break;
                }
                None => {
                    warn!("Twitch WebSocket stream ended");
                    break;
                }
            }
        }
    }

    link.set_status(ConnectionState::Disconnected).await;
    debug!("Twitch reader exited");
}
