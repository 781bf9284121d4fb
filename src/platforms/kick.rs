// src/platforms/kick.rs - Kick chat over the Pusher WebSocket

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;

use crate::config::ChatConfig;
use crate::platforms::{http_client, open_socket, AdapterError, AdapterLink, ChatSocket, PlatformAdapter, TaskSlot};
use crate::types::{CanonicalMessage, ConnectionState, Platform, ERROR_COLOR};

type PusherWriter = SplitSink<ChatSocket, Message>;
type PusherReader = SplitStream<ChatSocket>;

const BROWSER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration for the Kick chat connection
#[derive(Debug, Clone)]
pub struct KickConfig {
    /// Lowercased slug used for the lookup
    pub channel: String,
    /// Channel name as configured, for banners
    pub display_name: String,
    pub api_base: String,
    pub socket_url: String,
    pub request_timeout: Duration,
}

impl KickConfig {
    pub fn from_chat_config(config: &ChatConfig) -> Option<Self> {
        config.kick_channel().map(|channel| Self {
            channel: channel.to_lowercase(),
            display_name: channel.to_string(),
            api_base: config.endpoints.kick_api.clone(),
            socket_url: config.endpoints.kick_socket.clone(),
            request_timeout: config.request_timeout(),
        })
    }
}

/// `GET /channels/{slug}` response, reduced to what the socket needs
#[derive(Debug, Deserialize)]
struct ChannelInfo {
    chatroom: Chatroom,
}

#[derive(Debug, Deserialize)]
struct Chatroom {
    id: u64,
}

/// Undecoded socket frame
#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct ChatPayload {
    sender: Sender,
    content: String,
}

#[derive(Debug, Deserialize)]
struct Sender {
    username: String,
    #[serde(default)]
    identity: Option<Identity>,
}

#[derive(Debug, Default, Deserialize)]
struct Identity {
    #[serde(default)]
    color: Option<String>,
}

/// Pusher envelope, discriminated by its `event` field
#[derive(Debug, Clone, PartialEq)]
pub enum PusherEvent {
    ConnectionEstablished,
    SubscriptionSucceeded,
    Error { message: String },
    Ping,
    Chat(CanonicalMessage),
    /// Known envelope whose payload lacked required fields
    Malformed,
    Other(String),
}

/// Decode one socket frame. A frame that is not an `{event, data}` object is
/// an error; unknown event names are not.
pub fn decode_frame(text: &str) -> Result<PusherEvent, AdapterError> {
    let envelope: RawEnvelope = serde_json::from_str(text)?;

    let event = match envelope.event.as_str() {
        "pusher:connection_established" => PusherEvent::ConnectionEstablished,
        "pusher_internal:subscription_succeeded" => PusherEvent::SubscriptionSucceeded,
        "pusher:ping" => PusherEvent::Ping,
        "pusher:error" => PusherEvent::Error {
            message: error_message(&envelope.data),
        },
        "App\\Events\\ChatMessageEvent" => match decode_chat(&envelope.data) {
            Ok(message) => PusherEvent::Chat(message),
            Err(e) => {
                debug!("Dropping Kick chat event: {}", e);
                PusherEvent::Malformed
            }
        },
        other => PusherEvent::Other(other.to_string()),
    };
    Ok(event)
}

/// Chat payloads are JSON encoded a second time inside `data`
fn decode_chat(data: &Value) -> Result<CanonicalMessage, AdapterError> {
    let payload: ChatPayload = match data {
        Value::String(inner) => serde_json::from_str(inner)?,
        Value::Object(_) => serde_json::from_value(data.clone())?,
        _ => return Err(AdapterError::Parse("chat data is neither string nor object".to_string())),
    };

    let color = payload.sender.identity.and_then(|identity| identity.color);
    Ok(CanonicalMessage::chat(
        Platform::Kick,
        payload.sender.username,
        payload.content,
        color,
    ))
}

fn error_message(data: &Value) -> String {
    let parsed;
    let data = match data {
        Value::String(inner) => {
            parsed = serde_json::from_str::<Value>(inner).unwrap_or(Value::Null);
            &parsed
        }
        other => other,
    };

    data.get("message")
        .and_then(Value::as_str)
        .unwrap_or("Connection error")
        .to_string()
}

pub fn subscribe_request(chatroom_id: u64) -> String {
    json!({
        "event": "pusher:subscribe",
        "data": {
            "auth": "",
            "channel": format!("chatrooms.{}.v2", chatroom_id)
        }
    })
    .to_string()
}

fn pong() -> String {
    json!({ "event": "pusher:pong", "data": {} }).to_string()
}

/// Kick chat adapter: REST chatroom lookup, then Pusher subscription
pub struct KickConnection {
    config: KickConfig,
    http_client: reqwest::Client,
    task: TaskSlot,
}

impl KickConnection {
    pub fn new(config: KickConfig) -> Self {
        Self {
            http_client: http_client(config.request_timeout),
            config,
            task: TaskSlot::default(),
        }
    }

    /// Resolve the channel slug to its numeric chatroom id
    pub async fn lookup_chatroom(&self) -> Result<u64, AdapterError> {
        let url = format!(
            "{}/channels/{}",
            self.config.api_base,
            urlencoding::encode(&self.config.channel)
        );

        let response = self
            .http_client
            .get(&url)
            .header(USER_AGENT, BROWSER_AGENT)
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| AdapterError::Lookup(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AdapterError::Lookup(format!(
                "Kick channel not found: {} ({})",
                self.config.channel,
                response.status()
            )));
        }

        let info: ChannelInfo = response
            .json()
            .await
            .map_err(|e| AdapterError::Lookup(format!("no chatroom id in response: {}", e)))?;
        Ok(info.chatroom.id)
    }

    async fn open(&self) -> Result<(u64, PusherWriter, PusherReader), AdapterError> {
        let chatroom_id = self.lookup_chatroom().await?;
        info!("Kick chatroom id for {}: {}", self.config.channel, chatroom_id);

        let ws_stream = open_socket(&self.config.socket_url, self.config.request_timeout).await?;
        let (write, read) = ws_stream.split();
        Ok((chatroom_id, write, read))
    }
}

#[async_trait]
impl PlatformAdapter for KickConnection {
    fn platform(&self) -> Platform {
        Platform::Kick
    }

    async fn connect(&mut self, link: AdapterLink) -> Result<(), AdapterError> {
        self.task.stop(Platform::Kick).await;
        link.set_status(ConnectionState::Connecting).await;
        info!("Connecting to Kick chat for {}...", self.config.channel);

        let (chatroom_id, write, read) = match self.open().await {
            Ok(parts) => parts,
            Err(e) => {
                error!("Failed to connect to Kick: {}", e);
                link.set_status(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };

        let shutdown = self.task.arm();
        let channel = self.config.display_name.clone();
        let handle = tokio::spawn(read_loop(write, read, link, channel, chatroom_id, shutdown));
        self.task.attach(handle);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.task.is_running() {
            info!("Disconnecting from Kick");
        }
        self.task.stop(Platform::Kick).await;
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn read_loop(
    mut write: PusherWriter,
    mut read: PusherReader,
    link: AdapterLink,
    channel: String,
    chatroom_id: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    debug!("Kick reader started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => {
                let _ = write.send(Message::Close(None)).await;
                break;
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let event = match decode_frame(&text) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!("Kick frame decode error: {}", e);
                            continue;
                        }
                    };

                    match event {
                        PusherEvent::ConnectionEstablished => {
                            debug!("Kick socket established, subscribing to chatroom {}", chatroom_id);
                            if let Err(e) = write.send(Message::Text(subscribe_request(chatroom_id))).await {
                                error!("Kick subscribe failed: {}", e);
                                break;
                            }
                        }
                        PusherEvent::SubscriptionSucceeded => {
                            link.set_status(ConnectionState::Connected).await;
                            if !link.emit_system(
                                format!("Connected to {}'s chat", channel),
                                Platform::Kick.system_color(),
                            ).await {
                                break;
                            }
                        }
                        PusherEvent::Error { message } => {
                            warn!("Kick pusher error: {}", message);
                            if !link.emit_system(format!("Error: {}", message), ERROR_COLOR).await {
                                break;
                            }
                        }
                        PusherEvent::Ping => {
                            if let Err(e) = write.send(Message::Text(pong())).await {
                                error!("Failed to answer Kick ping: {}", e);
                                break;
                            }
                        }
                        PusherEvent::Chat(message) => {
                            if !link.emit(message).await {
                                break;
                            }
                        }
                        PusherEvent::Malformed => {}
                        PusherEvent::Other(name) => debug!("Ignoring Kick event {}", name),
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = write.send(Message::Pong(payload)).await {
                        error!("Failed to send pong: {}", e);
                        break;
                    }
                }
                Some(Ok(Message::Close(close_frame))) => {
                    info!("Kick WebSocket closed: {:?}", close_frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("Kick WebSocket error: {}", e);
                    break;
                }
                None => {
                    warn!("Kick WebSocket stream ended");
                    break;
                }
            }
        }
    }

    link.set_status(ConnectionState::Disconnected).await;
    debug!("Kick reader exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::status::StatusBoard;
    use crate::types::ChatEvent;
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn kick_config(channel: &str, api_base: String, socket_url: String) -> KickConfig {
        KickConfig {
            channel: channel.to_lowercase(),
            display_name: channel.to_string(),
            api_base,
            socket_url,
            request_timeout: Duration::from_millis(300),
        }
    }

    fn chat_frame(inner: &Value) -> String {
        json!({
            "event": "App\\Events\\ChatMessageEvent",
            "data": inner.to_string(),
            "channel": "chatrooms.1.v2"
        })
        .to_string()
    }

    #[test]
    fn test_chat_post_is_decoded_twice() {
        let frame = chat_frame(&json!({ "sender": { "username": "bob" }, "content": "hello" }));

        let message = match decode_frame(&frame).unwrap() {
            PusherEvent::Chat(message) => message,
            other => panic!("expected chat event, got {:?}", other),
        };
        assert_eq!(message.platform(), Platform::Kick);
        assert_eq!(message.username(), "bob");
        assert_eq!(message.text(), "hello");
        assert_eq!(message.color(), None);
        assert!(!message.is_system());
    }

    #[test]
    fn test_chat_post_with_color() {
        let frame = chat_frame(&json!({
            "id": "abc",
            "sender": { "username": "amy", "identity": { "color": "#75FD46", "badges": [] } },
            "content": "gg"
        }));
        match decode_frame(&frame).unwrap() {
            PusherEvent::Chat(message) => assert_eq!(message.color(), Some("#75FD46")),
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_chat_post_missing_fields_is_dropped() {
        let frame = chat_frame(&json!({ "sender": {}, "content": "orphan" }));
        assert_eq!(decode_frame(&frame).unwrap(), PusherEvent::Malformed);

        let frame = chat_frame(&json!({ "sender": { "username": "x" } }));
        assert_eq!(decode_frame(&frame).unwrap(), PusherEvent::Malformed);
    }

    #[test]
    fn test_control_events() {
        let established = r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\",\"activity_timeout\":120}"}"#;
        assert_eq!(decode_frame(established).unwrap(), PusherEvent::ConnectionEstablished);

        let subscribed = r#"{"event":"pusher_internal:subscription_succeeded","data":"{}","channel":"chatrooms.7.v2"}"#;
        assert_eq!(decode_frame(subscribed).unwrap(), PusherEvent::SubscriptionSucceeded);

        let error = r#"{"event":"pusher:error","data":{"code":4001,"message":"App key not in this cluster"}}"#;
        assert_eq!(
            decode_frame(error).unwrap(),
            PusherEvent::Error { message: "App key not in this cluster".to_string() }
        );

        let bare_error = r#"{"event":"pusher:error"}"#;
        assert_eq!(
            decode_frame(bare_error).unwrap(),
            PusherEvent::Error { message: "Connection error".to_string() }
        );

        let unknown = r#"{"event":"App\\Events\\UserBannedEvent","data":"{}"}"#;
        assert!(matches!(decode_frame(unknown).unwrap(), PusherEvent::Other(_)));
    }

    #[test]
    fn test_garbage_frame_is_parse_error() {
        assert!(matches!(decode_frame("not json"), Err(AdapterError::Parse(_))));
        assert!(matches!(decode_frame(r#"{"data":{}}"#), Err(AdapterError::Parse(_))));
    }

    #[test]
    fn test_subscribe_request_names_chatroom() {
        let request: Value = serde_json::from_str(&subscribe_request(668)).unwrap();
        assert_eq!(request["event"], "pusher:subscribe");
        assert_eq!(request["data"]["channel"], "chatrooms.668.v2");
    }

    #[tokio::test]
    async fn test_unknown_channel_never_opens_socket() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/channels/nobody")
            .with_status(404)
            .with_body(r#"{"message":"Not found"}"#)
            .create_async()
            .await;

        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket_url = format!("ws://{}", socket.local_addr().unwrap());

        let status = StatusBoard::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut kick = KickConnection::new(kick_config("nobody", server.url(), socket_url));

        let result = kick.connect(AdapterLink::new(Platform::Kick, tx, status.clone())).await;
        assert!(matches!(result, Err(AdapterError::Lookup(_))));
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Disconnected);
        assert!(!kick.is_running());

        let accepted = tokio::time::timeout(Duration::from_millis(200), socket.accept()).await;
        assert!(accepted.is_err(), "no socket should have been opened");
    }

    #[tokio::test]
    async fn test_silent_api_times_out_as_lookup_failure() {
        // Accepts the TCP connection and never writes a byte
        let api = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let api_base = format!("http://{}", api.local_addr().unwrap());
        let _held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = api.accept().await {
                open.push(stream);
            }
        });

        let status = StatusBoard::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut kick = KickConnection::new(kick_config(
            "xqc",
            api_base,
            "ws://127.0.0.1:9".to_string(),
        ));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            kick.connect(AdapterLink::new(Platform::Kick, tx, status.clone())),
        )
        .await
        .expect("connect should give up on a silent API");

        assert!(matches!(result, Err(AdapterError::Lookup(_))));
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Disconnected);
        assert!(!kick.is_running());
    }

    #[tokio::test]
    async fn test_silent_socket_times_out_as_transport_failure() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/channels/xqc")
            .with_status(200)
            .with_body(r#"{"chatroom":{"id":668}}"#)
            .create_async()
            .await;

        // TCP accepted, WebSocket handshake never answered
        let socket = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket_url = format!("ws://{}", socket.local_addr().unwrap());
        let _held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = socket.accept().await {
                open.push(stream);
            }
        });

        let status = StatusBoard::new();
        let (tx, _rx) = mpsc::channel(4);
        let mut kick = KickConnection::new(kick_config("xqc", server.url(), socket_url));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            kick.connect(AdapterLink::new(Platform::Kick, tx, status.clone())),
        )
        .await
        .expect("connect should give up on a silent socket");

        assert!(matches!(result, Err(AdapterError::Transport(_))));
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Disconnected);
    }

    #[test_log::test(tokio::test)]
    async fn test_handshake_subscribes_then_connects() {
        let mut server = mockito::Server::new_async().await;
        let _lookup = server
            .mock("GET", "/channels/trainwreckstv")
            .with_status(200)
            .with_body(r#"{"id":1,"user_id":2,"chatroom":{"id":668,"chatable_type":"App\\Models\\Channel"}}"#)
            .create_async()
            .await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let socket_url = format!("ws://{}", listener.local_addr().unwrap());
        let pusher = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio_tungstenite::accept_async(stream).await.unwrap()
        });

        let status = StatusBoard::new();
        let (tx, mut rx) = mpsc::channel(16);
        let mut kick = KickConnection::new(kick_config("Trainwreckstv", server.url(), socket_url));
        kick.connect(AdapterLink::new(Platform::Kick, tx, status.clone())).await.unwrap();
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Connecting);

        let mut ws = pusher.await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"pusher:connection_established","data":"{\"socket_id\":\"1.2\"}"}"#.to_string(),
        ))
        .await
        .unwrap();

        let subscribe = loop {
            if let Message::Text(text) = ws.next().await.unwrap().unwrap() {
                break text;
            }
        };
        assert_eq!(subscribe, subscribe_request(668));

        ws.send(Message::Text("{broken".to_string())).await.unwrap();
        ws.send(Message::Text(
            r#"{"event":"pusher_internal:subscription_succeeded","data":"{}"}"#.to_string(),
        ))
        .await
        .unwrap();
        ws.send(Message::Text(chat_frame(&json!({ "sender": { "username": "bob" }, "content": "hello" }))))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            ChatEvent::Message(banner) => {
                assert!(banner.is_system());
                assert_eq!(banner.text(), "Connected to Trainwreckstv's chat");
            }
            other => panic!("expected banner, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            ChatEvent::Message(chat) => assert_eq!(chat.text(), "hello"),
            other => panic!("expected chat, got {:?}", other),
        }
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Connected);

        kick.disconnect().await;
        assert_eq!(status.get(Platform::Kick).await, ConnectionState::Disconnected);
    }
}
