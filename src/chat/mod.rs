// src/chat/mod.rs - Session supervision: adapters, presenter, and status

use anyhow::{Context, Result};
use futures_util::future::join_all;
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::config::ChatConfig;
use crate::emotes::EmoteResolver;
use crate::platforms::kick::{KickConfig, KickConnection};
use crate::platforms::twitch::{TwitchConfig, TwitchConnection};
use crate::platforms::youtube::{YouTubeConfig, YouTubeConnection};
use crate::platforms::{AdapterLink, PlatformAdapter};
use crate::types::{ChatEvent, ConnectionState, Platform, StatusChange};

pub mod presenter;
pub mod sink;
pub mod status;

use presenter::{PresentOptions, PresentationQueue, Presenter, SharedSink};
use sink::RenderSink;
use status::StatusBoard;

/// Capacity of the adapter → presenter channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Everything that exists only while a chat session is live
struct Session {
    adapters: Vec<Box<dyn PlatformAdapter>>,
    events: mpsc::Sender<ChatEvent>,
    presenter: JoinHandle<()>,
}

/// Owns the current session and the state that outlives it
pub struct ChatSupervisor {
    config: ChatConfig,
    status: StatusBoard,
    sink: SharedSink,
    session: Option<Session>,
}

impl ChatSupervisor {
    pub fn new(config: ChatConfig, sink: Box<dyn RenderSink>) -> Self {
        Self {
            config,
            status: StatusBoard::new(),
            sink: Arc::new(Mutex::new(sink)),
            session: None,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.status.subscribe()
    }

    pub async fn connection_state(&self, platform: Platform) -> ConnectionState {
        self.status.get(platform).await
    }

    pub async fn connection_states(&self) -> HashMap<Platform, ConnectionState> {
        self.status.snapshot().await
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// One adapter per configured platform, nothing for the rest
    fn build_adapters(config: &ChatConfig) -> Vec<Box<dyn PlatformAdapter>> {
        let mut adapters: Vec<Box<dyn PlatformAdapter>> = Vec::new();

        if let Some(twitch) = TwitchConfig::from_chat_config(config) {
            adapters.push(Box::new(TwitchConnection::new(twitch)));
        }
        if let Some(kick) = KickConfig::from_chat_config(config) {
            adapters.push(Box::new(KickConnection::new(kick)));
        }
        if let Some(youtube) = YouTubeConfig::from_chat_config(config) {
            adapters.push(Box::new(YouTubeConnection::new(youtube)));
        }

        adapters
    }

    /// Start a fresh session from the current configuration. Any running
    /// session is torn down first. Adapter failures are logged, not returned.
    pub async fn initialize(&mut self) -> Result<()> {
        self.teardown_all().await;
        self.config.validate().context("invalid chat configuration")?;

        if !self.config.has_any_platform() {
            warn!("No platforms configured; nothing to connect to");
        }

        let mut resolver = EmoteResolver::from_config(&self.config);
        resolver.load().await;

        let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let presenter = Presenter::new(
            PresentationQueue::new(PresentOptions::from(&self.config)),
            resolver,
            Arc::clone(&self.sink),
            self.config.frame_interval(),
        );
        let presenter = tokio::spawn(presenter.run(receiver));

        let mut adapters = Self::build_adapters(&self.config);
        let status = &self.status;
        let results = join_all(adapters.iter_mut().map(|adapter| {
            let link = AdapterLink::new(adapter.platform(), events.clone(), status.clone());
            async move {
                let platform = adapter.platform();
                (platform, adapter.connect(link).await)
            }
        }))
        .await;

        let mut started = 0;
        for (platform, result) in results {
            match result {
                Ok(()) => started += 1,
                Err(e) => error!("Failed to connect to {}: {}", platform, e),
            }
        }
        info!("Chat session started: {}/{} platforms connected", started, adapters.len());

        self.session = Some(Session {
            adapters,
            events,
            presenter,
        });
        Ok(())
    }

    /// Stop every adapter and the presenter. Safe to call repeatedly; only
    /// platforms whose state actually changes produce status events.
    pub async fn teardown_all(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Tearing down chat session...");
            let Session {
                mut adapters,
                events,
                presenter,
            } = session;

            join_all(adapters.iter_mut().map(|adapter| adapter.disconnect())).await;
            drop(adapters);
            drop(events);

            presenter.abort();
            let _ = presenter.await;
            info!("Chat session torn down");
        }

        for platform in Platform::ALL {
            self.status.set(platform, ConnectionState::Disconnected).await;
        }
    }

    /// Replace the configuration and start over with an empty display
    pub async fn reconfigure(&mut self, config: ChatConfig) -> Result<()> {
        info!("Reconfiguring chat session");
        self.teardown_all().await;
        self.sink.lock().await.clear();
        self.config = config;
        self.initialize().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::sink::RecordingSink;
    use crate::config::Endpoints;
    use mockito::Matcher;
    use std::time::Duration;

    fn endpoints(server: &mockito::Server) -> Endpoints {
        Endpoints {
            twitch_irc: "ws://127.0.0.1:9".to_string(),
            kick_api: server.url(),
            kick_socket: "ws://127.0.0.1:9".to_string(),
            youtube_api: server.url(),
            seventv_api: server.url(),
            bttv_api: server.url(),
            ffz_api: server.url(),
        }
    }

    async fn drain(rx: &mut broadcast::Receiver<StatusChange>) -> Vec<StatusChange> {
        // Let in-flight state changes land
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        seen
    }

    #[tokio::test]
    async fn test_double_teardown_emits_no_duplicate_events() {
        let mut server = mockito::Server::new_async().await;
        let _videos = server
            .mock("GET", "/videos")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[{"liveStreamingDetails":{"activeLiveChatId":"chat-1"}}]}"#)
            .create_async()
            .await;
        let _messages = server
            .mock("GET", "/liveChat/messages")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[]}"#)
            .create_async()
            .await;

        let config = ChatConfig {
            youtube: Some("vid123".to_string()),
            youtube_key: Some("KEY".to_string()),
            endpoints: endpoints(&server),
            ..ChatConfig::default()
        };
        let recorder = RecordingSink::default();
        let mut supervisor = ChatSupervisor::new(config, Box::new(recorder.clone()));
        let mut rx = supervisor.subscribe();

        supervisor.initialize().await.unwrap();
        assert!(supervisor.is_active());
        assert_eq!(
            supervisor.connection_state(Platform::YouTube).await,
            ConnectionState::Connected
        );

        let started: Vec<ConnectionState> = drain(&mut rx).await.into_iter().map(|c| c.state).collect();
        assert_eq!(started, vec![ConnectionState::Connecting, ConnectionState::Connected]);

        let displayed = recorder.log.lock().unwrap().displayed.clone();
        assert!(displayed
            .iter()
            .any(|m| m.is_system && m.plain_text() == "Connected to YouTube live chat"));

        supervisor.teardown_all().await;
        let first = drain(&mut rx).await;
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].platform, Platform::YouTube);
        assert_eq!(first[0].state, ConnectionState::Disconnected);

        supervisor.teardown_all().await;
        assert!(drain(&mut rx).await.is_empty());
        assert!(!supervisor.is_active());
    }

    #[tokio::test]
    async fn test_unconfigured_platforms_never_start() {
        let mut server = mockito::Server::new_async().await;
        let _kick = server
            .mock("GET", "/channels/nobody")
            .with_status(404)
            .create_async()
            .await;

        let config = ChatConfig {
            kick: Some("nobody".to_string()),
            endpoints: endpoints(&server),
            ..ChatConfig::default()
        };
        let mut supervisor = ChatSupervisor::new(config, Box::new(RecordingSink::default()));
        let mut rx = supervisor.subscribe();

        // A failing adapter does not fail the session
        supervisor.initialize().await.unwrap();

        let changes = drain(&mut rx).await;
        assert!(!changes.is_empty());
        assert!(changes.iter().all(|c| c.platform == Platform::Kick));

        for (platform, state) in supervisor.connection_states().await {
            assert_eq!(state, ConnectionState::Disconnected, "{} should be idle", platform);
        }
        supervisor.teardown_all().await;
    }

    #[tokio::test]
    async fn test_silent_lookup_cannot_stall_initialize() {
        let server = mockito::Server::new_async().await;
        // Kick API that accepts the connection and never answers
        let kick_api = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let kick_base = format!("http://{}", kick_api.local_addr().unwrap());
        let _held = tokio::spawn(async move {
            let mut open = Vec::new();
            while let Ok((stream, _)) = kick_api.accept().await {
                open.push(stream);
            }
        });

        let config = ChatConfig {
            kick: Some("xqc".to_string()),
            request_timeout_secs: 1,
            endpoints: Endpoints {
                kick_api: kick_base,
                ..endpoints(&server)
            },
            ..ChatConfig::default()
        };
        let mut supervisor = ChatSupervisor::new(config, Box::new(RecordingSink::default()));

        tokio::time::timeout(Duration::from_secs(5), supervisor.initialize())
            .await
            .expect("initialize should return once the lookup times out")
            .unwrap();
        assert_eq!(
            supervisor.connection_state(Platform::Kick).await,
            ConnectionState::Disconnected
        );
        supervisor.teardown_all().await;
    }

    #[tokio::test]
    async fn test_reconfigure_clears_sink_and_applies_new_config() {
        let server = mockito::Server::new_async().await;
        let recorder = RecordingSink::default();
        let mut supervisor = ChatSupervisor::new(
            ChatConfig {
                endpoints: endpoints(&server),
                ..ChatConfig::default()
            },
            Box::new(recorder.clone()),
        );
        supervisor.initialize().await.unwrap();

        let updated = ChatConfig {
            max_messages: 10,
            endpoints: endpoints(&server),
            ..ChatConfig::default()
        };
        supervisor.reconfigure(updated).await.unwrap();

        assert_eq!(supervisor.config().max_messages, 10);
        assert!(supervisor.is_active());
        assert_eq!(recorder.log.lock().unwrap().clears, 1);

        supervisor.teardown_all().await;
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut supervisor = ChatSupervisor::new(
            ChatConfig {
                frame_interval_ms: 0,
                ..ChatConfig::default()
            },
            Box::new(RecordingSink::default()),
        );

        assert!(supervisor.initialize().await.is_err());
        assert!(!supervisor.is_active());
    }
}
