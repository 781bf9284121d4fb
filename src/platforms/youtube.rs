// src/platforms/youtube.rs - YouTube Live Chat polling

use async_trait::async_trait;
use log::{debug, error, info};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use url::Url;

use crate::config::ChatConfig;
use crate::platforms::{http_client, AdapterError, AdapterLink, PlatformAdapter, TaskSlot};
use crate::types::{CanonicalMessage, ConnectionState, Platform};

/// `GET /videos?part=liveStreamingDetails` response
#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(rename = "liveStreamingDetails", default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
struct LiveStreamingDetails {
    #[serde(rename = "activeLiveChatId", default)]
    active_live_chat_id: Option<String>,
}

/// One page of `liveChat/messages`. Items stay raw so a bad item only drops itself.
#[derive(Debug, Deserialize)]
pub struct MessagePage {
    #[serde(default)]
    items: Vec<Value>,
    #[serde(rename = "nextPageToken", default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LiveChatItem {
    #[serde(rename = "authorDetails")]
    author_details: AuthorDetails,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct AuthorDetails {
    #[serde(rename = "displayName")]
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    #[serde(rename = "displayMessage")]
    display_message: String,
}

/// Configuration for YouTube Live Chat polling
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub video_id: String,
    pub api_key: String,
    pub api_base: String,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
}

impl YouTubeConfig {
    pub fn from_chat_config(config: &ChatConfig) -> Option<Self> {
        config.youtube_target().map(|(video_id, api_key)| Self {
            video_id: video_id.to_string(),
            api_key: api_key.to_string(),
            api_base: config.endpoints.youtube_api.clone(),
            poll_interval: config.poll_interval(),
            request_timeout: config.request_timeout(),
        })
    }
}

/// Convert a raw page item; None when required fields are missing
fn convert_item(item: Value) -> Option<CanonicalMessage> {
    match serde_json::from_value::<LiveChatItem>(item) {
        Ok(item) => Some(CanonicalMessage::chat(
            Platform::YouTube,
            item.author_details.display_name,
            item.snippet.display_message,
            None,
        )),
        Err(e) => {
            debug!("Dropping YouTube chat item: {}", e);
            None
        }
    }
}

/// Cursor-carrying fetcher for one live chat
pub struct LiveChatPoller {
    http_client: reqwest::Client,
    api_base: String,
    api_key: String,
    live_chat_id: String,
    next_page_token: Option<String>,
}

impl LiveChatPoller {
    pub fn new(http_client: reqwest::Client, api_base: &str, api_key: &str, live_chat_id: &str) -> Self {
        Self {
            http_client,
            api_base: api_base.to_string(),
            api_key: api_key.to_string(),
            live_chat_id: live_chat_id.to_string(),
            next_page_token: None,
        }
    }

    pub fn next_page_token(&self) -> Option<&str> {
        self.next_page_token.as_deref()
    }

    /// URL of the next poll; carries `pageToken` only if the last page had one
    pub fn messages_url(&self) -> Result<Url, AdapterError> {
        let mut url = Url::parse_with_params(
            &format!("{}/liveChat/messages", self.api_base),
            &[
                ("liveChatId", self.live_chat_id.as_str()),
                ("part", "snippet,authorDetails"),
                ("key", self.api_key.as_str()),
            ],
        )
        .map_err(|e| AdapterError::Transport(format!("invalid YouTube API url: {}", e)))?;

        if let Some(token) = &self.next_page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }
        Ok(url)
    }

    /// Take a decoded page: replace the cursor and convert its items
    pub fn apply_page(&mut self, page: MessagePage) -> Vec<CanonicalMessage> {
        self.next_page_token = page.next_page_token;
        page.items.into_iter().filter_map(convert_item).collect()
    }

    /// Fetch one page. On failure the cursor is left untouched.
    pub async fn poll(&mut self) -> Result<Vec<CanonicalMessage>, AdapterError> {
        let url = self.messages_url()?;
        debug!("Polling YouTube Live Chat: {}", self.live_chat_id);

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AdapterError::Transport(format!("failed to poll YouTube Live Chat API: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AdapterError::Transport(format!("YouTube API error {}: {}", status, error_text)));
        }

        let page: MessagePage = response
            .json()
            .await
            .map_err(|e| AdapterError::Parse(format!("failed to parse YouTube Live Chat response: {}", e)))?;

        Ok(self.apply_page(page))
    }
}

/// YouTube Live Chat adapter: video lookup, then fixed-interval polling
pub struct YouTubeConnection {
    config: YouTubeConfig,
    http_client: reqwest::Client,
    task: TaskSlot,
}

impl YouTubeConnection {
    pub fn new(config: YouTubeConfig) -> Self {
        Self {
            http_client: http_client(config.request_timeout),
            config,
            task: TaskSlot::default(),
        }
    }

    /// Find the active live chat id for the configured video
    pub async fn lookup_live_chat(&self) -> Result<String, AdapterError> {
        let url = Url::parse_with_params(
            &format!("{}/videos", self.config.api_base),
            &[
                ("part", "liveStreamingDetails"),
                ("id", self.config.video_id.as_str()),
                ("key", self.config.api_key.as_str()),
            ],
        )
        .map_err(|e| AdapterError::Lookup(format!("invalid YouTube API url: {}", e)))?;

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| AdapterError::Lookup(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AdapterError::Lookup(format!(
                "YouTube video lookup failed: {}",
                response.status()
            )));
        }

        let videos: VideosResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Lookup(format!("unexpected videos response: {}", e)))?;

        videos
            .items
            .into_iter()
            .next()
            .and_then(|video| video.live_streaming_details)
            .and_then(|details| details.active_live_chat_id)
            .ok_or_else(|| {
                AdapterError::Lookup(format!(
                    "no active live chat for video {}",
                    self.config.video_id
                ))
            })
    }
}

#[async_trait]
impl PlatformAdapter for YouTubeConnection {
    fn platform(&self) -> Platform {
        Platform::YouTube
    }

    async fn connect(&mut self, link: AdapterLink) -> Result<(), AdapterError> {
        self.task.stop(Platform::YouTube).await;
        link.set_status(ConnectionState::Connecting).await;
        info!("Connecting to YouTube Live Chat for video {}...", self.config.video_id);

        let live_chat_id = match self.lookup_live_chat().await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to connect to YouTube: {}", e);
                link.set_status(ConnectionState::Disconnected).await;
                return Err(e);
            }
        };
        info!("Found YouTube live chat id: {}", live_chat_id);

        link.set_status(ConnectionState::Connected).await;
        link.emit_system("Connected to YouTube live chat", Platform::YouTube.system_color())
            .await;

        let poller = LiveChatPoller::new(
            self.http_client.clone(),
            &self.config.api_base,
            &self.config.api_key,
            &live_chat_id,
        );
        let shutdown = self.task.arm();
        let handle = tokio::spawn(poll_loop(poller, link, self.config.poll_interval, shutdown));
        self.task.attach(handle);
        Ok(())
    }

    async fn disconnect(&mut self) {
        if self.task.is_running() {
            info!("Disconnecting from YouTube Live Chat");
        }
        self.task.stop(Platform::YouTube).await;
    }

    fn is_running(&self) -> bool {
        self.task.is_running()
    }
}

async fn poll_loop(
    mut poller: LiveChatPoller,
    link: AdapterLink,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    info!("YouTube Live Chat poller started");

    // First tick fires immediately
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    'polling: loop {
        tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            biased;
            _ = shutdown.recv() => break,
            result = poller.poll() => result,
        };

        match result {
            Ok(messages) => {
                debug!("Polled {} new YouTube messages", messages.len());
                for message in messages {
                    if !link.emit(message).await {
                        break 'polling;
                    }
                }
            }
            Err(e) => error!("Failed to poll YouTube messages: {}", e),
        }
    }

    link.set_status(ConnectionState::Disconnected).await;
    info!("YouTube Live Chat poller stopped");
}
