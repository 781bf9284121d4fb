// src/config/mod.rs - Overlay configuration: defaults, YAML file, environment overrides

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::fs;
use tokio::sync::mpsc;

const SEVENTV_SET_MARKER: &str = "7tv.app/emote-sets/";

/// Upstream base URLs. Overridable so the adapters can be pointed at local servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub twitch_irc: String,
    pub kick_api: String,
    pub kick_socket: String,
    pub youtube_api: String,
    pub seventv_api: String,
    pub bttv_api: String,
    pub ffz_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            twitch_irc: "wss://irc-ws.chat.twitch.tv:443".to_string(),
            kick_api: "https://kick.com/api/v2".to_string(),
            kick_socket: "wss://ws-us2.pusher.com/app/32cbd69e4b950bf97679?protocol=7&client=js&version=8.4.0-rc2&flash=false".to_string(),
            youtube_api: "https://www.googleapis.com/youtube/v3".to_string(),
            seventv_api: "https://7tv.io/v3".to_string(),
            bttv_api: "https://api.betterttv.net/3".to_string(),
            ffz_api: "https://api.frankerfacez.com/v1".to_string(),
        }
    }
}

/// Everything the supervisor needs to (re)initialize a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Twitch channel login
    pub twitch: Option<String>,
    /// Kick channel slug
    pub kick: Option<String>,
    /// YouTube video id of the live stream
    pub youtube: Option<String>,
    /// YouTube Data API key
    pub youtube_key: Option<String>,
    /// Custom 7TV emote set id
    pub emote_set: Option<String>,

    pub show_platform_badges: bool,
    pub show_system_messages: bool,
    pub show_username_colors: bool,
    pub max_messages: usize,
    pub max_width: u32,

    pub poll_interval_secs: u64,
    /// Upper bound on any single lookup, poll, or socket handshake
    pub request_timeout_secs: u64,
    pub frame_interval_ms: u64,
    pub endpoints: Endpoints,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            twitch: None,
            kick: None,
            youtube: None,
            youtube_key: None,
            emote_set: None,
            show_platform_badges: true,
            show_system_messages: true,
            show_username_colors: true,
            max_messages: 500,
            max_width: 1200,
            poll_interval_secs: 5,
            request_timeout_secs: 10,
            frame_interval_ms: 16,
            endpoints: Endpoints::default(),
        }
    }
}

impl ChatConfig {
    /// Load a YAML file (missing file means defaults), then apply environment overrides
    pub async fn load(path: &Path) -> Result<Self> {
        let mut config = if fs::try_exists(path).await.unwrap_or(false) {
            let content = fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_yaml::from_str::<ChatConfig>(&content)
                .with_context(|| format!("Invalid config file {}", path.display()))?
        } else {
            debug!("No config file at {}, using defaults", path.display());
            Self::default()
        };

        config.apply_env()?;
        config.normalize();
        config.validate()?;

        info!(
            "Loaded chat config: twitch={:?} kick={:?} youtube={:?} max_messages={}",
            config.twitch, config.kick, config.youtube, config.max_messages
        );
        Ok(config)
    }

    /// Persist the current settings as YAML
    pub async fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        info!("Saved chat config to {}", path.display());
        Ok(())
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(value) = env::var("UNICHAT_TWITCH") {
            self.twitch = Some(value);
        }
        if let Ok(value) = env::var("UNICHAT_KICK") {
            self.kick = Some(value);
        }
        if let Ok(value) = env::var("UNICHAT_YOUTUBE") {
            self.youtube = Some(value);
        }
        if let Ok(value) = env::var("UNICHAT_YOUTUBE_KEY") {
            self.youtube_key = Some(value);
        }
        if let Ok(value) = env::var("UNICHAT_7TV") {
            self.emote_set = Some(value);
        }

        // Flags read as "hide" switches so an unset variable keeps the file's value
        if let Ok(value) = env::var("UNICHAT_HIDE_BADGES") {
            self.show_platform_badges = value != "true";
        }
        if let Ok(value) = env::var("UNICHAT_HIDE_SYSTEM") {
            self.show_system_messages = value != "true";
        }
        if let Ok(value) = env::var("UNICHAT_HIDE_COLORS") {
            self.show_username_colors = value != "true";
        }

        if let Ok(value) = env::var("UNICHAT_MAX_MESSAGES") {
            self.max_messages = value
                .trim()
                .parse()
                .with_context(|| format!("UNICHAT_MAX_MESSAGES must be a non-negative integer, got '{}'", value))?;
        }
        if let Ok(value) = env::var("UNICHAT_MAX_WIDTH") {
            self.max_width = value
                .trim()
                .parse()
                .with_context(|| format!("UNICHAT_MAX_WIDTH must be a non-negative integer, got '{}'", value))?;
        }
        Ok(())
    }

    /// Trim identifiers, drop blank ones and reduce 7TV set URLs to their id
    pub fn normalize(&mut self) {
        for field in [
            &mut self.twitch,
            &mut self.kick,
            &mut self.youtube,
            &mut self.youtube_key,
            &mut self.emote_set,
        ] {
            *field = field
                .take()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }

        if let Some(set) = self.emote_set.take() {
            let id = match set.split_once(SEVENTV_SET_MARKER) {
                Some((_, rest)) => rest.trim_end_matches('/').to_string(),
                None => set,
            };
            self.emote_set = Some(id).filter(|id| !id.is_empty());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_secs == 0 {
            return Err(anyhow::anyhow!("poll_interval_secs must be at least 1"));
        }
        if self.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be at least 1"));
        }
        if self.frame_interval_ms == 0 {
            return Err(anyhow::anyhow!("frame_interval_ms must be at least 1"));
        }
        if self.youtube.is_some() && self.youtube_key.is_none() {
            warn!("YouTube video configured without an API key; YouTube chat will not start");
        }
        Ok(())
    }

    pub fn twitch_channel(&self) -> Option<&str> {
        self.twitch.as_deref()
    }

    pub fn kick_channel(&self) -> Option<&str> {
        self.kick.as_deref()
    }

    /// Video id and API key, only when both are present
    pub fn youtube_target(&self) -> Option<(&str, &str)> {
        match (self.youtube.as_deref(), self.youtube_key.as_deref()) {
            (Some(video), Some(key)) => Some((video, key)),
            _ => None,
        }
    }

    pub fn has_any_platform(&self) -> bool {
        self.twitch_channel().is_some() || self.kick_channel().is_some() || self.youtube_target().is_some()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

/// Keeps the file watcher alive and yields a freshly loaded config on every change
pub struct ConfigWatcher {
    _watcher: RecommendedWatcher,
    updates: mpsc::Receiver<ChatConfig>,
}

impl ConfigWatcher {
    pub async fn next(&mut self) -> Option<ChatConfig> {
        self.updates.recv().await
    }
}

/// Watch `path` for modifications and reload it (debounced)
pub fn watch(path: &Path) -> Result<ConfigWatcher> {
    let path: PathBuf = path.to_path_buf();
    let watch_dir = path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file_name = path.file_name().map(|name| name.to_os_string());

    let (event_tx, mut event_rx) = mpsc::channel::<Event>(100);
    let (config_tx, config_rx) = mpsc::channel(4);

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if let Err(e) = event_tx.blocking_send(event) {
                error!("Failed to send file watch event: {}", e);
            }
        }
    })?;
    watcher.watch(&watch_dir, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        let mut last_reload: Option<Instant> = None;

        while let Some(event) = event_rx.recv().await {
            if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                continue;
            }
            let touches_config = event
                .paths
                .iter()
                .any(|changed| changed.file_name().map(|n| n.to_os_string()) == file_name);
            if !touches_config {
                continue;
            }

            // Editors fire several events per save
            if last_reload.map_or(false, |at| at.elapsed() < Duration::from_millis(500)) {
                continue;
            }
            last_reload = Some(Instant::now());

            info!("Configuration file changed, reloading {}", path.display());
            match ChatConfig::load(&path).await {
                Ok(config) => {
                    if config_tx.send(config).await.is_err() {
                        break;
                    }
                }
                Err(e) => error!("Failed to reload config: {:#}", e),
            }
        }
        debug!("Config watcher stopped");
    });

    Ok(ConfigWatcher {
        _watcher: watcher,
        updates: config_rx,
    })
}
