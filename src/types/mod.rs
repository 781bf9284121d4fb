// src/types/mod.rs - Canonical chat types shared by adapters and the presenter

use serde::{Deserialize, Serialize};
use std::fmt;

/// Streaming platforms a chat can be aggregated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Twitch,
    Kick,
    YouTube,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Twitch, Platform::Kick, Platform::YouTube];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Twitch => "twitch",
            Platform::Kick => "kick",
            Platform::YouTube => "youtube",
        }
    }

    /// Accent colour used for this platform's system banners
    pub fn system_color(&self) -> &'static str {
        match self {
            Platform::Twitch => "#9147ff",
            Platform::Kick => "#53fc18",
            Platform::YouTube => "#ff0000",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colour used for error banners regardless of platform
pub const ERROR_COLOR: &str = "#ff0000";

/// Username shown on system banners
pub const SYSTEM_USERNAME: &str = "System";

/// Platform-agnostic chat event. Fields are private so a message cannot be
/// altered after an adapter hands it over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    platform: Platform,
    username: String,
    text: String,
    color: Option<String>,
    is_system: bool,
    received_at: chrono::DateTime<chrono::Utc>,
}

impl CanonicalMessage {
    pub fn chat(
        platform: Platform,
        username: impl Into<String>,
        text: impl Into<String>,
        color: Option<String>,
    ) -> Self {
        Self {
            platform,
            username: username.into(),
            text: text.into(),
            color,
            is_system: false,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn system(platform: Platform, text: impl Into<String>, color: &str) -> Self {
        Self {
            platform,
            username: SYSTEM_USERNAME.to_string(),
            text: text.into(),
            color: Some(color.to_string()),
            is_system: true,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn color(&self) -> Option<&str> {
        self.color.as_deref()
    }

    pub fn is_system(&self) -> bool {
        self.is_system
    }

    pub fn received_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.received_at
    }
}

/// Per-platform connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Published whenever a platform's connection state actually changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub platform: Platform,
    pub state: ConnectionState,
}

/// Everything an adapter can push into the presenter channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    Message(CanonicalMessage),
    /// Emotes announced inline by the platform itself, keyed by code
    NativeEmotes(Vec<(String, String)>),
}

/// One piece of a rendered message body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Fragment {
    Text(String),
    Emote { name: String, url: String },
}

impl Fragment {
    pub fn as_str(&self) -> &str {
        match self {
            Fragment::Text(text) => text,
            Fragment::Emote { name, .. } => name,
        }
    }
}

/// A canonical message after emote substitution and display toggles
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedMessage {
    pub platform: Platform,
    pub username: String,
    pub color: Option<String>,
    pub fragments: Vec<Fragment>,
    pub is_system: bool,
    pub show_badge: bool,
}

impl RenderedMessage {
    /// Message body with every emote replaced by its name
    pub fn plain_text(&self) -> String {
        self.fragments
            .iter()
            .map(Fragment::as_str)
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn emote_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| matches!(f, Fragment::Emote { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_message_shape() {
        let msg = CanonicalMessage::system(Platform::Kick, "Listening", Platform::Kick.system_color());
        assert!(msg.is_system());
        assert_eq!(msg.username(), SYSTEM_USERNAME);
        assert_eq!(msg.color(), Some("#53fc18"));
    }

    #[test]
    fn test_platform_serializes_lowercase() {
        let json = serde_json::to_string(&Platform::YouTube).unwrap();
        assert_eq!(json, "\"youtube\"");
        assert_eq!(Platform::Twitch.to_string(), "twitch");
    }

    #[test]
    fn test_plain_text_joins_fragments() {
        let rendered = RenderedMessage {
            platform: Platform::Twitch,
            username: "alice".to_string(),
            color: None,
            fragments: vec![
                Fragment::Text("hi".to_string()),
                Fragment::Emote { name: "Kappa".to_string(), url: "https://x/1".to_string() },
            ],
            is_system: false,
            show_badge: true,
        };
        assert_eq!(rendered.plain_text(), "hi Kappa");
        assert_eq!(rendered.emote_count(), 1);
    }

    #[test]
    fn test_received_at_is_stamped_on_creation() {
        let before = chrono::Utc::now();
        let message = CanonicalMessage::chat(Platform::YouTube, "ann", "hi", None);
        let after = chrono::Utc::now();
        assert!(message.received_at() >= before && message.received_at() <= after);
    }
}
