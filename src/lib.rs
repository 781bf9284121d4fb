//! # Unichat
//!
//! Aggregates live chat from several streaming platforms into one
//! frame-coalesced, bounded message list.
//!
//! ## Features
//!
//! - **Twitch**: anonymous IRC over WebSocket, tags decoded for colours and native emotes
//! - **Kick**: channel lookup over REST, then the Pusher chatroom socket
//! - **YouTube**: Live Chat API polling with a page cursor
//! - **Emotes**: 7TV, BTTV, FFZ and Twitch catalogs with fixed priority
//! - **Presentation**: one flush per frame, oldest messages evicted past `max_messages`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use unichat::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ChatConfig::load(std::path::Path::new("unichat.yaml")).await?;
//!     let sink = TerminalSink::stdout(config.max_width);
//!     let mut supervisor = ChatSupervisor::new(config, Box::new(sink));
//!
//!     supervisor.initialize().await?;
//!     tokio::signal::ctrl_c().await?;
//!     supervisor.teardown_all().await;
//!
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod config;
pub mod emotes;
pub mod platforms;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::chat::presenter::{PresentOptions, PresentationQueue};
    pub use crate::chat::sink::{RenderSink, TerminalSink};
    pub use crate::chat::status::StatusBoard;
    pub use crate::chat::ChatSupervisor;
    pub use crate::config::{ChatConfig, Endpoints};
    pub use crate::emotes::{EmoteCatalog, EmoteProvider, EmoteResolver};
    pub use crate::platforms::{
        kick::{KickConfig, KickConnection},
        twitch::{TwitchConfig, TwitchConnection},
        youtube::{YouTubeConfig, YouTubeConnection},
        AdapterError, PlatformAdapter,
    };
    pub use crate::types::{
        CanonicalMessage, ChatEvent, ConnectionState, Fragment, Platform, RenderedMessage,
        StatusChange,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
