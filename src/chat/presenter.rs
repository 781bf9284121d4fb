// src/chat/presenter.rs - Frame-coalesced message presentation

use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{sleep_until, Instant};

use crate::chat::sink::RenderSink;
use crate::config::ChatConfig;
use crate::emotes::{EmoteCatalog, EmoteProvider, EmoteResolver};
use crate::types::{CanonicalMessage, ChatEvent, Fragment, RenderedMessage};

/// Sink shared between the supervisor (for clears) and the presenter task
pub type SharedSink = Arc<Mutex<Box<dyn RenderSink>>>;

/// Display toggles applied at flush time
#[derive(Debug, Clone, PartialEq)]
pub struct PresentOptions {
    pub max_messages: usize,
    pub show_system_messages: bool,
    pub show_platform_badges: bool,
    pub show_username_colors: bool,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            max_messages: 500,
            show_system_messages: true,
            show_platform_badges: true,
            show_username_colors: true,
        }
    }
}

impl From<&ChatConfig> for PresentOptions {
    fn from(config: &ChatConfig) -> Self {
        Self {
            max_messages: config.max_messages,
            show_system_messages: config.show_system_messages,
            show_platform_badges: config.show_platform_badges,
            show_username_colors: config.show_username_colors,
        }
    }
}

/// Pending batch plus the bounded store of what has been displayed
pub struct PresentationQueue {
    pending: Vec<CanonicalMessage>,
    flush_scheduled: bool,
    retained: VecDeque<RenderedMessage>,
    options: PresentOptions,
}

impl PresentationQueue {
    pub fn new(options: PresentOptions) -> Self {
        Self {
            pending: Vec::new(),
            flush_scheduled: false,
            retained: VecDeque::new(),
            options,
        }
    }

    /// Queue a message. Returns true when the caller must schedule a flush.
    pub fn enqueue(&mut self, message: CanonicalMessage) -> bool {
        if message.is_system() && !self.options.show_system_messages {
            debug!("Suppressing system message: {}", message.text());
            return false;
        }

        self.pending.push(message);
        if self.flush_scheduled {
            false
        } else {
            self.flush_scheduled = true;
            true
        }
    }

    /// Render everything pending, in arrival order, then enforce retention.
    /// Returns the number of messages handed to the sink.
    pub fn flush(&mut self, catalog: &EmoteCatalog, sink: &mut dyn RenderSink) -> usize {
        let pending = std::mem::take(&mut self.pending);
        if let Some(oldest) = pending.first() {
            let waited = chrono::Utc::now() - oldest.received_at();
            debug!(
                "Flushing {} messages, oldest queued {} ms",
                pending.len(),
                waited.num_milliseconds()
            );
        }
        let batch: Vec<RenderedMessage> = pending
            .into_iter()
            .map(|message| self.render(message, catalog))
            .collect();
        self.flush_scheduled = false;

        if !batch.is_empty() {
            sink.append(&batch);
        }
        let rendered = batch.len();
        self.retained.extend(batch);

        let excess = self.retained.len().saturating_sub(self.options.max_messages);
        if excess > 0 {
            self.retained.drain(..excess);
            sink.evict(excess);
        }
        rendered
    }

    fn render(&self, message: CanonicalMessage, catalog: &EmoteCatalog) -> RenderedMessage {
        let is_system = message.is_system();
        let fragments = if is_system {
            vec![Fragment::Text(message.text().to_string())]
        } else {
            catalog.substitute(message.text())
        };

        // System banners keep their accent colour regardless of the toggle
        let color = if is_system || self.options.show_username_colors {
            message.color().map(str::to_string)
        } else {
            None
        };

        RenderedMessage {
            platform: message.platform(),
            username: message.username().to_string(),
            color,
            fragments,
            is_system,
            show_badge: self.options.show_platform_badges,
        }
    }

    /// Applied at the next flush
    pub fn set_max_messages(&mut self, max_messages: usize) {
        self.options.max_messages = max_messages;
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.flush_scheduled
    }

    pub fn retained(&self) -> impl Iterator<Item = &RenderedMessage> {
        self.retained.iter()
    }

    pub fn retained_len(&self) -> usize {
        self.retained.len()
    }
}

/// Single consumer of adapter events. Owns the queue and the emote catalog.
pub struct Presenter {
    queue: PresentationQueue,
    resolver: EmoteResolver,
    sink: SharedSink,
    frame_interval: Duration,
}

impl Presenter {
    pub fn new(
        queue: PresentationQueue,
        resolver: EmoteResolver,
        sink: SharedSink,
        frame_interval: Duration,
    ) -> Self {
        Self {
            queue,
            resolver,
            sink,
            frame_interval,
        }
    }

    /// Runs until every sender is dropped; anything still pending is flushed then.
    pub async fn run(mut self, mut events: mpsc::Receiver<ChatEvent>) {
        info!("Presenter started");
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ChatEvent::Message(message)) => {
                        if self.queue.enqueue(message) {
                            deadline = Some(Instant::now() + self.frame_interval);
                        }
                    }
                    Some(ChatEvent::NativeEmotes(emotes)) => {
                        self.resolver
                            .catalog_mut()
                            .extend(EmoteProvider::TwitchNative, emotes);
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.flush().await;
                }
            }
        }

        if self.queue.pending_len() > 0 {
            self.flush().await;
        }
        info!("Presenter stopped");
    }

    async fn flush(&mut self) {
        let mut sink = self.sink.lock().await;
        self.queue.flush(self.resolver.catalog(), sink.as_mut());
    }
}
