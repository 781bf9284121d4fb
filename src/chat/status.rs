// src/chat/status.rs - Aggregate per-platform connection state

use log::info;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::types::{ConnectionState, Platform, StatusChange};

/// Shared connection state for every platform. Changes are broadcast only
/// when a platform's state actually differs from what was stored.
#[derive(Clone)]
pub struct StatusBoard {
    states: Arc<RwLock<HashMap<Platform, ConnectionState>>>,
    notifier: broadcast::Sender<StatusChange>,
}

impl StatusBoard {
    pub fn new() -> Self {
        let (notifier, _) = broadcast::channel(64);
        let states = Platform::ALL
            .iter()
            .map(|platform| (*platform, ConnectionState::Disconnected))
            .collect();

        Self {
            states: Arc::new(RwLock::new(states)),
            notifier,
        }
    }

    /// Returns true when the state changed
    pub async fn set(&self, platform: Platform, state: ConnectionState) -> bool {
        let previous = {
            let mut states = self.states.write().await;
            states.insert(platform, state)
        };

        if previous == Some(state) {
            return false;
        }

        info!("{} status: {:?}", platform, state);
        // No subscribers is fine
        let _ = self.notifier.send(StatusChange { platform, state });
        true
    }

    pub async fn get(&self, platform: Platform) -> ConnectionState {
        self.states
            .read()
            .await
            .get(&platform)
            .copied()
            .unwrap_or_default()
    }

    pub async fn snapshot(&self) -> HashMap<Platform, ConnectionState> {
        self.states.read().await.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.notifier.subscribe()
    }
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new()
    }
}
