use anyhow::{Context, Result};
use log::{error, info, warn};
use std::env;
use std::path::PathBuf;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;

use unichat::config::{self, ConfigWatcher};
use unichat::prelude::*;

const DEFAULT_CONFIG_PATH: &str = "unichat.yaml";

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C signal, shutting down..."),
        _ = terminate => info!("Received SIGTERM signal, shutting down..."),
    }
}

async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<ChatConfig> {
    match watcher {
        Some(watcher) => watcher.next().await,
        None => std::future::pending().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables and initialize logging
    dotenv::dotenv().ok();
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    info!("Starting Unichat v{}", unichat::VERSION);

    let config_path = env::var("UNICHAT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = ChatConfig::load(&config_path)
        .await
        .with_context(|| format!("failed to load configuration from {}", config_path.display()))?;

    let mut watcher = match config::watch(&config_path) {
        Ok(watcher) => {
            info!("Watching {} for changes", config_path.display());
            Some(watcher)
        }
        Err(e) => {
            warn!("Configuration hot-reload disabled: {}", e);
            None
        }
    };

    let sink = TerminalSink::stdout(config.max_width);
    let mut supervisor = ChatSupervisor::new(config, Box::new(sink));
    let mut status_changes = supervisor.subscribe();

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    // Startup and reloads stay interruptible by a shutdown signal
    let interrupted = tokio::select! {
        _ = &mut shutdown => true,
        result = supervisor.initialize() => {
            result?;
            false
        }
    };

    while !interrupted {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(updated) = next_config(&mut watcher) => {
                let reloaded = tokio::select! {
                    _ = &mut shutdown => None,
                    result = supervisor.reconfigure(updated) => Some(result),
                };
                match reloaded {
                    None => break,
                    Some(Err(e)) => error!("Failed to apply new configuration: {:#}", e),
                    Some(Ok(())) => {}
                }
            }
            change = status_changes.recv() => match change {
                Ok(change) => info!("{} is now {:?}", change.platform, change.state),
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} status updates", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    supervisor.teardown_all().await;
    info!("Unichat shutdown complete");
    Ok(())
}
