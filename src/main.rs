// src/main.rs
mod config;
mod error;
mod modules;

use crate::config::{Config, DEFAULT_CONFIG_PATH};
use crate::modules::{
    ConfigChangeHandler, ConfigFileWatcher, JsonDocumentConsumer, PollingScheduler,
    ResourceWatcher, StaticCredentialSource, WatcherReloadHandler,
};
use anyhow::Result;
use log::{error, info, warn};
use std::env;
use std::path::PathBuf;
use std::process::exit;
use std::sync::Arc;
use tokio::sync::RwLock;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logger based on RUST_LOG env var, or default to info
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    info!("Loading configuration from: {:?}", config_path);

    let config = match Config::load(Some(config_path.as_path())) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            exit(1);
        }
    };

    info!("resource watcher '{}' starting...", config.watcher.name);

    let credentials = match StaticCredentialSource::new(&config.credentials) {
        Ok(source) => Arc::new(source),
        Err(e) => {
            error!("Invalid credentials configuration: {}", e);
            exit(1);
        }
    };

    let consumer = Arc::new(JsonDocumentConsumer::new());
    let watcher = match ResourceWatcher::from_config(&config, credentials, consumer.clone()) {
        Ok(w) => Arc::new(w),
        Err(e) => {
            error!("Invalid watcher configuration: {}", e);
            exit(1);
        }
    };

    // A rejected initial configuration is retried on the next reload.
    if let Err(e) = watcher.reconfigure(&config.overrides).await {
        warn!("Initial configuration was not applied: {}", e);
    }
    if let Some(settings) = watcher.settings().await {
        info!(
            "Polling '{}' every {} ms, caching to {:?}",
            settings.resource_url,
            watcher.polling_interval().as_millis(),
            watcher.cache().path()
        );
    }

    let scheduler = PollingScheduler::new(watcher.clone());

    if config.one_shot {
        info!("One-shot mode enabled. Exiting after a single refresh cycle.");
        return match scheduler.run_once().await {
            Ok(outcome) => {
                info!("Refresh cycle finished: {:?}", outcome);
                if let Some(doc) = consumer.current() {
                    info!(
                        "Current document sha256={} ({} top-level keys), refreshed at {:?}",
                        doc.digest,
                        doc.document.as_object().map_or(0, |o| o.len()),
                        watcher.last_successful_refresh()
                    );
                }
                Ok(())
            }
            Err(e) => {
                error!("Refresh cycle failed: {}", e);
                exit(1);
            }
        };
    }

    let shared_config = Arc::new(RwLock::new(config));
    let handlers: Vec<Box<dyn ConfigChangeHandler>> =
        vec![Box::new(WatcherReloadHandler::new(watcher.clone()))];
    let reloader = ConfigFileWatcher::new(handlers);
    tokio::spawn(async move {
        if let Err(e) = reloader.watch(config_path, shared_config).await {
            error!("Config watcher exited with error: {}", e);
        }
    });

    // Keep polling as a daemon
    scheduler.run().await;
    Ok(())
}
