// src/modules/config_reload.rs
use crate::config::Config;
use crate::error::{Result, WatcherError};
use crate::modules::credentials::StaticCredentialSource;
use crate::modules::resource_watcher::{Reconfigured, ResourceWatcher};
use async_trait::async_trait;
use log::{debug, info, warn};
use notify::{recommended_watcher, EventKind, RecursiveMode, Watcher};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::sleep;

#[async_trait]
pub trait ConfigChangeHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle_change(&self, old_config: &Config, new_config: &Config) -> Result<()>;
}

/// Pushes reloaded credentials and overrides into a running watcher.
pub struct WatcherReloadHandler {
    watcher: Arc<ResourceWatcher>,
}

impl WatcherReloadHandler {
    pub fn new(watcher: Arc<ResourceWatcher>) -> Self {
        Self { watcher }
    }
}

#[async_trait]
impl ConfigChangeHandler for WatcherReloadHandler {
    fn name(&self) -> &str {
        "WatcherReloadHandler"
    }

    async fn handle_change(&self, old_config: &Config, new_config: &Config) -> Result<()> {
        if old_config.watcher != new_config.watcher {
            warn!("Changes to the [watcher] section take effect after a restart.");
        }
        if old_config.credentials != new_config.credentials {
            let source = StaticCredentialSource::new(&new_config.credentials)?;
            self.watcher.set_credential_source(Arc::new(source)).await;
        }
        match self.watcher.reconfigure(&new_config.overrides).await? {
            Reconfigured::Unchanged => debug!("Reload left watcher settings unchanged."),
            Reconfigured::Applied { fetcher_rebuilt } => {
                info!("Reload applied (fetcher rebuilt: {}).", fetcher_rebuilt)
            }
            Reconfigured::FellBack {
                reason, applied, ..
            } => warn!(
                "Reload kept the previous credentials ({}); other settings applied: {}.",
                reason, applied
            ),
        }
        Ok(())
    }
}

pub struct ConfigFileWatcher {
    handlers: Vec<Box<dyn ConfigChangeHandler>>,
}

impl ConfigFileWatcher {
    pub fn new(handlers: Vec<Box<dyn ConfigChangeHandler>>) -> Self {
        Self { handlers }
    }
}

const MAX_RELOAD_RETRIES: usize = 3;
const RELOAD_RETRY_DELAY_MS: u64 = 200;
const DEBOUNCE_MS: u64 = 150;

pub fn load_config_with_hash(path: &Path) -> Result<(Config, String)> {
    let content = fs::read_to_string(path)?;
    let cfg = Config::from_toml(&content)
        .map_err(|e| WatcherError::Config(format!("Failed to parse config {:?}: {}", path, e)))?;
    let hash = hex::encode(Sha256::digest(content.as_bytes()));
    Ok((cfg, hash))
}

impl ConfigFileWatcher {
    /// Reloads `config_path` whenever it changes and notifies the handlers.
    pub async fn watch(&self, config_path: PathBuf, shared_config: Arc<RwLock<Config>>) -> Result<()> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let parent_dir = config_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let Some(config_file_name) = config_path.file_name().map(|s| s.to_os_string()) else {
            return Err(WatcherError::Config(format!(
                "Config path {:?} is missing file name",
                config_path
            )));
        };

        // Kept alive for the lifetime of the loop below.
        let mut fs_watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .map_err(|e| WatcherError::Config(format!("Failed to start file watcher: {}", e)))?;
        fs_watcher
            .watch(&parent_dir, RecursiveMode::NonRecursive)
            .map_err(|e| {
                WatcherError::Config(format!("Failed to watch {:?}: {}", parent_dir, e))
            })?;
        info!("Watching {:?} for configuration changes", config_path);

        let mut last_config_hash: Option<String> = fs::read_to_string(&config_path)
            .ok()
            .map(|content| hex::encode(Sha256::digest(content.as_bytes())));

        while let Some(event) = rx.recv().await {
            if !is_relevant_event(&event.kind) {
                continue;
            }
            if !event
                .paths
                .iter()
                .any(|p| p.file_name() == Some(&config_file_name))
            {
                continue;
            }

            // Debounce rapid writes
            sleep(Duration::from_millis(DEBOUNCE_MS)).await;
            while rx.try_recv().is_ok() {}

            let Some((new_config, new_hash)) = self.reload_with_retries(&config_path).await else {
                warn!("Giving up config reload after {} attempts.", MAX_RELOAD_RETRIES);
                continue;
            };

            if last_config_hash.as_ref() == Some(&new_hash) {
                debug!("Config content unchanged; skipping handlers.");
                continue;
            }

            let old_config = {
                let mut guard = shared_config.write().await;
                std::mem::replace(&mut *guard, new_config.clone())
            };
            last_config_hash = Some(new_hash);

            for handler in &self.handlers {
                if let Err(e) = handler.handle_change(&old_config, &new_config).await {
                    warn!(
                        "Handler {} failed during config change: {}",
                        handler.name(),
                        e
                    );
                }
            }
        }
        Ok(())
    }

    async fn reload_with_retries(&self, config_path: &Path) -> Option<(Config, String)> {
        for attempt in 1..=MAX_RELOAD_RETRIES {
            match load_config_with_hash(config_path) {
                Ok(loaded) => return Some(loaded),
                Err(e) => {
                    warn!(
                        "Failed to reload config (attempt {}/{}): {}",
                        attempt, MAX_RELOAD_RETRIES, e
                    );
                    if attempt < MAX_RELOAD_RETRIES {
                        sleep(Duration::from_millis(RELOAD_RETRY_DELAY_MS)).await;
                    }
                }
            }
        }
        None
    }
}

fn is_relevant_event(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(_) | EventKind::Create(_) | EventKind::Any
    )
}
