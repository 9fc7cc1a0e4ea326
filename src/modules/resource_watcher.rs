// src/modules/resource_watcher.rs
use crate::config::{Config, WatcherOverrides};
use crate::error::{Result, WatcherError};
use crate::modules::cache::CacheStore;
use crate::modules::consumer::DataConsumer;
use crate::modules::credentials::CredentialSource;
use crate::modules::fetcher::{
    ConditionalFetcher, FetchOutcome, FetcherBinding, FetcherFactory, ProtectedFetcherFactory,
};
use crate::modules::scheduler::{Refreshable, RefreshOutcome, Schedule, StartupLoad};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_json::Value;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex, RwLock};

/// The complete set of values a watcher operates under. Replaced as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherSettings {
    pub auth_url: String,
    pub credential_payload: String,
    pub resource_url: String,
    pub polling_interval: Duration,
    pub timeout: Duration,
}

impl WatcherSettings {
    pub fn binding(&self) -> FetcherBinding {
        FetcherBinding {
            auth_url: self.auth_url.clone(),
            credential_payload: self.credential_payload.clone(),
            timeout: self.timeout,
        }
    }

    fn schedule(&self) -> Schedule {
        Schedule {
            resource_url: self.resource_url.clone(),
            polling_interval: self.polling_interval,
        }
    }
}

/// Values used until the first successful reconfiguration.
#[derive(Debug, Clone)]
pub struct WatcherDefaults {
    pub resource_url: String,
    pub polling_interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconfigured {
    /// Every resolved value matched the current settings.
    Unchanged,
    Applied { fetcher_rebuilt: bool },
    /// Credential resolution failed and the committed auth URL and payload were reused.
    /// `applied` is true when other settings still changed.
    FellBack {
        reason: String,
        applied: bool,
        fetcher_rebuilt: bool,
    },
}

impl Reconfigured {
    fn with_resolution_failure(self, failure: Option<String>) -> Self {
        let Some(reason) = failure else {
            return self;
        };
        match self {
            Reconfigured::Unchanged => Reconfigured::FellBack {
                reason,
                applied: false,
                fetcher_rebuilt: false,
            },
            Reconfigured::Applied { fetcher_rebuilt } => Reconfigured::FellBack {
                reason,
                applied: true,
                fetcher_rebuilt,
            },
            fell_back => fell_back,
        }
    }
}

/// Settings and the fetcher bound to them; always swapped together.
struct Active {
    settings: Arc<WatcherSettings>,
    fetcher: Arc<dyn ConditionalFetcher>,
}

pub struct ResourceWatcher {
    name: String,
    config_prefix: String,
    defaults: WatcherDefaults,
    cache: CacheStore,
    consumer: Arc<dyn DataConsumer>,
    factory: Arc<dyn FetcherFactory>,
    credentials: RwLock<Arc<dyn CredentialSource>>,
    active: Mutex<Option<Active>>,
    schedule: watch::Sender<Schedule>,
    last_refresh: StdMutex<Option<SystemTime>>,
}

impl ResourceWatcher {
    pub fn new(
        name: impl Into<String>,
        config_prefix: impl Into<String>,
        defaults: WatcherDefaults,
        cache: CacheStore,
        credentials: Arc<dyn CredentialSource>,
        consumer: Arc<dyn DataConsumer>,
    ) -> Self {
        let (schedule, _) = watch::channel(Schedule {
            resource_url: defaults.resource_url.clone(),
            polling_interval: defaults.polling_interval,
        });
        Self {
            name: name.into(),
            config_prefix: config_prefix.into(),
            defaults,
            cache,
            consumer,
            factory: Arc::new(ProtectedFetcherFactory),
            credentials: RwLock::new(credentials),
            active: Mutex::new(None),
            schedule,
            last_refresh: StdMutex::new(None),
        }
    }

    pub fn from_config(
        config: &Config,
        credentials: Arc<dyn CredentialSource>,
        consumer: Arc<dyn DataConsumer>,
    ) -> Result<Self> {
        let section = &config.watcher;
        if section.default_polling_interval_ms == 0 || section.default_timeout_ms == 0 {
            return Err(WatcherError::Config(
                "default_polling_interval_ms and default_timeout_ms must be > 0".to_string(),
            ));
        }
        let defaults = WatcherDefaults {
            resource_url: section.default_url.clone(),
            polling_interval: Duration::from_millis(section.default_polling_interval_ms),
            timeout: Duration::from_millis(section.default_timeout_ms),
        };
        Ok(Self::new(
            section.name.clone(),
            section.config_prefix.clone(),
            defaults,
            CacheStore::new(&section.cache_dir, &section.resource_name),
            credentials,
            consumer,
        ))
    }

    pub fn with_fetcher_factory(mut self, factory: Arc<dyn FetcherFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub async fn set_credential_source(&self, credentials: Arc<dyn CredentialSource>) {
        *self.credentials.write().await = credentials;
    }

    pub async fn settings(&self) -> Option<Arc<WatcherSettings>> {
        self.active.lock().await.as_ref().map(|a| a.settings.clone())
    }

    pub fn polling_interval(&self) -> Duration {
        self.schedule.borrow().polling_interval
    }

    pub fn last_successful_refresh(&self) -> Option<SystemTime> {
        self.last_refresh.lock().ok().and_then(|guard| *guard)
    }

    fn mark_refreshed(&self) {
        if let Ok(mut guard) = self.last_refresh.lock() {
            *guard = Some(SystemTime::now());
        }
    }

    /// Applies a raw configuration blob.
    ///
    /// Either commits a complete new settings snapshot or leaves the current one untouched.
    /// The fetcher is only rebuilt when the auth URL, credential payload or timeout change.
    pub async fn reconfigure(&self, blob: &Value) -> Result<Reconfigured> {
        let mut active = self.active.lock().await;
        let current = active.as_ref().map(|a| a.settings.clone());

        let credentials = self.credentials.read().await.clone();
        let mut resolution_failure = None;
        let (auth_url, credential_payload) =
            match (credentials.auth_url(), credentials.auth_credentials()) {
                (Ok(url), Ok(payload)) => (url, payload),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(
                        "[{}] Failed to resolve authorization URL or credentials: {}",
                        self.name, e
                    );
                    match &current {
                        Some(s) => {
                            resolution_failure = Some(e.to_string());
                            (s.auth_url.clone(), s.credential_payload.clone())
                        }
                        None => {
                            warn!(
                                "[{}] No valid authorization URL or credentials, not updating configuration",
                                self.name
                            );
                            return Err(e);
                        }
                    }
                }
            };

        let overrides = WatcherOverrides::from_blob(&self.config_prefix, blob);
        let resource_url = match overrides.effective_url() {
            Some(url) => url.to_string(),
            None => current
                .as_ref()
                .map(|s| s.resource_url.clone())
                .unwrap_or_else(|| self.defaults.resource_url.clone()),
        };
        if resource_url.trim().is_empty() {
            warn!("[{}] No resource URL configured, not updating configuration", self.name);
            return Err(WatcherError::Config(format!(
                "no resource URL for '{}'",
                self.config_prefix
            )));
        }
        let polling_interval = overrides
            .effective_polling_interval_ms()
            .map(Duration::from_millis)
            .or_else(|| current.as_ref().map(|s| s.polling_interval))
            .unwrap_or(self.defaults.polling_interval);
        let timeout = overrides
            .effective_timeout_ms()
            .map(Duration::from_millis)
            .or_else(|| current.as_ref().map(|s| s.timeout))
            .unwrap_or(self.defaults.timeout);

        let candidate = WatcherSettings {
            auth_url,
            credential_payload,
            resource_url,
            polling_interval,
            timeout,
        };

        if current.as_deref() == Some(&candidate) {
            info!("[{}] Nothing changed in configuration", self.name);
            return Ok(Reconfigured::Unchanged.with_resolution_failure(resolution_failure));
        }

        let existing = active
            .as_ref()
            .filter(|a| a.settings.binding() == candidate.binding())
            .map(|a| a.fetcher.clone());
        let fetcher_rebuilt = existing.is_none();
        let fetcher = match existing {
            Some(fetcher) => fetcher,
            None => {
                debug!(
                    "[{}] Building fetcher for {} (timeout {} ms)",
                    self.name,
                    candidate.auth_url,
                    candidate.timeout.as_millis()
                );
                self.factory.build(&candidate.binding()).map_err(|e| {
                    warn!("[{}] Failed to build fetcher: {}", self.name, e);
                    e
                })?
            }
        };

        let schedule = candidate.schedule();
        *active = Some(Active {
            settings: Arc::new(candidate),
            fetcher,
        });
        let rescheduled = self.schedule.send_if_modified(|published| {
            if *published == schedule {
                return false;
            }
            *published = schedule.clone();
            true
        });

        info!(
            "[{}] Configuration applied: url='{}' interval={} ms fetcher_rebuilt={} rescheduled={}",
            self.name,
            schedule.resource_url,
            schedule.polling_interval.as_millis(),
            fetcher_rebuilt,
            rescheduled
        );
        Ok(Reconfigured::Applied { fetcher_rebuilt }.with_resolution_failure(resolution_failure))
    }

    /// Hands the cached copy, if any, to the consumer.
    pub async fn startup_load(&self) -> StartupLoad {
        if !self.cache.exists() {
            info!("[{}] No readable cache at {:?}", self.name, self.cache.path());
            return StartupLoad::Absent;
        }
        let data = match self.cache.read() {
            Ok(data) => data,
            Err(e) => {
                warn!(
                    "[{}] Failed to read cache {:?}: {}",
                    self.name,
                    self.cache.path(),
                    e
                );
                return StartupLoad::Absent;
            }
        };
        if self.consumer.on_data(&data) {
            info!(
                "[{}] Loaded {} bytes from {:?}",
                self.name,
                data.len(),
                self.cache.path()
            );
            StartupLoad::Loaded
        } else {
            warn!(
                "[{}] Cached data at {:?} was rejected",
                self.name,
                self.cache.path()
            );
            StartupLoad::Unusable
        }
    }

    /// Conditionally fetches the resource, persists new content and hands it to the consumer.
    ///
    /// Any failure leaves the cached copy untouched.
    pub async fn refresh_cycle(&self) -> Result<RefreshOutcome> {
        let (settings, fetcher) = {
            let guard = self.active.lock().await;
            match guard.as_ref() {
                Some(a) => (a.settings.clone(), a.fetcher.clone()),
                None => {
                    warn!(
                        "[{}] Waiting for configuration to be processed, unable to download from '{}'",
                        self.name,
                        self.schedule.borrow().resource_url
                    );
                    return Err(WatcherError::Config(format!(
                        "watcher '{}' is not configured",
                        self.name
                    )));
                }
            }
        };

        let url = self.credentials.read().await.interpolate(&settings.resource_url);
        let since = self.cache.last_modified();

        let data = match fetcher.fetch_if_modified_since(&url, since).await {
            Ok(FetchOutcome::NotModified) => {
                debug!("[{}] '{}' not modified", self.name, url);
                self.mark_refreshed();
                return Ok(RefreshOutcome::Unchanged);
            }
            Ok(FetchOutcome::Modified(data)) => data,
            Err(e) => {
                warn!("[{}] Failed to fetch data from '{}': {}", self.name, url, e);
                return Err(e);
            }
        };

        if let Err(e) = self.cache.write_atomically(&data) {
            warn!(
                "[{}] Failed to persist data received from '{}': {}",
                self.name, url, e
            );
            return Err(e);
        }

        if !self.consumer.on_data(&data) {
            warn!(
                "[{}] Data received from '{}' was cached but rejected",
                self.name, url
            );
            return Err(WatcherError::ConsumerRejected {
                watcher: self.name.clone(),
            });
        }

        self.mark_refreshed();
        info!(
            "[{}] Refreshed {} bytes from '{}'",
            self.name,
            data.len(),
            url
        );
        Ok(RefreshOutcome::Refreshed)
    }

    #[cfg(test)]
    async fn current_fetcher(&self) -> Option<Arc<dyn ConditionalFetcher>> {
        self.active.lock().await.as_ref().map(|a| a.fetcher.clone())
    }
}

#[async_trait]
impl Refreshable for ResourceWatcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn startup_load(&self) -> StartupLoad {
        ResourceWatcher::startup_load(self).await
    }

    async fn refresh_cycle(&self) -> Result<RefreshOutcome> {
        ResourceWatcher::refresh_cycle(self).await
    }

    fn schedule(&self) -> watch::Receiver<Schedule> {
        self.schedule.subscribe()
    }
}
