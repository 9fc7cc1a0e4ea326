// src/modules/fetcher.rs
use crate::error::{Result, WatcherError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, info};
use reqwest::header::{CONTENT_TYPE, IF_MODIFIED_SINCE};
use reqwest::{Response, StatusCode};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;

const USER_AGENT: &str = "resource-watcher/0.1.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Modified(Vec<u8>),
    NotModified,
}

#[async_trait]
pub trait ConditionalFetcher: Send + Sync {
    /// Fetches `url`, returning `NotModified` when the remote copy is not newer than `since`.
    async fn fetch_if_modified_since(
        &self,
        url: &str,
        since: Option<SystemTime>,
    ) -> Result<FetchOutcome>;
}

/// The triple a fetcher is bound to. A change in any field requires a new fetcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetcherBinding {
    pub auth_url: String,
    pub credential_payload: String,
    pub timeout: Duration,
}

pub trait FetcherFactory: Send + Sync {
    fn build(&self, binding: &FetcherBinding) -> Result<Arc<dyn ConditionalFetcher>>;
}

pub struct ProtectedFetcherFactory;

impl FetcherFactory for ProtectedFetcherFactory {
    fn build(&self, binding: &FetcherBinding) -> Result<Arc<dyn ConditionalFetcher>> {
        Ok(Arc::new(ProtectedFetcher::new(binding.clone())?))
    }
}

/// Fetches resources behind a cookie-based login endpoint.
pub struct ProtectedFetcher {
    binding: FetcherBinding,
    http_client: reqwest::Client,
    authenticated: Mutex<bool>,
}

impl ProtectedFetcher {
    pub fn new(binding: FetcherBinding) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .cookie_store(true)
            .timeout(binding.timeout)
            .build()
            .map_err(|e| {
                WatcherError::Config(format!("Failed to build HTTP client: {}", e))
            })?;
        Ok(Self {
            binding,
            http_client,
            authenticated: Mutex::new(false),
        })
    }

    async fn authenticate(&self, force: bool) -> Result<()> {
        let mut authenticated = self.authenticated.lock().await;
        if *authenticated && !force {
            return Ok(());
        }
        *authenticated = false;

        let auth_url = &self.binding.auth_url;
        debug!("Authenticating against {}", auth_url);
        let resp = self
            .http_client
            .post(auth_url)
            .header(CONTENT_TYPE, "application/json")
            .body(self.binding.credential_payload.clone())
            .send()
            .await
            .map_err(|e| WatcherError::fetch(auth_url, format!("authentication failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(WatcherError::fetch(
                auth_url,
                format!("authentication returned status {}", status),
            ));
        }
        info!("Authenticated against {}", auth_url);
        *authenticated = true;
        Ok(())
    }

    async fn get(&self, url: &str, since: Option<SystemTime>) -> Result<Response> {
        let mut req = self.http_client.get(url);
        if let Some(since) = since {
            req = req.header(IF_MODIFIED_SINCE, http_date(since));
        }
        req.send()
            .await
            .map_err(|e| WatcherError::fetch(url, e))
    }

    async fn fetch(&self, url: &str, since: Option<SystemTime>) -> Result<FetchOutcome> {
        self.authenticate(false).await?;
        let mut resp = self.get(url, since).await?;
        if matches!(
            resp.status(),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            debug!("Session rejected by {} ({}), re-authenticating", url, resp.status());
            self.authenticate(true).await?;
            resp = self.get(url, since).await?;
        }

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!("{} not modified since {:?}", url, since.map(http_date));
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(WatcherError::fetch(
                url,
                format!("returned status {}: {}", status, body),
            ));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| WatcherError::fetch(url, format!("failed reading body: {}", e)))?;
        Ok(FetchOutcome::Modified(body.to_vec()))
    }
}

#[async_trait]
impl ConditionalFetcher for ProtectedFetcher {
    async fn fetch_if_modified_since(
        &self,
        url: &str,
        since: Option<SystemTime>,
    ) -> Result<FetchOutcome> {
        let timeout = self.binding.timeout;
        match tokio::time::timeout(timeout, self.fetch(url, since)).await {
            Ok(result) => result,
            Err(_) => Err(WatcherError::fetch(
                url,
                format!("timed out after {} ms", timeout.as_millis()),
            )),
        }
    }
}

/// Formats a timestamp as an IMF-fixdate, as used by `If-Modified-Since`.
pub fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}
