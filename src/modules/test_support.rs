// src/modules/test_support.rs
use crate::error::{Result, WatcherError};
use crate::modules::consumer::DataConsumer;
use crate::modules::credentials::CredentialSource;
use crate::modules::fetcher::{ConditionalFetcher, FetchOutcome, FetcherBinding, FetcherFactory};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Credential source whose answers can be swapped or broken mid-test.
pub struct FakeCredentials {
    auth_url: Mutex<Option<String>>,
    payload: Mutex<Option<String>>,
}

impl FakeCredentials {
    pub fn new(auth_url: &str, payload: &str) -> Arc<Self> {
        Arc::new(Self {
            auth_url: Mutex::new(Some(auth_url.to_string())),
            payload: Mutex::new(Some(payload.to_string())),
        })
    }

    pub fn set(&self, auth_url: Option<&str>, payload: Option<&str>) {
        *self.auth_url.lock().unwrap() = auth_url.map(str::to_string);
        *self.payload.lock().unwrap() = payload.map(str::to_string);
    }
}

impl CredentialSource for FakeCredentials {
    fn auth_url(&self) -> Result<String> {
        self.auth_url
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| WatcherError::ConfigResolution("auth url unavailable".to_string()))
    }

    fn auth_credentials(&self) -> Result<String> {
        self.payload
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| WatcherError::ConfigResolution("credentials unavailable".to_string()))
    }

    fn interpolate(&self, url: &str) -> String {
        url.replace("${host}", "example.net")
    }
}

/// Fetcher that replays scripted responses; an empty script means "not modified".
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<Result<FetchOutcome>>>,
    pub requests: Mutex<Vec<(String, Option<SystemTime>)>>,
    /// Requests issued through factory-built fetchers, with the binding each was built for.
    pub bound_requests: Mutex<Vec<(String, FetcherBinding)>>,
}

impl ScriptedFetcher {
    pub fn push(&self, response: Result<FetchOutcome>) {
        self.script.lock().unwrap().push_back(response);
    }
}

#[async_trait]
impl ConditionalFetcher for ScriptedFetcher {
    async fn fetch_if_modified_since(
        &self,
        url: &str,
        since: Option<SystemTime>,
    ) -> Result<FetchOutcome> {
        self.requests.lock().unwrap().push((url.to_string(), since));
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(FetchOutcome::NotModified))
    }
}

/// Factory that hands out one shared scripted fetcher and records every build.
#[derive(Default)]
pub struct RecordingFactory {
    pub fetcher: Arc<ScriptedFetcher>,
    pub builds: Mutex<Vec<FetcherBinding>>,
}

impl RecordingFactory {
    pub fn build_count(&self) -> usize {
        self.builds.lock().unwrap().len()
    }
}

impl FetcherFactory for RecordingFactory {
    fn build(&self, binding: &FetcherBinding) -> Result<Arc<dyn ConditionalFetcher>> {
        self.builds.lock().unwrap().push(binding.clone());
        // A fresh Arc per build so instance identity reflects rebuilds.
        let fetcher: Arc<dyn ConditionalFetcher> =
            Arc::new(SharedScript(self.fetcher.clone(), binding.clone()));
        Ok(fetcher)
    }
}

struct SharedScript(Arc<ScriptedFetcher>, FetcherBinding);

#[async_trait]
impl ConditionalFetcher for SharedScript {
    async fn fetch_if_modified_since(
        &self,
        url: &str,
        since: Option<SystemTime>,
    ) -> Result<FetchOutcome> {
        self.0
            .bound_requests
            .lock()
            .unwrap()
            .push((url.to_string(), self.1.clone()));
        self.0.fetch_if_modified_since(url, since).await
    }
}

/// Consumer that records what it saw and accepts or rejects on demand.
pub struct RecordingConsumer {
    pub accept: AtomicBool,
    pub calls: AtomicUsize,
    pub last: Mutex<Option<Vec<u8>>>,
}

impl RecordingConsumer {
    pub fn new(accept: bool) -> Arc<Self> {
        Arc::new(Self {
            accept: AtomicBool::new(accept),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataConsumer for RecordingConsumer {
    fn on_data(&self, data: &[u8]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(data.to_vec());
        self.accept.load(Ordering::SeqCst)
    }
}
