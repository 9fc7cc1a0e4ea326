// src/modules/scheduler.rs
use crate::error::Result;
use async_trait::async_trait;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Where and how often a watcher wants to be polled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schedule {
    pub resource_url: String,
    pub polling_interval: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupLoad {
    Loaded,
    Absent,
    Unusable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Refreshed,
    Unchanged,
}

/// Capabilities a scheduler needs from anything it polls.
#[async_trait]
pub trait Refreshable: Send + Sync {
    fn name(&self) -> &str;

    /// Seeds state from local data; called once before the first cycle.
    async fn startup_load(&self) -> StartupLoad;

    /// One refresh cycle. An `Err` means the cycle failed; the next tick retries.
    async fn refresh_cycle(&self) -> Result<RefreshOutcome>;

    fn schedule(&self) -> watch::Receiver<Schedule>;
}

pub struct PollingScheduler {
    target: Arc<dyn Refreshable>,
}

impl PollingScheduler {
    pub fn new(target: Arc<dyn Refreshable>) -> Self {
        Self { target }
    }

    async fn load(&self) {
        match self.target.startup_load().await {
            StartupLoad::Loaded => info!("[{}] Loaded cached data", self.target.name()),
            StartupLoad::Absent => info!("[{}] No cached data available", self.target.name()),
            StartupLoad::Unusable => {
                warn!("[{}] Cached data was rejected", self.target.name())
            }
        }
    }

    async fn cycle(&self) -> Result<RefreshOutcome> {
        let result = self.target.refresh_cycle().await;
        match &result {
            Ok(outcome) => debug!("[{}] Refresh cycle: {:?}", self.target.name(), outcome),
            Err(e) => debug!("[{}] Refresh cycle failed: {}", self.target.name(), e),
        }
        result
    }

    /// Startup load followed by a single refresh cycle.
    pub async fn run_once(&self) -> Result<RefreshOutcome> {
        self.load().await;
        self.cycle().await
    }

    /// Polls forever; only one cycle runs at a time.
    pub async fn run(self) {
        let mut schedule = self.target.schedule();
        self.load().await;
        loop {
            let _ = self.cycle().await;
            self.wait_for_next_tick(&mut schedule).await;
        }
    }

    async fn wait_for_next_tick(&self, schedule: &mut watch::Receiver<Schedule>) {
        loop {
            let interval = schedule.borrow_and_update().polling_interval;
            tokio::select! {
                _ = sleep(interval) => return,
                changed = schedule.changed() => {
                    if changed.is_err() {
                        sleep(interval).await;
                        return;
                    }
                    let next = schedule.borrow().clone();
                    info!(
                        "[{}] Rescheduled: polling '{}' every {} ms",
                        self.target.name(),
                        next.resource_url,
                        next.polling_interval.as_millis()
                    );
                }
            }
        }
    }
}
