// src/modules/mod.rs

pub mod cache;
pub mod config_reload;
pub mod consumer;
pub mod credentials;
pub mod fetcher;
pub mod resource_watcher;
pub mod scheduler;
#[cfg(test)]
pub mod test_support;

// Re-export for easier access
pub use config_reload::{ConfigChangeHandler, ConfigFileWatcher, WatcherReloadHandler};
pub use consumer::JsonDocumentConsumer;
pub use credentials::StaticCredentialSource;
pub use resource_watcher::ResourceWatcher;
pub use scheduler::PollingScheduler;
