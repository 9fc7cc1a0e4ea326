// src/config.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "resource-watcher.toml";

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    pub watcher: WatcherSection,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    /// Raw configuration blob handed to the watcher on every (re)configuration.
    #[serde(default)]
    pub overrides: Value,
    #[serde(default = "default_false")]
    pub one_shot: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatcherSection {
    #[serde(default = "default_watcher_name")]
    pub name: String,
    #[serde(default = "default_config_prefix")]
    pub config_prefix: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_resource_name")]
    pub resource_name: String,
    #[serde(default)]
    pub default_url: String,
    #[serde(default = "default_polling_interval_ms")]
    pub default_polling_interval_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct CredentialsConfig {
    #[serde(default)]
    pub auth_url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// `${name}` substitutions applied to auth and resource URLs.
    #[serde(default)]
    pub tokens: HashMap<String, String>,
}

fn default_false() -> bool {
    false
}

fn default_watcher_name() -> String {
    "ResourceWatcher".to_string()
}

fn default_config_prefix() -> String {
    "resource".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("/var/cache/resource-watcher")
}

fn default_resource_name() -> String {
    "resource.json".to_string()
}

fn default_polling_interval_ms() -> u64 {
    600_000
}

fn default_timeout_ms() -> u64 {
    15_000
}

impl Config {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {:?}", path))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse TOML from config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

/// Values a raw configuration blob may override for one watcher.
///
/// Keys are looked up as `<prefix>.polling.url`, `<prefix>.polling.interval` and
/// `<prefix>.polling.timeout`, either flat (a single dotted key) or nested.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatcherOverrides {
    pub url: Option<String>,
    pub polling_interval_ms: Option<i64>,
    pub timeout_ms: Option<i64>,
}

impl WatcherOverrides {
    pub fn from_blob(prefix: &str, blob: &Value) -> Self {
        Self {
            url: lookup(blob, prefix, "url").and_then(|v| v.as_str().map(str::to_string)),
            polling_interval_ms: lookup(blob, prefix, "interval").and_then(as_i64),
            timeout_ms: lookup(blob, prefix, "timeout").and_then(as_i64),
        }
    }

    /// The override URL, if one is present and non-empty.
    pub fn effective_url(&self) -> Option<&str> {
        self.url.as_deref().filter(|u| !u.trim().is_empty())
    }

    pub fn effective_polling_interval_ms(&self) -> Option<u64> {
        positive(self.polling_interval_ms)
    }

    pub fn effective_timeout_ms(&self) -> Option<u64> {
        positive(self.timeout_ms)
    }
}

fn lookup<'a>(blob: &'a Value, prefix: &str, field: &str) -> Option<&'a Value> {
    let flat = format!("{}.polling.{}", prefix, field);
    if let Some(v) = blob.get(&flat) {
        return Some(v);
    }
    let pointer = format!("/{}", flat.replace('.', "/"));
    blob.pointer(&pointer)
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn positive(value: Option<i64>) -> Option<u64> {
    value.filter(|v| *v > 0).map(|v| v as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"
one_shot = true

[watcher]
name = "FederationsWatcher"
config_prefix = "federationmapping"
cache_dir = "/tmp/watcher-cache"
resource_name = "federations.json"
default_url = "https://${toHostname}/api/4.0/federations/all"

[credentials]
auth_url = "https://${toHostname}/api/4.0/user/login"
username = "admin"
password = "secret"

[credentials.tokens]
toHostname = "to.example.net"

[overrides]
"federationmapping.polling.interval" = 60000
"federationmapping.polling.timeout" = "5000"
"#;

    #[test]
    fn parses_full_config() {
        let cfg = Config::from_toml(SAMPLE).unwrap();
        assert!(cfg.one_shot);
        assert_eq!(cfg.watcher.name, "FederationsWatcher");
        assert_eq!(cfg.watcher.resource_name, "federations.json");
        assert_eq!(cfg.watcher.default_polling_interval_ms, 600_000);
        assert_eq!(cfg.watcher.default_timeout_ms, 15_000);
        assert_eq!(cfg.credentials.username.as_deref(), Some("admin"));
        assert_eq!(
            cfg.credentials.tokens.get("toHostname").map(String::as_str),
            Some("to.example.net")
        );

        let overrides = WatcherOverrides::from_blob("federationmapping", &cfg.overrides);
        assert_eq!(overrides.effective_polling_interval_ms(), Some(60_000));
        assert_eq!(overrides.effective_timeout_ms(), Some(5_000));
        assert_eq!(overrides.effective_url(), None);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let cfg = Config::from_toml("[watcher]\n").unwrap();
        assert!(!cfg.one_shot);
        assert_eq!(cfg.watcher.config_prefix, "resource");
        assert!(cfg.credentials.auth_url.is_none());
        assert_eq!(
            WatcherOverrides::from_blob("resource", &cfg.overrides),
            WatcherOverrides::default()
        );
    }

    #[test]
    fn nested_overrides_are_found() {
        let blob = json!({
            "steering": { "polling": { "url": "https://example.net/steering", "interval": 1000 } }
        });
        let overrides = WatcherOverrides::from_blob("steering", &blob);
        assert_eq!(overrides.effective_url(), Some("https://example.net/steering"));
        assert_eq!(overrides.effective_polling_interval_ms(), Some(1000));
    }

    #[test]
    fn non_positive_and_blank_values_do_not_override() {
        let blob = json!({
            "p.polling.url": "  ",
            "p.polling.interval": 0,
            "p.polling.timeout": -5
        });
        let overrides = WatcherOverrides::from_blob("p", &blob);
        assert_eq!(overrides.effective_url(), None);
        assert_eq!(overrides.effective_polling_interval_ms(), None);
        assert_eq!(overrides.effective_timeout_ms(), None);
    }
}
