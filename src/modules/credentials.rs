// src/modules/credentials.rs
use crate::config::CredentialsConfig;
use crate::error::{Result, WatcherError};
use regex::{Captures, Regex};
use serde_json::json;
use std::collections::HashMap;

/// Supplies the authorization endpoint and credential payload a fetcher binds to.
pub trait CredentialSource: Send + Sync {
    fn auth_url(&self) -> Result<String>;

    /// Opaque credential payload, compared as a blob.
    fn auth_credentials(&self) -> Result<String>;

    /// Substitutes `${token}` placeholders in `url`.
    fn interpolate(&self, url: &str) -> String;
}

const TOKEN_PATTERN: &str = r"\$\{([A-Za-z0-9_.-]+)\}";

/// Credentials taken straight from the daemon configuration.
#[derive(Debug, Clone)]
pub struct StaticCredentialSource {
    auth_url: Option<String>,
    username: Option<String>,
    password: Option<String>,
    tokens: HashMap<String, String>,
    token_pattern: Regex,
}

impl StaticCredentialSource {
    pub fn new(config: &CredentialsConfig) -> Result<Self> {
        Ok(Self {
            auth_url: config.auth_url.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            tokens: config.tokens.clone(),
            token_pattern: Regex::new(TOKEN_PATTERN)?,
        })
    }
}

fn required<'a>(value: &'a Option<String>, field: &str) -> Result<&'a str> {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(WatcherError::ConfigResolution(format!(
            "credentials.{} is not set",
            field
        ))),
    }
}

impl CredentialSource for StaticCredentialSource {
    fn auth_url(&self) -> Result<String> {
        let raw = required(&self.auth_url, "auth_url")?;
        let url = self.interpolate(raw);
        if self.token_pattern.is_match(&url) {
            return Err(WatcherError::ConfigResolution(format!(
                "auth url '{}' has unresolved tokens",
                url
            )));
        }
        Ok(url)
    }

    fn auth_credentials(&self) -> Result<String> {
        let username = required(&self.username, "username")?;
        let password = required(&self.password, "password")?;
        Ok(json!({ "u": username, "p": password }).to_string())
    }

    fn interpolate(&self, url: &str) -> String {
        self.token_pattern
            .replace_all(url, |caps: &Captures| match self.tokens.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }
}
