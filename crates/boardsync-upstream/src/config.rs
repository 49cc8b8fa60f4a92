//! Connection settings for the upstream API.

use std::time::Duration;

use thiserror::Error;

/// Default Trello API root.
pub const DEFAULT_API_URL: &str = "https://api.trello.com/1";

/// Default per-request timeout, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

pub const KEY_VAR: &str = "TRELLO_KEY";
pub const TOKEN_VAR: &str = "TRELLO_TOKEN";
pub const API_URL_VAR: &str = "TRELLO_API_URL";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing upstream credential: set {0}")]
    MissingCredential(&'static str),
}

/// Where the upstream API lives and how to authenticate against it.
#[derive(Clone, PartialEq, Eq)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub key: String,
    pub token: String,
    pub timeout: Duration,
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("key", &"***")
            .field("token", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl UpstreamConfig {
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            key: key.into(),
            token: token.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Read `TRELLO_KEY`, `TRELLO_TOKEN` and the optional `TRELLO_API_URL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from any variable source. Empty values count as missing.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let key = get(KEY_VAR).ok_or(ConfigError::MissingCredential(KEY_VAR))?;
        let token = get(TOKEN_VAR).ok_or(ConfigError::MissingCredential(TOKEN_VAR))?;
        let config = Self::new(key, token);
        Ok(match get(API_URL_VAR) {
            Some(url) => config.with_base_url(url),
            None => config,
        })
    }
}
