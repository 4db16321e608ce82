//! Client configuration.
//!
//! ```toml
//! api_base_url = "https://chat.example.com/api"
//! # ws_base_url = "wss://chat.example.com"   # derived from api_base_url when absent
//! # token_path = "/home/me/.config/parley/token"
//!
//! [reconnect]
//! max_attempts = 5
//! base_delay_ms = 1000
//! backoff = "linear"                       # or "exponential"
//! ```

use crate::error::ConfigError;
use crate::reconnect::{Backoff, ReconnectPolicy};
use parley_core::ConversationId;
use reqwest::Url;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000/api";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub ws_base_url: Option<String>,
    pub token_path: Option<PathBuf>,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            ws_base_url: None,
            token_path: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// The `[reconnect]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff: Backoff,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
            backoff: policy.backoff,
        }
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff: config.backoff,
        }
    }
}

impl ClientConfig {
    /// Read a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from(&self.reconnect)
    }

    /// REST base URL, normalized to end in `/` so relative joins keep the prefix.
    pub fn api_url(&self) -> Result<Url, ConfigError> {
        parse_base(&self.api_base_url)
    }

    /// Realtime endpoint, explicit or derived from the REST base.
    pub fn endpoint(&self) -> Result<Endpoint, ConfigError> {
        let base = match &self.ws_base_url {
            Some(ws) => parse_base(ws)?,
            None => derive_ws_base(&self.api_url()?)?,
        };
        Ok(Endpoint { base })
    }
}

fn parse_base(raw: &str) -> Result<Url, ConfigError> {
    let mut url = Url::parse(raw).map_err(|e| ConfigError::Url {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if url.cannot_be_a_base() {
        return Err(ConfigError::Url {
            url: raw.to_string(),
            reason: "not a base url".to_string(),
        });
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// `http://host/api/` -> `ws://host/`, `https` -> `wss`.
fn derive_ws_base(api: &Url) -> Result<Url, ConfigError> {
    let scheme = if api.scheme() == "https" { "wss" } else { "ws" };
    let mut url = api.clone();
    url.set_scheme(scheme).map_err(|()| ConfigError::Url {
        url: api.to_string(),
        reason: format!("cannot derive a {scheme} url"),
    })?;
    let path = api.path().trim_end_matches('/');
    let path = path.strip_suffix("/api").unwrap_or(path);
    url.set_path(&format!("{path}/"));
    url.set_query(None);
    Ok(url)
}

/// Where realtime channels live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    pub fn new(base: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base: parse_base(base)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// `{base}ws/chat/{conversation}/?token={token}`.
    pub fn channel_url(&self, conversation: &ConversationId, token: &str) -> Url {
        let mut url = self.base.clone();
        let path = format!("{}ws/chat/{}/", url.path(), conversation.as_str());
        url.set_path(&path);
        url.query_pairs_mut().clear().append_pair("token", token);
        url
    }
}
