//! Error types.

use reqwest::StatusCode;
use std::path::PathBuf;

/// Failure to bring up a realtime link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no access token available")]
    MissingCredential,
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection refused: {0}")]
    Refused(String),
    #[error("connection attempt superseded by a newer connect or disconnect")]
    Superseded,
}

/// Failure of a REST call.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Non-2xx response. `detail` is the server's message when it sent one.
    #[error("{detail}")]
    Status { status: StatusCode, detail: String },
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid api url: {0}")]
    Url(String),
}

impl ApiError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Failure surfaced by the coordinator to its UI.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("no conversation is open")]
    NoConversation,
    #[error("failed to connect to real-time chat: {0}")]
    Connect(#[from] TransportError),
    #[error("failed to send message: {0}")]
    Fallback(#[source] ApiError),
    #[error("failed to load messages: {0}")]
    History(#[source] ApiError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid url {url}: {reason}")]
    Url { url: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to access token file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
