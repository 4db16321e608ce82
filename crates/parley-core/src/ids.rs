//! Identifiers.
//!
//! Users and messages are numbered by the server. Conversations are opaque:
//! the realtime endpoint takes them as a path segment, so the only rule is that
//! they must be usable as one.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-assigned user id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Server-assigned message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A conversation, as addressed by both the REST API and the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// The raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ConversationId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdError::Empty);
        }
        if let Some(c) = s.chars().find(|c| matches!(c, '/' | '?' | '#') || c.is_whitespace()) {
            return Err(IdError::InvalidChar(c, s.to_string()));
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for ConversationId {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

impl From<i64> for ConversationId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

/// Error parsing a conversation id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdError {
    #[error("conversation id cannot be empty")]
    Empty,
    #[error("conversation id may not contain {0:?}, got: {1}")]
    InvalidChar(char, String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numeric() {
        let id: ConversationId = "42".parse().unwrap();
        assert_eq!(id.as_str(), "42");
        assert_eq!(id, ConversationId::from(42));
    }

    #[test]
    fn rejects_path_characters() {
        assert_eq!("".parse::<ConversationId>(), Err(IdError::Empty));
        assert!(matches!(
            "4/2".parse::<ConversationId>(),
            Err(IdError::InvalidChar('/', _))
        ));
        assert!("a b".parse::<ConversationId>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let id: ConversationId = serde_json::from_str("\"room-7\"").unwrap();
        assert_eq!(id.to_string(), "room-7");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-7\"");
        assert!(serde_json::from_str::<ConversationId>("\"\"").is_err());
    }
}
