//! REST record types.

use crate::{ConversationId, MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user account as returned by the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl User {
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.username,
        }
    }
}

/// A conversation the current user participates in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    #[serde(default)]
    pub title: String,
    /// Title as seen by the requesting user (the peer's name for direct chats).
    #[serde(default)]
    pub display_title: Option<String>,
    #[serde(default)]
    pub participants: Vec<User>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn conversation_id(&self) -> ConversationId {
        ConversationId::from(self.id)
    }

    pub fn label(&self) -> &str {
        match self.display_title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => &self.title,
        }
    }
}

/// A persisted message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub conversation: i64,
    pub sender: User,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Response of the token endpoints. The refresh token travels as a cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResponse {
    pub access: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegisterData {
    pub username: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// Body of a conversation creation request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewConversation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub participant_ids: Vec<UserId>,
}
