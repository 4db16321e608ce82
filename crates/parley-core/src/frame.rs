//! Realtime channel frames.
//!
//! Every frame is a JSON object discriminated by its `type` field.

use crate::{MessageId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Frames sent from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Post a message to the conversation.
    Message { message: String },
    /// Announce that the user started or stopped typing.
    Typing { typing: bool },
}

/// Frames sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    /// A persisted message, including echoes of our own.
    Message {
        message: String,
        user_id: UserId,
        message_id: MessageId,
        timestamp: DateTime<Utc>,
        #[serde(default)]
        username: Option<String>,
        #[serde(default)]
        display_name: Option<String>,
    },
    /// Someone started or stopped typing.
    Typing {
        typing: bool,
        #[serde(flatten)]
        sender: Participant,
    },
    /// Someone opened the conversation.
    UserJoin(Participant),
    /// Someone left the conversation.
    UserLeave(Participant),
}

/// Who a typing or presence frame is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl Participant {
    /// Name to show: display name if set, else username, else "Unknown".
    pub fn label(&self) -> &str {
        match self.display_name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ if !self.username.is_empty() => &self.username,
            _ => "Unknown",
        }
    }
}
