//! What the coordinator tells its UI.

use crate::transport::TransportEvent;
use chrono::{DateTime, Utc};
use parley_core::{ConnectionState, InboundEvent, MessageId, MessageRecord, Participant, UserId};

/// Where a [`ChatMessage`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Delivered over the realtime channel.
    Realtime,
    /// Synthesized locally from the record a fallback post returned.
    Fallback,
    /// Loaded from the message history.
    History,
}

/// A message ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub id: MessageId,
    pub sender: UserId,
    pub sender_name: Option<String>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Sent by the current user, judged by sender id.
    pub is_own: bool,
    pub origin: Origin,
}

impl ChatMessage {
    pub fn from_record(record: MessageRecord, me: UserId, origin: Origin) -> Self {
        let sender_name = Some(record.sender.label().to_string());
        Self {
            id: record.id,
            sender: record.sender.id,
            sender_name,
            content: record.content,
            timestamp: record.created_at,
            is_own: record.sender.id == me,
            origin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Joined,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Message(ChatMessage),
    Typing { who: Participant, typing: bool },
    Presence { who: Participant, presence: Presence },
    Status(ConnectionState),
}

impl Notification {
    pub(crate) fn from_transport(event: TransportEvent, me: UserId) -> Self {
        match event {
            TransportEvent::State(state) => Self::Status(state),
            TransportEvent::Inbound(event) => Self::from_inbound(event, me),
        }
    }

    fn from_inbound(event: InboundEvent, me: UserId) -> Self {
        match event {
            InboundEvent::Message {
                message,
                user_id,
                message_id,
                timestamp,
                username,
                display_name,
            } => Self::Message(ChatMessage {
                id: message_id,
                sender: user_id,
                sender_name: display_name.filter(|name| !name.is_empty()).or(username),
                content: message,
                timestamp,
                is_own: user_id == me,
                origin: Origin::Realtime,
            }),
            InboundEvent::Typing { typing, sender } => Self::Typing { who: sender, typing },
            InboundEvent::UserJoin(who) => Self::Presence {
                who,
                presence: Presence::Joined,
            },
            InboundEvent::UserLeave(who) => Self::Presence {
                who,
                presence: Presence::Left,
            },
        }
    }
}
