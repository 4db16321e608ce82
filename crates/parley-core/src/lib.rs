//! Core types for Parley.
//!
//! This crate holds what both ends of the wire agree on: realtime frames,
//! REST records and identifiers. It does no I/O.

mod frame;
mod ids;
mod record;

pub use frame::{InboundEvent, OutboundFrame, Participant};
pub use ids::{ConversationId, IdError, MessageId, UserId};
pub use record::{
    AuthResponse, Conversation, LoginCredentials, MessageRecord, NewConversation, RegisterData,
    User,
};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Close code the client sends, and the server may send, for a deliberate close.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Close code reported when a link dies without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How a realtime link ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseKind {
    /// Closed with [`NORMAL_CLOSURE`].
    Normal,
    /// Any other close code, or a dropped link.
    Abnormal,
}

impl CloseKind {
    pub fn from_code(code: u16) -> Self {
        if code == NORMAL_CLOSURE {
            Self::Normal
        } else {
            Self::Abnormal
        }
    }
}

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "kind", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Nothing has been attempted yet.
    #[default]
    Idle,
    /// Opening a link, first time or after a backoff delay.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// The link is gone.
    Closed(CloseKind),
    /// Reconnect attempts used up; only an explicit connect restarts.
    Exhausted,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Open => f.write_str("open"),
            Self::Closed(CloseKind::Normal) => f.write_str("closed"),
            Self::Closed(CloseKind::Abnormal) => f.write_str("closed (abnormal)"),
            Self::Exhausted => f.write_str("offline (gave up reconnecting)"),
        }
    }
}
