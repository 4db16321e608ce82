//! Client side of Parley.
//!
//! A [`Transport`] keeps one realtime session alive with bounded reconnects.
//! A [`Coordinator`] sits on top, routing sends over the realtime link while it
//! is open and over the REST API ([`HttpApi`]) otherwise, and turning wire
//! events into [`Notification`]s for a UI.

pub mod api;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod error;
pub mod notification;
pub mod reconnect;
pub mod transport;
pub mod typing;

pub use api::{HttpApi, MessageStore};
pub use config::{ClientConfig, Endpoint, ReconnectConfig};
pub use coordinator::{Coordinator, Delivery};
pub use credentials::{CredentialStore, FileCredentials, MemoryCredentials};
pub use error::{ApiError, ConfigError, CoordinatorError, CredentialError, TransportError};
pub use notification::{ChatMessage, Notification, Origin, Presence};
pub use reconnect::{Backoff, ReconnectPolicy};
pub use transport::{Connector, Link, LinkEvent, Transport, TransportEvent, WsConnector, WsLink};
pub use typing::{TYPING_QUIET, TypingDebouncer};
