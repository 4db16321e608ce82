//! Session transport.
//!
//! A [`Transport`] binds at most one realtime link to one conversation. Each
//! live link is owned by a driver task which pumps outbound frames, decodes
//! inbound ones, and on an abnormal closure runs the reconnect loop itself, so
//! a second reconnect can never overlap the first.
//!
//! Every `connect` and `disconnect` bumps an epoch. Drivers and pending
//! connects remember the epoch they started under and go inert once it moves,
//! which is how a backoff timer that fires after `disconnect` ends up doing
//! nothing.

mod link;
#[cfg(test)]
pub(crate) mod mock;

pub use link::{Connector, Link, LinkEvent, WsConnector, WsLink};

use crate::config::Endpoint;
use crate::credentials::CredentialStore;
use crate::error::TransportError;
use crate::reconnect::ReconnectPolicy;
use parley_core::{
    CloseKind, ConnectionState, ConversationId, InboundEvent, NORMAL_CLOSURE, OutboundFrame,
};
use reqwest::Url;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};

const CLOSE_REASON: &str = "User disconnected";

/// What a transport subscriber receives, in production order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(ConnectionState),
    Inbound(InboundEvent),
}

enum Command {
    Frame(String),
    Close,
}

enum Step {
    Outbound(Option<Command>),
    Inbound(LinkEvent),
}

enum Exit {
    /// The client closed the link.
    Released,
    /// The link closed under us with this code.
    Closed(u16),
}

/// Realtime link manager for one conversation at a time.
///
/// Clones share one session. Dropping the last clone disconnects.
pub struct Transport<C: Connector> {
    shared: Arc<Shared<C>>,
    _handle: Arc<Handle<C>>,
}

impl<C: Connector> Clone for Transport<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            _handle: Arc::clone(&self._handle),
        }
    }
}

/// Held only by user-facing clones; driver tasks keep `Shared` alone.
struct Handle<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Drop for Handle<C> {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.conversation.is_some() || inner.outbound.is_some() {
            tracing::debug!("last transport handle dropped, disconnecting");
            self.shared.release(&mut inner);
        }
    }
}

struct Shared<C> {
    connector: C,
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialStore>,
    policy: ReconnectPolicy,
    inner: Mutex<Inner>,
    state: watch::Sender<ConnectionState>,
}

#[derive(Default)]
struct Inner {
    epoch: u64,
    conversation: Option<ConversationId>,
    attempts: u32,
    state: ConnectionState,
    /// Present exactly while a driver owns a live link.
    outbound: Option<mpsc::UnboundedSender<Command>>,
    subscriber: Option<mpsc::UnboundedSender<TransportEvent>>,
}

impl Inner {
    fn emit(&mut self, event: TransportEvent) {
        if let Some(subscriber) = &self.subscriber {
            if subscriber.send(event).is_err() {
                self.subscriber = None;
            }
        }
    }
}

impl<C: Connector> Transport<C> {
    pub fn new(
        connector: C,
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialStore>,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let shared = Arc::new(Shared {
            connector,
            endpoint,
            credentials,
            policy,
            inner: Mutex::new(Inner::default()),
            state,
        });
        Self {
            _handle: Arc::new(Handle {
                shared: Arc::clone(&shared),
            }),
            shared,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Follow state changes without taking the subscriber slot.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Reconnect attempts used since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.shared.lock().attempts
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.lock().conversation.clone()
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.shared.policy
    }

    /// Take the subscriber slot. A previous subscriber's stream ends.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<TransportEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().subscriber = Some(tx);
        rx
    }

    /// Bind to `conversation` and open a link, tearing down any current binding.
    ///
    /// Fails without touching state when no token is stored. A failed open
    /// leaves the transport `Closed(Abnormal)` and is not retried automatically.
    pub async fn connect(&self, conversation: ConversationId) -> Result<(), TransportError> {
        let shared = &self.shared;
        let url = shared.channel_url(&conversation)?;
        let epoch = {
            let mut inner = shared.lock();
            if inner.conversation.is_some() || inner.outbound.is_some() {
                shared.release(&mut inner);
            }
            inner.epoch += 1;
            inner.conversation = Some(conversation.clone());
            inner.attempts = 0;
            shared.transition(&mut inner, ConnectionState::Connecting);
            inner.epoch
        };

        tracing::info!(%conversation, "connecting");
        let mut link = match shared.connector.open(&url).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!(%conversation, error = %e, "connect failed");
                let mut inner = shared.lock();
                if inner.epoch == epoch {
                    shared.transition(&mut inner, ConnectionState::Closed(CloseKind::Abnormal));
                }
                return Err(e);
            }
        };

        match shared.install(epoch) {
            Some(rx) => {
                tracing::info!(%conversation, "connected");
                tokio::spawn(Arc::clone(shared).drive(link, rx, epoch));
                Ok(())
            }
            None => {
                tracing::debug!(%conversation, "connect superseded, dropping link");
                link.close(NORMAL_CLOSURE, CLOSE_REASON).await;
                Err(TransportError::Superseded)
            }
        }
    }

    /// Close normally and unbind. Safe to call in any state, any number of times.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        if let Some(conversation) = &inner.conversation {
            tracing::info!(%conversation, "disconnecting");
        }
        self.shared.release(&mut inner);
    }

    /// Hand a frame to the live link. Returns false, after logging, when not open.
    pub fn send(&self, frame: &OutboundFrame) -> bool {
        let inner = self.shared.lock();
        let outbound = match (&inner.outbound, inner.state) {
            (Some(outbound), ConnectionState::Open) => outbound,
            _ => {
                tracing::error!(state = %inner.state, "websocket is not connected");
                return false;
            }
        };
        let text = match serde_json::to_string(frame) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode frame");
                return false;
            }
        };
        outbound.send(Command::Frame(text)).is_ok()
    }
}

impl<C: Connector> Shared<C> {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state == next {
            return;
        }
        tracing::debug!(from = %inner.state, to = %next, "state change");
        inner.state = next;
        self.state.send_replace(next);
        inner.emit(TransportEvent::State(next));
    }

    fn release(&self, inner: &mut Inner) {
        inner.epoch += 1;
        inner.conversation = None;
        if let Some(outbound) = inner.outbound.take() {
            let _ = outbound.send(Command::Close);
        }
        self.transition(inner, ConnectionState::Closed(CloseKind::Normal));
    }

    fn channel_url(&self, conversation: &ConversationId) -> Result<Url, TransportError> {
        let token = self
            .credentials
            .token()
            .ok_or(TransportError::MissingCredential)?;
        Ok(self.endpoint.channel_url(conversation, &token))
    }

    /// Mark the link for `epoch` as live. `None` if the epoch has moved on.
    fn install(&self, epoch: u64) -> Option<mpsc::UnboundedReceiver<Command>> {
        let mut inner = self.lock();
        if inner.epoch != epoch {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.outbound = Some(tx);
        inner.attempts = 0;
        self.transition(&mut inner, ConnectionState::Open);
        Some(rx)
    }

    async fn drive(
        self: Arc<Self>,
        mut link: C::Link,
        mut rx: mpsc::UnboundedReceiver<Command>,
        epoch: u64,
    ) {
        loop {
            let code = match self.pump(&mut link, &mut rx, epoch).await {
                Exit::Released => return,
                Exit::Closed(code) => code,
            };

            if CloseKind::from_code(code) == CloseKind::Normal {
                let mut inner = self.lock();
                if inner.epoch == epoch {
                    inner.outbound = None;
                    self.transition(&mut inner, ConnectionState::Closed(CloseKind::Normal));
                }
                return;
            }

            match self.recover(epoch).await {
                Some((next_link, next_rx)) => {
                    link = next_link;
                    rx = next_rx;
                }
                None => return,
            }
        }
    }

    async fn pump(
        &self,
        link: &mut C::Link,
        rx: &mut mpsc::UnboundedReceiver<Command>,
        epoch: u64,
    ) -> Exit {
        loop {
            let step = tokio::select! {
                command = rx.recv() => Step::Outbound(command),
                event = link.next_event() => Step::Inbound(event),
            };
            match step {
                Step::Outbound(Some(Command::Frame(text))) => {
                    if let Err(e) = link.send_text(text).await {
                        tracing::warn!(error = %e, "failed to send frame");
                    }
                }
                Step::Outbound(Some(Command::Close) | None) => {
                    link.close(NORMAL_CLOSURE, CLOSE_REASON).await;
                    return Exit::Released;
                }
                Step::Inbound(LinkEvent::Text(text)) => self.dispatch(epoch, &text),
                Step::Inbound(LinkEvent::Closed { code, reason }) => {
                    tracing::info!(code, %reason, "realtime link closed");
                    return Exit::Closed(code);
                }
            }
        }
    }

    fn dispatch(&self, epoch: u64, text: &str) {
        let event = match serde_json::from_str::<InboundEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed frame");
                return;
            }
        };
        let mut inner = self.lock();
        if inner.epoch == epoch {
            inner.emit(TransportEvent::Inbound(event));
        }
    }

    /// Reconnect after an abnormal closure until a link opens, attempts run
    /// out, or the epoch moves on.
    async fn recover(&self, epoch: u64) -> Option<(C::Link, mpsc::UnboundedReceiver<Command>)> {
        loop {
            let (attempt, delay) = {
                let mut inner = self.lock();
                if inner.epoch != epoch {
                    return None;
                }
                inner.outbound = None;
                self.transition(&mut inner, ConnectionState::Closed(CloseKind::Abnormal));
                if inner.attempts >= self.policy.max_attempts {
                    tracing::warn!(
                        attempts = inner.attempts,
                        "reconnect attempts exhausted"
                    );
                    self.transition(&mut inner, ConnectionState::Exhausted);
                    return None;
                }
                inner.attempts += 1;
                self.transition(&mut inner, ConnectionState::Connecting);
                (inner.attempts, self.policy.delay(inner.attempts))
            };

            tracing::info!(
                attempt,
                max = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            tokio::time::sleep(delay).await;

            let conversation = {
                let inner = self.lock();
                match &inner.conversation {
                    Some(conversation) if inner.epoch == epoch => conversation.clone(),
                    _ => return None,
                }
            };
            let opened = match self.channel_url(&conversation) {
                Ok(url) => self.connector.open(&url).await,
                Err(e) => Err(e),
            };
            match opened {
                Ok(mut link) => match self.install(epoch) {
                    Some(rx) => {
                        tracing::info!(%conversation, attempt, "reconnected");
                        return Some((link, rx));
                    }
                    None => {
                        link.close(NORMAL_CLOSURE, CLOSE_REASON).await;
                        return None;
                    }
                },
                Err(e) => {
                    tracing::warn!(%conversation, attempt, error = %e, "reconnect attempt failed");
                }
            }
        }
    }
}
