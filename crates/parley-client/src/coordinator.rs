//! Session coordinator: the facade a chat view talks to.

use crate::api::MessageStore;
use crate::error::CoordinatorError;
use crate::notification::{ChatMessage, Notification, Origin};
use crate::transport::{Connector, Transport, TransportEvent};
use parley_core::{ConnectionState, ConversationId, OutboundFrame, UserId};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

type Slot = Arc<Mutex<Option<mpsc::UnboundedSender<Notification>>>>;

/// How a message left the client.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Handed to the realtime link. The echo arrives as a notification.
    Realtime,
    /// Persisted over HTTP; a matching notification was already delivered.
    Fallback(ChatMessage),
}

/// Owns the transport of one chat view.
///
/// Sends go realtime when the link is open and fall back to the REST post
/// otherwise. Typing indicators have no fallback. Dropping the coordinator
/// disconnects the transport.
pub struct Coordinator<C: Connector, S: MessageStore> {
    transport: Transport<C>,
    store: S,
    me: UserId,
    active: Mutex<Option<ConversationId>>,
    slot: Slot,
    forwarder: JoinHandle<()>,
}

impl<C: Connector, S: MessageStore> Coordinator<C, S> {
    /// Must be called inside a tokio runtime.
    pub fn new(transport: Transport<C>, store: S, me: UserId) -> Self {
        let slot: Slot = Arc::default();
        let events = transport.subscribe();
        let forwarder = tokio::spawn(forward(events, Arc::clone(&slot), me));
        Self {
            transport,
            store,
            me,
            active: Mutex::new(None),
            slot,
            forwarder,
        }
    }

    /// Take the notification slot. A previous subscriber's stream ends.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        *lock(&self.slot) = Some(tx);
        rx
    }

    pub fn me(&self) -> UserId {
        self.me
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    /// Follow connection state without taking the notification slot.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Reconnect attempts used since the realtime link last opened.
    pub fn attempts(&self) -> u32 {
        self.transport.attempts()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn conversation(&self) -> Option<ConversationId> {
        lock(&self.active).clone()
    }

    /// Switch to `conversation`. The old session is torn down before the new
    /// one connects, even when the connect is rejected. The conversation stays
    /// active for fallback sends if the realtime connect fails.
    pub async fn open(&self, conversation: ConversationId) -> Result<(), CoordinatorError> {
        if self.transport.conversation().is_some() {
            self.transport.disconnect();
        }
        *lock(&self.active) = Some(conversation.clone());
        self.transport.connect(conversation).await?;
        Ok(())
    }

    pub fn close(&self) {
        self.transport.disconnect();
        *lock(&self.active) = None;
    }

    /// Send `content`, realtime first, REST otherwise.
    pub async fn send_message(&self, content: &str) -> Result<Delivery, CoordinatorError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(CoordinatorError::EmptyMessage);
        }

        let frame = OutboundFrame::Message {
            message: content.to_string(),
        };
        if self.transport.is_open() && self.transport.send(&frame) {
            return Ok(Delivery::Realtime);
        }

        let conversation = self
            .conversation()
            .ok_or(CoordinatorError::NoConversation)?;
        tracing::info!(%conversation, "realtime channel unavailable, posting over http");
        let record = self
            .store
            .post_message(&conversation, content)
            .await
            .map_err(CoordinatorError::Fallback)?;

        let message = ChatMessage::from_record(record, self.me, Origin::Fallback);
        if self.conversation().as_ref() == Some(&conversation) {
            deliver(&self.slot, Notification::Message(message.clone()));
        } else {
            tracing::debug!(%conversation, "conversation switched during fallback post");
        }
        Ok(Delivery::Fallback(message))
    }

    /// Forward a typing indicator if the link is open; drop it otherwise.
    pub fn set_typing(&self, typing: bool) {
        if self.transport.is_open() {
            self.transport.send(&OutboundFrame::Typing { typing });
        }
    }

    /// Persisted messages of the active conversation, oldest first.
    pub async fn history(&self) -> Result<Vec<ChatMessage>, CoordinatorError> {
        let conversation = self
            .conversation()
            .ok_or(CoordinatorError::NoConversation)?;
        let records = self
            .store
            .messages(&conversation)
            .await
            .map_err(CoordinatorError::History)?;
        Ok(records
            .into_iter()
            .map(|record| ChatMessage::from_record(record, self.me, Origin::History))
            .collect())
    }
}

impl<C: Connector, S: MessageStore> Drop for Coordinator<C, S> {
    fn drop(&mut self) {
        self.forwarder.abort();
        self.transport.disconnect();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn deliver(slot: &Slot, notification: Notification) {
    let mut slot = lock(slot);
    if let Some(tx) = slot.as_ref() {
        if tx.send(notification).is_err() {
            *slot = None;
        }
    }
}

async fn forward(mut events: mpsc::UnboundedReceiver<TransportEvent>, slot: Slot, me: UserId) {
    while let Some(event) = events.recv().await {
        deliver(&slot, Notification::from_transport(event, me));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Endpoint;
    use crate::credentials::{CredentialStore, MemoryCredentials};
    use crate::error::{ApiError, TransportError};
    use crate::notification::Presence;
    use crate::reconnect::ReconnectPolicy;
    use crate::transport::mock::{LinkHandle, MockConnector, Sent};
    use chrono::{TimeZone, Utc};
    use parley_core::{CloseKind, MessageId, MessageRecord, User};
    use reqwest::StatusCode;
    use std::sync::atomic::{AtomicBool, Ordering};

    const ME: UserId = UserId(1);

    #[derive(Default)]
    struct FakeStore {
        posts: Mutex<Vec<(ConversationId, String)>>,
        fail: AtomicBool,
    }

    impl FakeStore {
        fn posts(&self) -> Vec<(ConversationId, String)> {
            lock(&self.posts).clone()
        }
    }

    fn record(id: i64, sender: UserId, content: &str) -> MessageRecord {
        MessageRecord {
            id: MessageId(id),
            conversation: 5,
            sender: User {
                id: sender,
                username: format!("user{}", sender.0),
                email: None,
                display_name: None,
            },
            content: content.to_string(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 10, 15, 0).unwrap(),
        }
    }

    impl MessageStore for FakeStore {
        async fn messages(&self, _: &ConversationId) -> Result<Vec<MessageRecord>, ApiError> {
            Ok(vec![record(1, UserId(2), "hi"), record(2, ME, "hey")])
        }

        async fn post_message(
            &self,
            conversation: &ConversationId,
            content: &str,
        ) -> Result<MessageRecord, ApiError> {
            lock(&self.posts).push((conversation.clone(), content.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                return Err(ApiError::Status {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    detail: "boom".into(),
                });
            }
            Ok(record(99, ME, content))
        }
    }

    fn coordinator() -> (
        Coordinator<MockConnector, FakeStore>,
        MockConnector,
        mpsc::UnboundedReceiver<LinkHandle>,
    ) {
        coordinator_with(Arc::new(MemoryCredentials::with_token("tok")))
    }

    fn coordinator_with(
        credentials: Arc<MemoryCredentials>,
    ) -> (
        Coordinator<MockConnector, FakeStore>,
        MockConnector,
        mpsc::UnboundedReceiver<LinkHandle>,
    ) {
        let (connector, links) = MockConnector::new();
        let transport = Transport::new(
            connector.clone(),
            Endpoint::new("ws://chat.test").unwrap(),
            credentials,
            ReconnectPolicy::default(),
        );
        let coordinator = Coordinator::new(transport, FakeStore::default(), ME);
        (coordinator, connector, links)
    }

    fn inbound_message(user: UserId, id: i64, text: &str) -> String {
        serde_json::json!({
            "type": "message",
            "message": text,
            "user_id": user.0,
            "message_id": id,
            "timestamp": "2024-05-01T10:15:00Z",
        })
        .to_string()
    }

    async fn next_message(rx: &mut mpsc::UnboundedReceiver<Notification>) -> ChatMessage {
        loop {
            if let Notification::Message(message) = rx.recv().await.unwrap() {
                return message;
            }
        }
    }

    /// Everything delivered before the session reaches `Closed(Normal)`.
    async fn until_closed(rx: &mut mpsc::UnboundedReceiver<Notification>) -> Vec<Notification> {
        let mut seen = Vec::new();
        loop {
            let notification = rx.recv().await.unwrap();
            if notification == Notification::Status(ConnectionState::Closed(CloseKind::Normal)) {
                return seen;
            }
            seen.push(notification);
        }
    }

    #[tokio::test]
    async fn own_echo_is_recognized_by_sender() {
        let (coordinator, _connector, mut links) = coordinator();
        let mut rx = coordinator.subscribe();
        coordinator.open(ConversationId::from(5)).await.unwrap();
        let mut link = links.recv().await.unwrap();

        let delivery = coordinator.send_message("  hello ").await.unwrap();
        assert_eq!(delivery, Delivery::Realtime);
        assert_eq!(
            link.next_sent().await,
            Some(Sent::Text(r#"{"type":"message","message":"hello"}"#.into()))
        );
        assert!(coordinator.store().posts().is_empty());

        link.push(&inbound_message(ME, 10, "hello"));
        let echo = next_message(&mut rx).await;
        assert!(echo.is_own);
        assert_eq!(echo.id, MessageId(10));
        assert_eq!(echo.origin, Origin::Realtime);

        link.push(&inbound_message(UserId(2), 11, "hello"));
        let other = next_message(&mut rx).await;
        assert!(!other.is_own);
    }

    #[tokio::test]
    async fn fallback_post_synthesizes_one_notification() {
        let (coordinator, connector, _links) = coordinator();
        let mut rx = coordinator.subscribe();
        connector.refuse(true);
        let err = coordinator.open(ConversationId::from(5)).await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Connect(_)));
        assert_eq!(coordinator.state(), ConnectionState::Closed(CloseKind::Abnormal));

        let delivery = coordinator.send_message("hello").await.unwrap();
        let Delivery::Fallback(message) = delivery else {
            panic!("expected fallback delivery");
        };
        assert_eq!(message.id, MessageId(99));
        assert!(message.is_own);
        assert_eq!(
            coordinator.store().posts(),
            [(ConversationId::from(5), "hello".to_string())]
        );

        coordinator.close();
        let messages: Vec<_> = until_closed(&mut rx)
            .await
            .into_iter()
            .filter_map(|n| match n {
                Notification::Message(m) => Some(m),
                _ => None,
            })
            .collect();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, MessageId(99));
        assert_eq!(messages[0].timestamp, message.timestamp);
        assert_eq!(messages[0].origin, Origin::Fallback);
    }

    #[tokio::test]
    async fn failed_fallback_surfaces_error_only() {
        let (coordinator, connector, _links) = coordinator();
        let mut rx = coordinator.subscribe();
        connector.refuse(true);
        let _ = coordinator.open(ConversationId::from(5)).await;
        coordinator.store().fail.store(true, Ordering::SeqCst);

        let err = coordinator.send_message("hello").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Fallback(_)));
        assert_eq!(coordinator.store().posts().len(), 1);
        assert_eq!(coordinator.conversation(), Some(ConversationId::from(5)));

        coordinator.close();
        let seen = until_closed(&mut rx).await;
        assert!(!seen.iter().any(|n| matches!(n, Notification::Message(_))));
    }

    #[tokio::test]
    async fn typing_is_dropped_when_not_open() {
        let (coordinator, connector, mut links) = coordinator();
        coordinator.set_typing(true);
        assert_eq!(connector.opens(), 0);
        assert!(coordinator.store().posts().is_empty());
        assert_eq!(coordinator.state(), ConnectionState::Idle);

        coordinator.open(ConversationId::from(5)).await.unwrap();
        let mut link = links.recv().await.unwrap();
        coordinator.set_typing(true);
        assert_eq!(
            link.next_sent().await,
            Some(Sent::Text(r#"{"type":"typing","typing":true}"#.into()))
        );
    }

    #[tokio::test]
    async fn switching_tears_down_before_connecting() {
        let (coordinator, _connector, mut links) = coordinator();
        let mut rx = coordinator.subscribe();
        coordinator.open(ConversationId::from(5)).await.unwrap();
        let mut first = links.recv().await.unwrap();
        coordinator.open(ConversationId::from(6)).await.unwrap();
        let second = links.recv().await.unwrap();

        let mut states = Vec::new();
        while states.len() < 5 {
            if let Notification::Status(state) = rx.recv().await.unwrap() {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            [
                ConnectionState::Connecting,
                ConnectionState::Open,
                ConnectionState::Closed(CloseKind::Normal),
                ConnectionState::Connecting,
                ConnectionState::Open,
            ]
        );
        assert_eq!(first.next_sent().await, Some(Sent::Close(1000)));
        assert!(second.url.as_str().contains("/ws/chat/6/"));
        assert_eq!(coordinator.conversation(), Some(ConversationId::from(6)));
    }

    #[tokio::test]
    async fn rejected_switch_still_releases_old_session() {
        let credentials = Arc::new(MemoryCredentials::with_token("tok"));
        let (coordinator, connector, mut links) = coordinator_with(Arc::clone(&credentials));
        coordinator.open(ConversationId::from(5)).await.unwrap();
        let mut old = links.recv().await.unwrap();

        credentials.clear().unwrap();
        let err = coordinator.open(ConversationId::from(6)).await.unwrap_err();
        assert!(matches!(
            err,
            CoordinatorError::Connect(TransportError::MissingCredential)
        ));
        assert_eq!(old.next_sent().await, Some(Sent::Close(1000)));
        assert_eq!(coordinator.state(), ConnectionState::Closed(CloseKind::Normal));
        assert_eq!(coordinator.conversation(), Some(ConversationId::from(6)));
        assert_eq!(connector.opens(), 1);

        let delivery = coordinator.send_message("for six").await.unwrap();
        assert!(matches!(delivery, Delivery::Fallback(_)));
        assert_eq!(
            coordinator.store().posts(),
            [(ConversationId::from(6), "for six".to_string())]
        );
        assert_eq!(old.try_sent(), None);
    }

    #[tokio::test]
    async fn watching_state_keeps_notifications_flowing() {
        let (coordinator, _connector, mut links) = coordinator();
        let mut rx = coordinator.subscribe();
        let mut watcher = coordinator.watch_state();

        coordinator.open(ConversationId::from(5)).await.unwrap();
        watcher.wait_for(|state| state.is_open()).await.unwrap();
        assert_eq!(coordinator.attempts(), 0);

        let link = links.recv().await.unwrap();
        link.push(&inbound_message(UserId(2), 12, "still here"));
        let message = next_message(&mut rx).await;
        assert_eq!(message.content, "still here");
    }

    #[tokio::test]
    async fn presence_and_typing_are_typed() {
        let (coordinator, _connector, mut links) = coordinator();
        let mut rx = coordinator.subscribe();
        coordinator.open(ConversationId::from(5)).await.unwrap();
        let link = links.recv().await.unwrap();

        link.push(r#"{"type":"typing","username":"bob","display_name":"Bob","typing":true}"#);
        link.push(r#"{"type":"user_leave","username":"bob","display_name":"Bob"}"#);

        let mut typed = Vec::new();
        while typed.len() < 2 {
            match rx.recv().await.unwrap() {
                Notification::Status(_) => {}
                other => typed.push(other),
            }
        }
        assert!(matches!(&typed[0], Notification::Typing { who, typing: true } if who.label() == "Bob"));
        assert!(matches!(
            &typed[1],
            Notification::Presence { presence: Presence::Left, .. }
        ));
    }

    #[tokio::test]
    async fn rejects_empty_and_unbound_sends() {
        let (coordinator, _connector, _links) = coordinator();
        assert!(matches!(
            coordinator.send_message("   ").await,
            Err(CoordinatorError::EmptyMessage)
        ));
        assert!(matches!(
            coordinator.send_message("hi").await,
            Err(CoordinatorError::NoConversation)
        ));
        assert!(coordinator.store().posts().is_empty());
    }

    #[tokio::test]
    async fn history_marks_own_messages() {
        let (coordinator, connector, _links) = coordinator();
        connector.refuse(true);
        let _ = coordinator.open(ConversationId::from(5)).await;

        let history = coordinator.history().await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history[0].is_own);
        assert!(history[1].is_own);
        assert_eq!(history[1].origin, Origin::History);
    }

    #[tokio::test]
    async fn drop_disconnects() {
        let (coordinator, _connector, mut links) = coordinator();
        coordinator.open(ConversationId::from(5)).await.unwrap();
        let mut link = links.recv().await.unwrap();

        drop(coordinator);
        assert_eq!(link.next_sent().await, Some(Sent::Close(1000)));
    }
}
