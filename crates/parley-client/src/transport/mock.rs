//! In-process connector for tests.

use super::{Connector, Link, LinkEvent};
use crate::error::TransportError;
use reqwest::Url;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Notify, mpsc};

/// What the client did to a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Sent {
    Text(String),
    Close(u16),
}

/// Test side of an opened link.
pub(crate) struct LinkHandle {
    pub url: Url,
    inbound: mpsc::UnboundedSender<LinkEvent>,
    sent: mpsc::UnboundedReceiver<Sent>,
}

impl LinkHandle {
    pub fn push(&self, text: &str) {
        let _ = self.inbound.send(LinkEvent::Text(text.to_string()));
    }

    pub fn close(&self, code: u16) {
        let _ = self.inbound.send(LinkEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    pub async fn next_sent(&mut self) -> Option<Sent> {
        self.sent.recv().await
    }

    pub fn try_sent(&mut self) -> Option<Sent> {
        self.sent.try_recv().ok()
    }
}

pub(crate) struct MockLink {
    inbound: mpsc::UnboundedReceiver<LinkEvent>,
    sent: mpsc::UnboundedSender<Sent>,
}

impl Link for MockLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent
            .send(Sent::Text(text))
            .map_err(|_| TransportError::Refused("peer gone".into()))
    }

    async fn next_event(&mut self) -> LinkEvent {
        self.inbound.recv().await.unwrap_or(LinkEvent::Closed {
            code: parley_core::ABNORMAL_CLOSURE,
            reason: "handle dropped".into(),
        })
    }

    async fn close(&mut self, code: u16, _reason: &'static str) {
        let _ = self.sent.send(Sent::Close(code));
    }
}

#[derive(Default)]
struct Control {
    opens: AtomicUsize,
    refuse: AtomicBool,
    gated: AtomicBool,
    gate: Notify,
}

/// Hands every opened link's test side out through a channel.
#[derive(Clone)]
pub(crate) struct MockConnector {
    control: Arc<Control>,
    links: mpsc::UnboundedSender<LinkHandle>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LinkHandle>) {
        let (links, rx) = mpsc::unbounded_channel();
        let connector = Self {
            control: Arc::new(Control::default()),
            links,
        };
        (connector, rx)
    }

    /// Number of open attempts, successful or not.
    pub fn opens(&self) -> usize {
        self.control.opens.load(Ordering::SeqCst)
    }

    pub fn refuse(&self, refuse: bool) {
        self.control.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Hold every open until [`MockConnector::release`].
    pub fn gate(&self) {
        self.control.gated.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.control.gated.store(false, Ordering::SeqCst);
        self.control.gate.notify_waiters();
    }
}

impl Connector for MockConnector {
    type Link = MockLink;

    async fn open(&self, url: &Url) -> Result<MockLink, TransportError> {
        self.control.opens.fetch_add(1, Ordering::SeqCst);
        if self.control.gated.load(Ordering::SeqCst) {
            self.control.gate.notified().await;
        }
        if self.control.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused("mock refused".into()));
        }
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let _ = self.links.send(LinkHandle {
            url: url.clone(),
            inbound: inbound_tx,
            sent: sent_rx,
        });
        Ok(MockLink {
            inbound: inbound_rx,
            sent: sent_tx,
        })
    }
}
