//! The physical link under a transport, and the WebSocket implementation of it.

use crate::error::TransportError;
use futures_util::{SinkExt, StreamExt};
use parley_core::ABNORMAL_CLOSURE;
use reqwest::Url;
use std::future::Future;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS: u16 = 1005;

/// What a link yields to its reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Text(String),
    /// The link is finished. No events follow.
    Closed { code: u16, reason: String },
}

/// One open realtime connection.
pub trait Link: Send + 'static {
    fn send_text(&mut self, text: String) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next event. Must be cancel safe: it is raced against outbound traffic.
    fn next_event(&mut self) -> impl Future<Output = LinkEvent> + Send;

    fn close(&mut self, code: u16, reason: &'static str) -> impl Future<Output = ()> + Send;
}

/// Opens links.
pub trait Connector: Send + Sync + 'static {
    type Link: Link;

    fn open(&self, url: &Url) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// Connects over WebSocket (plain or TLS).
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    type Link = WsLink;

    async fn open(&self, url: &Url) -> Result<WsLink, TransportError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url.as_str()).await?;
        Ok(WsLink { stream })
    }
}

pub struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl Link for WsLink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> LinkEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return LinkEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return LinkEvent::Text(text),
                    Err(_) => tracing::warn!(len = data.len(), "ignoring non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    return match frame {
                        Some(frame) => LinkEvent::Closed {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                        },
                        None => LinkEvent::Closed {
                            code: NO_STATUS,
                            reason: String::new(),
                        },
                    };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return LinkEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: e.to_string(),
                    };
                }
                None => {
                    return LinkEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped".to_string(),
                    };
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &'static str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!(error = %e, "close handshake failed");
        }
    }
}
