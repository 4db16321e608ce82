//! Interactive chat session.

use crate::commands::{current_user, format_message};
use anyhow::Result;
use parley_client::{
    ClientConfig, Coordinator, CoordinatorError, HttpApi, Notification, Presence, Transport,
    WsConnector,
};
use parley_core::{ConnectionState, ConversationId};
use tokio::io::{AsyncBufReadExt, BufReader};

type Session = Coordinator<WsConnector, HttpApi>;

/// A line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Status,
    Reconnect,
    Unknown(&'a str),
    Say(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        Some(match line {
            "/quit" | "/exit" => Self::Quit,
            "/status" => Self::Status,
            "/reconnect" => Self::Reconnect,
            command if command.starts_with('/') => Self::Unknown(command),
            text => Self::Say(text),
        })
    }
}

pub async fn run(api: HttpApi, config: &ClientConfig, conversation: ConversationId) -> Result<()> {
    let me = current_user(&api).await?;
    let transport = Transport::new(
        WsConnector,
        config.endpoint()?,
        api.credentials().clone(),
        config.reconnect_policy(),
    );
    let session = Coordinator::new(transport, api, me.id);
    let mut notifications = session.subscribe();

    open(&session, &conversation).await;
    match session.history().await {
        Ok(history) => {
            for message in &history {
                println!("{}", format_message(message));
            }
        }
        Err(e) => eprintln!("! {e}"),
    }
    eprintln!("-- chatting in {conversation} as {}; /quit to leave --", me.label());

    // Lines arrive whole, so there are no keystrokes to announce as typing.
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let Some(input) = Input::parse(&line) else { continue };
                match input {
                    Input::Quit => break,
                    Input::Status => eprintln!("-- {} --", session.state()),
                    Input::Reconnect => open(&session, &conversation).await,
                    Input::Unknown(command) => eprintln!("! unknown command {command}"),
                    Input::Say(text) => say(&session, text).await,
                }
            }
            Some(notification) = notifications.recv() => show(notification),
        }
    }

    session.close();
    Ok(())
}

async fn open(session: &Session, conversation: &ConversationId) {
    if let Err(e) = session.open(conversation.clone()).await {
        tracing::warn!(%conversation, error = %e, "realtime session unavailable");
        eprintln!("! {e}; messages will be sent over http");
    }
}

async fn say(session: &Session, text: &str) {
    match session.send_message(text).await {
        Ok(_) | Err(CoordinatorError::EmptyMessage) => {}
        Err(e) => eprintln!("! {e}"),
    }
}

fn show(notification: Notification) {
    match notification {
        Notification::Message(message) => println!("{}", format_message(&message)),
        Notification::Typing { who, typing: true } => eprintln!("   {} is typing...", who.label()),
        Notification::Typing { .. } => {}
        Notification::Presence { who, presence } => {
            let verb = match presence {
                Presence::Joined => "joined",
                Presence::Left => "left",
            };
            eprintln!("-- {} {verb} --", who.label());
        }
        Notification::Status(state) => match state {
            ConnectionState::Open | ConnectionState::Exhausted => eprintln!("-- {state} --"),
            ConnectionState::Closed(_) | ConnectionState::Connecting | ConnectionState::Idle => {
                tracing::debug!(%state, "connection state");
            }
        },
    }
}
