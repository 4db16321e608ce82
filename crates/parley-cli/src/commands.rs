//! One-shot subcommands.

use anyhow::{Context, Result};
use parley_client::{ChatMessage, CredentialStore, HttpApi, MessageStore, Origin};
use parley_core::{
    Conversation, ConversationId, LoginCredentials, NewConversation, RegisterData, User, UserId,
};
use tokio::io::{AsyncBufReadExt, BufReader};

pub async fn login(api: &HttpApi, username: String, password: Option<String>) -> Result<()> {
    let password = password_or_prompt(password).await?;
    let auth = api
        .login(&LoginCredentials { username, password })
        .await
        .context("login failed")?;
    api.credentials().set_token(&auth.access)?;

    let me = api.current_user().await?;
    println!("Logged in as {}", describe(&me));
    Ok(())
}

pub async fn register(
    api: &HttpApi,
    username: String,
    email: Option<String>,
    display_name: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let password = password_or_prompt(password).await?;
    let user = api
        .register(&RegisterData {
            username: username.clone(),
            password: password.clone(),
            email,
            display_name,
        })
        .await
        .context("registration failed")?;
    tracing::info!(user = %user.id, "registered");

    let auth = api.login(&LoginCredentials { username, password }).await?;
    api.credentials().set_token(&auth.access)?;
    println!("Registered and logged in as {}", describe(&user));
    Ok(())
}

/// Forget the token even when the server call fails.
pub async fn logout(api: &HttpApi) -> Result<()> {
    if api.credentials().token().is_none() {
        println!("Not logged in");
        return Ok(());
    }
    if let Err(e) = api.logout().await {
        tracing::warn!(error = %e, "server logout failed");
    }
    api.credentials().clear()?;
    println!("Logged out");
    Ok(())
}

pub async fn whoami(api: &HttpApi) -> Result<()> {
    let me = current_user(api).await?;
    println!("{}", describe(&me));
    Ok(())
}

pub async fn users(api: &HttpApi, query: &str) -> Result<()> {
    for user in api.search_users(query).await? {
        println!("{}", describe(&user));
    }
    Ok(())
}

pub async fn conversations(api: &HttpApi) -> Result<()> {
    let conversations = api.conversations().await?;
    if conversations.is_empty() {
        println!("No conversations yet");
    }
    for conversation in &conversations {
        println!("{}", describe_conversation(conversation));
    }
    Ok(())
}

pub async fn create(api: &HttpApi, title: Option<String>, participants: Vec<i64>) -> Result<()> {
    let conversation = api
        .create_conversation(&NewConversation {
            title,
            participant_ids: participants.into_iter().map(UserId).collect(),
        })
        .await
        .context("failed to create conversation")?;
    println!("{}", describe_conversation(&conversation));
    Ok(())
}

pub async fn history(api: &HttpApi, conversation: &ConversationId) -> Result<()> {
    let me = current_user(api).await?;
    let records = api
        .messages(conversation)
        .await
        .with_context(|| format!("failed to load conversation {conversation}"))?;
    for record in records {
        let message = ChatMessage::from_record(record, me.id, Origin::History);
        println!("{}", format_message(&message));
    }
    Ok(())
}

pub async fn current_user(api: &HttpApi) -> Result<User> {
    if api.credentials().token().is_none() {
        anyhow::bail!("not logged in; run `parley login <username>` first");
    }
    api.current_user()
        .await
        .context("failed to fetch the current user")
}

pub fn format_message(message: &ChatMessage) -> String {
    let sender = if message.is_own {
        "you".to_string()
    } else {
        message
            .sender_name
            .clone()
            .unwrap_or_else(|| format!("user {}", message.sender))
    };
    format!(
        "[{}] {sender}: {}",
        message.timestamp.format("%H:%M"),
        message.content
    )
}

fn describe(user: &User) -> String {
    match &user.display_name {
        Some(name) if !name.is_empty() => format!("{name} (@{}, id {})", user.username, user.id),
        _ => format!("@{} (id {})", user.username, user.id),
    }
}

fn describe_conversation(conversation: &Conversation) -> String {
    let who: Vec<&str> = conversation.participants.iter().map(User::label).collect();
    format!(
        "{:>5}  {}  [{}]",
        conversation.id,
        conversation.label(),
        who.join(", ")
    )
}

async fn password_or_prompt(password: Option<String>) -> Result<String> {
    if let Some(password) = password {
        return Ok(password);
    }
    eprint!("Password: ");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut line)
        .await
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    anyhow::ensure!(!password.is_empty(), "password is required");
    Ok(password)
}
