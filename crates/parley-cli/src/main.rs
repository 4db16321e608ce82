//! Parley terminal client.
//!
//! Usage:
//!   parley login alice
//!   parley conversations
//!   parley chat 12
//!
//! Logs go to stderr; set `RUST_LOG` or `--log-level` to change verbosity.

mod chat;
mod commands;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use parley_client::{CredentialStore, FileCredentials, HttpApi};
use parley_core::ConversationId;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Terminal client for Parley chat", version)]
struct Cli {
    /// Config file (TOML)
    #[arg(long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// REST API base URL
    #[arg(long, env = "PARLEY_API_URL")]
    api_url: Option<String>,

    /// Realtime base URL (derived from the API URL when absent)
    #[arg(long, env = "PARLEY_WS_URL")]
    ws_url: Option<String>,

    /// Where the access token is kept
    #[arg(long, env = "PARLEY_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Log filter directive, e.g. `debug` or `parley_client=trace`
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Log in and store the access token
    Login {
        username: String,
        /// Read from stdin when absent
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Create an account
    Register {
        username: String,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long, env = "PARLEY_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Log out and forget the stored token
    Logout,

    /// Show the logged-in user
    Whoami,

    /// Search users by name
    Users { query: String },

    /// List your conversations
    Conversations,

    /// Start a conversation
    Create {
        #[arg(short, long)]
        title: Option<String>,
        /// User id to invite (repeatable)
        #[arg(short, long = "participant")]
        participants: Vec<i64>,
    },

    /// Print a conversation's messages
    History { conversation: ConversationId },

    /// Join a conversation interactively
    Chat { conversation: ConversationId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("parley=info,parley_client=info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = settings::resolve(&settings::Overrides {
        config: cli.config.clone(),
        api_url: cli.api_url.clone(),
        ws_url: cli.ws_url.clone(),
        token_file: cli.token_file.clone(),
    })?;
    let token_path = settings::token_path(&config)?;
    tracing::debug!(api = %config.api_base_url, token = %token_path.display(), "configured");

    let credentials: Arc<dyn CredentialStore> = Arc::new(FileCredentials::new(token_path));
    let api = HttpApi::new(config.api_url()?, credentials);

    match cli.command {
        Command::Login { username, password } => commands::login(&api, username, password).await,
        Command::Register {
            username,
            email,
            display_name,
            password,
        } => commands::register(&api, username, email, display_name, password).await,
        Command::Logout => commands::logout(&api).await,
        Command::Whoami => commands::whoami(&api).await,
        Command::Users { query } => commands::users(&api, &query).await,
        Command::Conversations => commands::conversations(&api).await,
        Command::Create {
            title,
            participants,
        } => commands::create(&api, title, participants).await,
        Command::History { conversation } => commands::history(&api, &conversation).await,
        Command::Chat { conversation } => chat::run(api, &config, conversation).await,
    }
}
