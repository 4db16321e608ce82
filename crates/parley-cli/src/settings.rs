//! Config file discovery and command-line overrides.

use anyhow::{Context, Result};
use parley_client::ClientConfig;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "parley";

/// Values given on the command line or through the environment.
#[derive(Debug, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub api_url: Option<String>,
    pub ws_url: Option<String>,
    pub token_file: Option<PathBuf>,
}

/// An explicit config path must exist; the default one is optional.
pub fn resolve(overrides: &Overrides) -> Result<ClientConfig> {
    let mut config = match &overrides.config {
        Some(path) => ClientConfig::load(path)?,
        None => match default_config_path() {
            Some(path) if path.exists() => ClientConfig::load(&path)?,
            _ => ClientConfig::default(),
        },
    };
    apply(&mut config, overrides);
    Ok(config)
}

fn apply(config: &mut ClientConfig, overrides: &Overrides) {
    if let Some(url) = &overrides.api_url {
        config.api_base_url = url.clone();
    }
    if let Some(url) = &overrides.ws_url {
        config.ws_base_url = Some(url.clone());
    }
    if let Some(path) = &overrides.token_file {
        config.token_path = Some(path.clone());
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}

pub fn token_path(config: &ClientConfig) -> Result<PathBuf> {
    if let Some(path) = &config.token_path {
        return Ok(path.clone());
    }
    let dir = dirs::config_dir().context("cannot determine config directory; pass --token-file")?;
    Ok(token_in(&dir))
}

fn token_in(config_dir: &Path) -> PathBuf {
    config_dir.join(APP_DIR).join("token")
}
