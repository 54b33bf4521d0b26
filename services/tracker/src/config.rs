//! Service configuration loaded from environment variables

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Which storage backend the service runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

/// Configuration of the tracker service
///
/// # Environment Variables
///
/// - `TELEGRAM_BOT_TOKEN` (required)
/// - `TELEGRAM_BOT_USERNAME` (required)
/// - `TELEGRAM_API_URL` (default: `https://api.telegram.org`)
/// - `HTTP_HOST` (default: `0.0.0.0`)
/// - `HTTP_PORT` (default: 5000)
/// - `AUTO_TRACK_INTERVAL` seconds between location prompts (default: 30)
/// - `BROADCAST_CAPACITY` buffered live updates per observer (default: 256)
/// - `LOG_LEVEL` (default: `info`)
/// - `STORAGE_BACKEND` `postgres` or `memory` (default: `postgres`)
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub telegram_bot_token: String,
    pub telegram_bot_username: String,
    pub telegram_api_url: String,
    pub http_host: String,
    pub http_port: u16,
    pub auto_track_interval: u64,
    pub broadcast_capacity: usize,
    pub log_level: String,
    pub storage_backend: StorageBackend,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("telegram_bot_token", "")?
            .set_default("telegram_bot_username", "")?
            .set_default("telegram_api_url", "https://api.telegram.org")?
            .set_default("http_host", "0.0.0.0")?
            .set_default("http_port", 5000)?
            .set_default("auto_track_interval", 30)?
            .set_default("broadcast_capacity", 256)?
            .set_default("log_level", "info")?
            .set_default("storage_backend", "postgres")?
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    /// Names of every required variable that is unset or blank.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.telegram_bot_token.trim().is_empty() {
            missing.push("TELEGRAM_BOT_TOKEN");
        }
        if self.telegram_bot_username.trim().is_empty() {
            missing.push("TELEGRAM_BOT_USERNAME");
        }
        missing
    }

    pub fn validate(&self) -> Result<()> {
        let missing = self.missing_required();
        if !missing.is_empty() {
            anyhow::bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            );
        }
        if self.auto_track_interval == 0 {
            anyhow::bail!("AUTO_TRACK_INTERVAL must be at least 1 second");
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.http_host, self.http_port)
    }

    pub fn prompt_interval(&self) -> Duration {
        Duration::from_secs(self.auto_track_interval)
    }

    pub fn log_summary(&self) {
        info!("Configuration:");
        info!("  HTTP address: {}", self.bind_address());
        info!("  Bot username: {}", self.telegram_bot_username);
        info!("  Bot token: {}", mask(&self.telegram_bot_token));
        info!("  Telegram API: {}", self.telegram_api_url);
        info!("  Auto track interval: {}s", self.auto_track_interval);
        info!("  Broadcast capacity: {}", self.broadcast_capacity);
        info!("  Storage backend: {:?}", self.storage_backend);
    }
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "not set".to_string();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{}****", visible)
}
