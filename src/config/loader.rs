//! Configuration loader

use config::{Config, Environment, File};
use std::path::Path;

use super::types::{FeedConfig, MonitorConfig, TelegramConfig};
use crate::common::errors::{MonitorError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. Environment variables (prefixed with MONITOR_)
/// 2. Configuration file (TOML format)
/// 3. Default values
pub fn load_config(config_path: Option<&str>) -> Result<MonitorConfig> {
    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("MONITOR")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| MonitorError::Configuration(e.to_string()))?;

    let config: MonitorConfig = config
        .try_deserialize()
        .map_err(|e| MonitorError::Configuration(e.to_string()))?;

    validate(&config)?;
    Ok(config)
}

/// Load configuration from environment variables only
///
/// The three provider credentials are required; everything else falls back
/// to defaults.
pub fn load_from_env() -> Result<MonitorConfig> {
    dotenvy::dotenv().ok();

    let app_id = require_env("DERIV_APP_ID")?;
    let bot_token = require_env("TELEGRAM_BOT_TOKEN")?;
    let chat_id = require_env("TELEGRAM_CHAT_ID")?;

    let feed = FeedConfig {
        app_id,
        endpoint: std::env::var("DERIV_WS_ENDPOINT")
            .unwrap_or_else(|_| "wss://ws.derivws.com/websockets/v3".to_string()),
        ..FeedConfig::default()
    };

    let telegram = TelegramConfig {
        bot_token,
        chat_id,
        api_url: std::env::var("TELEGRAM_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string()),
        timeout_seconds: 5,
    };

    let config = MonitorConfig {
        feed,
        telegram,
        monitor: Default::default(),
        settings: Default::default(),
    };

    validate(&config)?;
    Ok(config)
}

/// Reject configurations missing any of the three required settings
pub fn validate(config: &MonitorConfig) -> Result<()> {
    let mut missing = Vec::new();
    if config.feed.app_id.trim().is_empty() {
        missing.push("feed.app_id (DERIV_APP_ID)");
    }
    if config.telegram.bot_token.trim().is_empty() {
        missing.push("telegram.bot_token (TELEGRAM_BOT_TOKEN)");
    }
    if config.telegram.chat_id.trim().is_empty() {
        missing.push("telegram.chat_id (TELEGRAM_CHAT_ID)");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MonitorError::Configuration(format!(
            "missing required settings: {}",
            missing.join(", ")
        )))
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| MonitorError::Configuration(format!("missing environment variable {name}")))
}
