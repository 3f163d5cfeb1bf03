//! Telegram alert delivery
//!
//! Keeps its own dedup and cooldown maps independent of the dispatcher's
//! bookkeeping, so a bug upstream can never turn into an alert storm.
//! Delivery failures are retried locally and then dropped; nothing here
//! panics or propagates past the channel boundary.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::common::errors::{MonitorError, Result};
use crate::config::types::TelegramConfig;
use crate::signal::stores::ExpiryStore;

/// Delivery attempts before a signal is dropped
const MAX_ATTEMPTS: u32 = 3;
/// Pause between failed attempts
const RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Outbound alert channel abstraction
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Deliver one formatted message; transport errors only
    async fn deliver(&self, text: &str) -> Result<()>;

    /// Channel name for logging
    fn name(&self) -> &'static str;
}

/// Telegram Bot API response envelope
#[derive(Debug, Deserialize)]
struct SendMessageResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram-backed notifier with dedup, cooldown and retry
pub struct TelegramNotifier {
    http: reqwest::Client,
    api_url: String,
    bot_token: String,
    chat_id: String,
    /// signal hash -> expiry of the dedup window
    sent_hashes: ExpiryStore,
    /// symbol -> expiry of the per-instrument cooldown
    cooldowns: ExpiryStore,
    dedup_ttl_ms: i64,
    cooldown_ms: i64,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig, dedup_ttl_ms: i64, cooldown_ms: i64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| MonitorError::Internal(e.to_string()))?;

        Ok(Self {
            http,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            sent_hashes: ExpiryStore::new(),
            cooldowns: ExpiryStore::new(),
            dedup_ttl_ms,
            cooldown_ms,
        })
    }

    /// Send one alert, honoring the per-instrument cooldown and the hash
    /// dedup window. Returns whether a delivery actually happened.
    pub async fn send_alert(
        &mut self,
        text: &str,
        symbol: &str,
        signal_hash: &str,
        now_ms: i64,
    ) -> bool {
        if self.cooldowns.is_live(symbol, now_ms) {
            debug!(symbol, "cooldown active, skipping alert");
            return false;
        }

        if self.sent_hashes.is_live(signal_hash, now_ms) {
            debug!(symbol, "duplicate signal hash, skipping alert");
            return false;
        }

        let mut attempts = 0;
        while attempts < MAX_ATTEMPTS {
            match self.deliver(text).await {
                Ok(()) => {
                    self.sent_hashes
                        .insert(signal_hash, now_ms + self.dedup_ttl_ms);
                    self.cooldowns.insert(symbol, now_ms + self.cooldown_ms);
                    self.sent_hashes.evict_expired(now_ms);
                    info!(symbol, "alert delivered");
                    return true;
                }
                Err(e) => {
                    attempts += 1;
                    warn!(
                        symbol,
                        "alert delivery failed ({} of {MAX_ATTEMPTS}): {e}", attempts
                    );
                    if attempts < MAX_ATTEMPTS {
                        sleep(RETRY_PAUSE).await;
                    }
                }
            }
        }

        false
    }
}

#[async_trait]
impl AlertChannel for TelegramNotifier {
    async fn deliver(&self, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.bot_token);

        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": self.chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::Delivery(format!(
                "telegram returned status {}",
                response.status()
            )));
        }

        let body: SendMessageResponse = response.json().await?;
        if !body.ok {
            return Err(MonitorError::Delivery(
                body.description
                    .unwrap_or_else(|| "telegram rejected the message".to_string()),
            ));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}
