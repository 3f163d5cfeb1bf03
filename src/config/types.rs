//! Configuration types

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Streaming feed configuration
    pub feed: FeedConfig,
    /// Alert channel configuration
    pub telegram: TelegramConfig,
    /// Strategy and scheduling tunables
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

/// Streaming feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Application id passed to the provider on connect (required)
    pub app_id: String,
    /// WebSocket endpoint of the quote provider
    #[serde(default = "default_feed_endpoint")]
    pub endpoint: String,
    /// Deadline for a correlated request/response round trip, seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Client keepalive ping interval, seconds
    #[serde(default = "default_keepalive_interval")]
    pub keepalive_interval_seconds: u64,
    /// Symbols subscribed per batch by the subscription pump
    #[serde(default = "default_subscribe_batch_size")]
    pub subscribe_batch_size: usize,
    /// Pause between subscription batches, milliseconds
    #[serde(default = "default_subscribe_batch_delay")]
    pub subscribe_batch_delay_ms: u64,
    /// Upper bound of the per-subscribe random jitter, milliseconds
    #[serde(default = "default_subscribe_jitter")]
    pub subscribe_jitter_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            endpoint: default_feed_endpoint(),
            request_timeout_seconds: default_request_timeout(),
            keepalive_interval_seconds: default_keepalive_interval(),
            subscribe_batch_size: default_subscribe_batch_size(),
            subscribe_batch_delay_ms: default_subscribe_batch_delay(),
            subscribe_jitter_ms: default_subscribe_jitter(),
        }
    }
}

fn default_feed_endpoint() -> String {
    "wss://ws.derivws.com/websockets/v3".to_string()
}

fn default_request_timeout() -> u64 {
    15
}

fn default_keepalive_interval() -> u64 {
    30
}

fn default_subscribe_batch_size() -> usize {
    5
}

fn default_subscribe_batch_delay() -> u64 {
    500
}

fn default_subscribe_jitter() -> u64 {
    100
}

/// Telegram alert channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token (required)
    pub bot_token: String,
    /// Destination chat id (required)
    pub chat_id: String,
    /// API base URL; overridable for tests
    #[serde(default = "default_telegram_api_url")]
    pub api_url: String,
    /// Per-delivery HTTP timeout, seconds
    #[serde(default = "default_telegram_timeout")]
    pub timeout_seconds: u64,
}

fn default_telegram_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_telegram_timeout() -> u64 {
    5
}

/// Strategy and scheduling tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorSettings {
    /// Candles requested per instrument at backfill time
    #[serde(default = "default_history_count")]
    pub history_count: u32,
    /// Minimum confidence for a READY classification to become a signal
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: i32,
    /// Per-instrument notification cooldown, minutes
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: i64,
    /// Global dedup TTL for sent signal hashes, hours
    #[serde(default = "default_dedup_hours")]
    pub dedup_hours: i64,
    /// Window in which an identical hash is suppressed per instrument, hours
    #[serde(default = "default_repeat_window_hours")]
    pub repeat_window_hours: i64,
    /// Delay before a signal's outcome is re-checked, minutes
    #[serde(default = "default_eval_delay_minutes")]
    pub eval_delay_minutes: u64,
    /// Minimum seconds between analyses of one instrument
    #[serde(default = "default_analysis_throttle")]
    pub analysis_throttle_seconds: i64,
    /// Idle threshold for the periodic re-analysis scheduler, seconds
    #[serde(default = "default_reanalyze_after")]
    pub reanalyze_after_seconds: i64,
    /// Test-mode run duration, hours
    #[serde(default = "default_test_duration_hours")]
    pub test_duration_hours: u64,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            history_count: default_history_count(),
            confidence_threshold: default_confidence_threshold(),
            cooldown_minutes: default_cooldown_minutes(),
            dedup_hours: default_dedup_hours(),
            repeat_window_hours: default_repeat_window_hours(),
            eval_delay_minutes: default_eval_delay_minutes(),
            analysis_throttle_seconds: default_analysis_throttle(),
            reanalyze_after_seconds: default_reanalyze_after(),
            test_duration_hours: default_test_duration_hours(),
        }
    }
}

fn default_history_count() -> u32 {
    200
}

fn default_confidence_threshold() -> i32 {
    75
}

fn default_cooldown_minutes() -> i64 {
    30
}

fn default_dedup_hours() -> i64 {
    4
}

fn default_repeat_window_hours() -> i64 {
    2
}

fn default_eval_delay_minutes() -> u64 {
    5
}

fn default_analysis_throttle() -> i64 {
    15
}

fn default_reanalyze_after() -> i64 {
    30
}

fn default_test_duration_hours() -> u64 {
    168
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
