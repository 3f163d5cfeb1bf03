//! deriv_monitor Library
//!
//! An unattended market-data monitor: maintains a persistent streaming
//! connection to a quote provider, rebuilds per-instrument minute candles
//! from raw ticks, classifies compression/breakout setups over the rolling
//! history, and pushes deduplicated, rate-limited alerts to a messaging
//! channel.

pub mod analysis;
pub mod common;
pub mod config;
pub mod feed;
pub mod market;
pub mod monitor;
pub mod notify;
pub mod signal;
pub mod strategy;

// Re-export commonly used types
pub use common::errors::{MonitorError, Result};
pub use common::types::{Candle, Classification, Direction, FeedEvent, Instrument, Tick};
pub use config::types::MonitorConfig;
pub use feed::client::FeedClient;
pub use market::store::InstrumentState;
pub use monitor::orchestrator::{Monitor, RunMode, RunSummary};
pub use notify::telegram::TelegramNotifier;
pub use signal::dispatcher::{Signal, SignalDispatcher};
pub use strategy::engine::StrategyEngine;
pub use strategy::types::Analysis;
