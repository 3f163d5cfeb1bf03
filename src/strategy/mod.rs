//! Strategy module - compression/breakout classification and scoring
//!
//! The engine walks a three-state machine per instrument:
//!
//! ```text
//! WAIT ──(≥3 watch conditions)──▶ WATCH ──(≥4 ready checks)──▶ READY
//!   ▲                               │
//!   └──────(news filter)────────────┘
//! ```
//!
//! Scoring is a pure function over a [`types::ConditionSet`] and
//! [`types::Weights`]; everything stateful (the compression zone, adaptive
//! counters) persists on the instrument itself so consecutive analyses build
//! on each other.

pub mod engine;
pub mod scoring;
pub mod types;

pub use engine::{StrategyEngine, MIN_CANDLES};
pub use scoring::{score, strong_watch_score, watch_score};
pub use types::{
    AdaptiveStats, Analysis, CompressionZone, ConditionSet, Trend, Weights,
};
