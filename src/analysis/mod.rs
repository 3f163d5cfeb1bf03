//! Analysis module - stateless technical indicators

pub mod indicators;

pub use indicators::{atr, bollinger, ema, macd, rsi, sma, Bollinger, Macd};
