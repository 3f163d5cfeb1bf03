//! Notify module - outbound alert channel

pub mod telegram;

pub use telegram::{AlertChannel, TelegramNotifier};
