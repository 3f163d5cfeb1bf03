//! Feed module - streaming quote-provider client

pub mod client;
pub mod messages;

pub use client::{Backoff, FeedClient};
