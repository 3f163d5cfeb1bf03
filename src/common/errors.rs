//! Error types for the application

use thiserror::Error;

/// Result type alias using our MonitorError
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Main error type for monitor operations
#[derive(Error, Debug)]
pub enum MonitorError {
    /// WebSocket connection errors (transient, trigger a backoff reconnect)
    #[error("feed connection error: {0}")]
    Connection(String),

    /// The connection dropped while a request was still in flight
    #[error("connection lost before a response arrived")]
    ConnectionLost,

    /// A request was attempted while disconnected
    #[error("feed is not connected")]
    NotConnected,

    /// A correlated request received no response within the deadline
    #[error("request timed out")]
    RequestTimeout,

    /// An inbound frame could not be parsed; the connection stays open
    #[error("malformed feed message: {0}")]
    MalformedMessage(String),

    /// The provider rejected a subscription
    #[error("subscription failed for {symbol}: {message}")]
    Subscription { symbol: String, message: String },

    /// Provider-level error payload echoed back on a request
    #[error("feed API error {code}: {message}")]
    Api { code: String, message: String },

    /// Alert delivery failed after local retries
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    /// HTTP request errors
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON parsing error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Configuration errors (fatal at startup)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Channel send errors
    #[error("channel send error: {0}")]
    ChannelSend(String),

    /// Generic internal errors
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for MonitorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        MonitorError::Connection(err.to_string())
    }
}
