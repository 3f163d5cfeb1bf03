//! Wire message types for the streaming quote protocol
//!
//! Requests are serialized as flat JSON objects; every correlated request
//! carries a `req_id` the server echoes back inside `echo_req`. Responses
//! arrive as a single envelope whose populated fields identify the message
//! kind.

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::types::{Candle, Instrument};

/// Subscribe to live ticks for a symbol
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    pub ticks: String,
    pub subscribe: u8,
}

impl SubscribeRequest {
    pub fn new(symbol: &str) -> Self {
        Self {
            ticks: symbol.to_string(),
            subscribe: 1,
        }
    }
}

/// Drop a live subscription by its server-assigned id
#[derive(Debug, Clone, Serialize)]
pub struct ForgetRequest {
    pub forget: String,
}

impl ForgetRequest {
    pub fn new(subscription_id: &str) -> Self {
        Self {
            forget: subscription_id.to_string(),
        }
    }
}

/// Fetch historical candles for a symbol
#[derive(Debug, Clone, Serialize)]
pub struct HistoryRequest {
    pub ticks_history: String,
    pub adjust_start_time: u8,
    pub count: u32,
    pub granularity: u32,
    pub style: String,
    pub end: String,
}

impl HistoryRequest {
    pub fn new(symbol: &str, count: u32, granularity: u32) -> Self {
        Self {
            ticks_history: symbol.to_string(),
            adjust_start_time: 1,
            count,
            granularity,
            style: "candles".to_string(),
            end: "latest".to_string(),
        }
    }
}

/// Discover the tradable instrument universe
#[derive(Debug, Clone, Serialize)]
pub struct ActiveSymbolsRequest {
    pub active_symbols: String,
    pub product_type: String,
}

impl Default for ActiveSymbolsRequest {
    fn default() -> Self {
        Self {
            active_symbols: "brief".to_string(),
            product_type: "basic".to_string(),
        }
    }
}

/// Client keepalive ping
#[derive(Debug, Clone, Serialize)]
pub struct PingRequest {
    pub ping: u8,
}

impl Default for PingRequest {
    fn default() -> Self {
        Self { ping: 1 }
    }
}

/// Reply to a server ping
#[derive(Debug, Clone, Serialize)]
pub struct PongReply {
    pub pong: u8,
}

impl Default for PongReply {
    fn default() -> Self {
        Self { pong: 1 }
    }
}

// ============================================================================
// Inbound envelope
// ============================================================================

/// Echo of the originating request, used for correlation
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EchoReq {
    #[serde(default)]
    pub req_id: Option<u64>,
}

/// Provider-level error payload
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// A live tick payload
#[derive(Debug, Clone, Deserialize)]
pub struct TickData {
    pub symbol: String,
    pub epoch: i64,
    #[serde(deserialize_with = "flexible_f64")]
    pub quote: f64,
}

/// Live subscription metadata attached to streamed messages
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
}

/// A historical candle as the provider encodes it (numbers may arrive as
/// strings)
#[derive(Debug, Clone, Deserialize)]
pub struct CandleData {
    pub epoch: i64,
    #[serde(deserialize_with = "flexible_f64")]
    pub open: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub high: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub low: f64,
    #[serde(deserialize_with = "flexible_f64")]
    pub close: f64,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub volume: Option<f64>,
}

impl From<CandleData> for Candle {
    fn from(data: CandleData) -> Self {
        Candle {
            start: data.epoch - data.epoch.rem_euclid(60),
            open: data.open,
            high: data.high,
            low: data.low,
            close: data.close,
            volume: data.volume.unwrap_or(0.0),
        }
    }
}

/// One entry of the `active_symbols` response
#[derive(Debug, Clone, Deserialize)]
pub struct ActiveSymbolData {
    pub symbol: String,
    pub display_name: String,
    pub market: String,
    #[serde(default, deserialize_with = "flexible_f64_opt")]
    pub pip: Option<f64>,
}

impl From<ActiveSymbolData> for Instrument {
    fn from(data: ActiveSymbolData) -> Self {
        Instrument {
            symbol: data.symbol,
            display_name: data.display_name,
            market: data.market,
            pip: data.pip.unwrap_or(0.0001),
        }
    }
}

/// Inbound message envelope.
///
/// The server multiplexes every message kind over one socket; which optional
/// fields are populated tells the client what it received.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerMessage {
    #[serde(default)]
    pub msg_type: Option<String>,
    #[serde(default)]
    pub echo_req: Option<EchoReq>,
    #[serde(default)]
    pub error: Option<ApiError>,
    #[serde(default)]
    pub tick: Option<TickData>,
    #[serde(default)]
    pub subscription: Option<SubscriptionInfo>,
    #[serde(default)]
    pub candles: Option<Vec<CandleData>>,
    #[serde(default)]
    pub active_symbols: Option<Vec<ActiveSymbolData>>,
}

impl ServerMessage {
    /// Correlation id echoed back from the originating request, if any
    pub fn req_id(&self) -> Option<u64> {
        self.echo_req.as_ref().and_then(|echo| echo.req_id)
    }

    /// Whether this is a server-initiated ping that needs a pong reply
    pub fn is_ping(&self) -> bool {
        self.msg_type.as_deref() == Some("ping")
    }
}

/// Accept a JSON number or a numeric string
fn flexible_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(f64),
        Text(String),
    }

    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

fn flexible_f64_opt<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum MaybeNumber {
        Number(f64),
        Text(String),
        None,
    }

    match Option::<MaybeNumber>::deserialize(deserializer)? {
        Some(MaybeNumber::Number(n)) => Ok(Some(n)),
        Some(MaybeNumber::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tick_message() {
        let json = r#"{
            "msg_type": "tick",
            "tick": {"symbol": "frxEURUSD", "epoch": 1700000000, "quote": 1.10042},
            "subscription": {"id": "abc-123"}
        }"#;

        let message: ServerMessage = serde_json::from_str(json).unwrap();
        let tick = message.tick.unwrap();
        assert_eq!(tick.symbol, "frxEURUSD");
        assert_eq!(tick.epoch, 1_700_000_000);
        assert_eq!(message.subscription.unwrap().id, "abc-123");
    }

    #[test]
    fn parses_history_response_with_string_numbers() {
        let json = r#"{
            "msg_type": "candles",
            "echo_req": {"req_id": 7},
            "candles": [
                {"epoch": 1700000000, "open": "1.1", "high": "1.2", "low": "1.0", "close": "1.15", "volume": "42"},
                {"epoch": 1700000060, "open": 1.15, "high": 1.18, "low": 1.14, "close": 1.16}
            ]
        }"#;

        let message: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.req_id(), Some(7));
        let candles = message.candles.unwrap();
        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].volume, Some(42.0));
        assert_eq!(candles[1].volume, None);

        let candle: Candle = candles[0].clone().into();
        assert_eq!(candle.start, 1_700_000_000 - 1_700_000_000 % 60);
        assert_eq!(candle.close, 1.15);
    }

    #[test]
    fn parses_error_response() {
        let json = r#"{
            "echo_req": {"req_id": 3},
            "error": {"code": "InvalidSymbol", "message": "Symbol frxZZZ invalid"}
        }"#;

        let message: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(message.req_id(), Some(3));
        assert_eq!(message.error.unwrap().code, "InvalidSymbol");
    }

    #[test]
    fn detects_server_ping() {
        let message: ServerMessage = serde_json::from_str(r#"{"msg_type": "ping"}"#).unwrap();
        assert!(message.is_ping());
    }

    #[test]
    fn subscribe_request_serializes_flat() {
        let value = serde_json::to_value(SubscribeRequest::new("R_50")).unwrap();
        assert_eq!(value["ticks"], "R_50");
        assert_eq!(value["subscribe"], 1);
    }
}
