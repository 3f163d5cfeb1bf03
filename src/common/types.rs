//! Core data model shared across the monitor

use serde::{Deserialize, Serialize};

/// Seconds per candle bucket. Ticks are grouped into fixed 60-second windows.
pub const BUCKET_SECONDS: i64 = 60;

/// Immutable instrument identity, created at universe-discovery time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    /// Provider symbol code (e.g. "frxEURUSD")
    pub symbol: String,
    /// Human-readable name
    pub display_name: String,
    /// Market category reported by the provider (forex, crypto, ...)
    pub market: String,
    /// Smallest price increment for the instrument
    pub pip: f64,
}

/// A single timestamped price quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub symbol: String,
    /// Unix timestamp in seconds
    pub epoch: i64,
    pub quote: f64,
}

impl Tick {
    /// Start of the 60-second bucket this tick falls into
    pub fn bucket_start(&self) -> i64 {
        self.epoch - self.epoch.rem_euclid(BUCKET_SECONDS)
    }
}

/// OHLCV aggregate over one 60-second bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, unix seconds, aligned to 60-second boundaries
    pub start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Tick count for live candles, provider volume for backfilled ones
    pub volume: f64,
}

impl Candle {
    /// Open a new candle from the first tick of a bucket
    pub fn from_tick(tick: &Tick) -> Self {
        Self {
            start: tick.bucket_start(),
            open: tick.quote,
            high: tick.quote,
            low: tick.quote,
            close: tick.quote,
            volume: 1.0,
        }
    }

    /// Fold another tick from the same bucket into this candle
    pub fn apply_tick(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.quote);
        self.low = self.low.min(tick.quote);
        self.close = tick.quote;
        self.volume += 1.0;
    }

    /// Full high-to-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Absolute open-to-close body size
    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    /// True when the candle closed above its open
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }
}

/// Predicted price direction for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Call,
    Put,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Call => write!(f, "CALL"),
            Direction::Put => write!(f, "PUT"),
        }
    }
}

/// Strategy classification for an instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Classification {
    Wait,
    Watch,
    Ready,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Wait => write!(f, "WAIT"),
            Classification::Watch => write!(f, "WATCH"),
            Classification::Ready => write!(f, "READY"),
        }
    }
}

/// Events emitted by the feed task toward the monitor loop
#[derive(Debug, Clone)]
pub enum FeedEvent {
    /// A live quote arrived for a subscribed instrument
    Tick(Tick),
    /// The streaming connection was (re)established
    Connected,
    /// The streaming connection dropped; a reconnect is scheduled
    Disconnected { reason: Option<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tick(epoch: i64, quote: f64) -> Tick {
        Tick {
            symbol: "frxEURUSD".to_string(),
            epoch,
            quote,
        }
    }

    #[test]
    fn bucket_start_aligns_to_minute() {
        // 1_700_000_040 is divisible by 60
        assert_eq!(tick(1_700_000_040, 1.0).bucket_start(), 1_700_000_040);
        assert_eq!(tick(1_700_000_059, 1.0).bucket_start(), 1_700_000_040);
        assert_eq!(tick(1_700_000_100, 1.0).bucket_start(), 1_700_000_100);
        assert_eq!(tick(1_700_000_159, 1.0).bucket_start(), 1_700_000_100);
    }

    #[test]
    fn candle_folds_ticks() {
        let mut candle = Candle::from_tick(&tick(1_700_000_000, 1.1000));
        candle.apply_tick(&tick(1_700_000_010, 1.1010));
        candle.apply_tick(&tick(1_700_000_020, 1.0990));

        assert_eq!(candle.open, 1.1000);
        assert_eq!(candle.high, 1.1010);
        assert_eq!(candle.low, 1.0990);
        assert_eq!(candle.close, 1.0990);
        assert_eq!(candle.volume, 3.0);
        assert!(!candle.is_bullish());
    }
}
