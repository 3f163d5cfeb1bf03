//! Strategy state and output types

use serde::{Deserialize, Serialize};

use crate::common::types::{Candle, Classification, Direction};

/// Broad market direction derived from the SMA20/SMA50 relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Bullish,
    Bearish,
}

/// Rolling low-volatility zone statistics over the trailing candle window.
///
/// Persists per instrument across analysis calls; the confirmed-breakout
/// flag is only meaningful because the zone survives from one candle close
/// to the next.
#[derive(Debug, Clone)]
pub struct CompressionZone {
    pub high: f64,
    pub low: f64,
    pub volume: f64,
    pub candle_count: usize,
    pub is_compressed: bool,
    pub confirmed_breakout: bool,
    pub breakout_trend: Option<Trend>,
    pub breakout_at_ms: Option<i64>,
}

impl Default for CompressionZone {
    fn default() -> Self {
        Self {
            high: f64::NEG_INFINITY,
            low: f64::INFINITY,
            volume: 0.0,
            candle_count: 0,
            is_compressed: false,
            confirmed_breakout: false,
            breakout_trend: None,
            breakout_at_ms: None,
        }
    }
}

impl CompressionZone {
    /// Zone midpoint price
    pub fn midpoint(&self) -> f64 {
        (self.high + self.low) / 2.0
    }

    /// Zone height in price units
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

/// Adaptive-learning counters per instrument.
///
/// The multiplier feeds back delivered-signal outcomes into future
/// confidence scores; it only activates once enough signals have been
/// evaluated to mean anything.
#[derive(Debug, Clone)]
pub struct AdaptiveStats {
    pub signals_sent: u32,
    pub successful: u32,
    pub evaluated: u32,
    pub confidence_multiplier: f64,
}

impl Default for AdaptiveStats {
    fn default() -> Self {
        Self {
            signals_sent: 0,
            successful: 0,
            evaluated: 0,
            confidence_multiplier: 1.0,
        }
    }
}

impl AdaptiveStats {
    /// Minimum evaluated signals before the multiplier reacts
    const MIN_SAMPLE: u32 = 10;

    pub fn win_rate(&self) -> f64 {
        if self.evaluated == 0 {
            return 0.0;
        }
        f64::from(self.successful) / f64::from(self.evaluated)
    }

    /// Record one evaluated signal outcome
    pub fn record_outcome(&mut self, win: bool) {
        self.evaluated += 1;
        if win {
            self.successful += 1;
        }
    }

    /// Recompute the confidence multiplier from the historical win rate
    pub fn update_multiplier(&mut self) {
        if self.evaluated < Self::MIN_SAMPLE {
            return;
        }
        let win_rate = self.win_rate();
        self.confidence_multiplier = if win_rate > 0.6 {
            1.1
        } else if win_rate < 0.4 {
            0.9
        } else {
            1.0
        };
    }
}

/// The ten boolean setup conditions evaluated per analysis
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConditionSet {
    pub in_compression: bool,
    pub volume_decreasing: bool,
    pub rsi_neutral: bool,
    pub no_recent_fakeout: bool,
    pub potential_breakout: bool,
    pub trend_alignment: bool,
    pub bollinger_squeeze: bool,
    pub macd_alignment: bool,
    pub volume_spike: bool,
    pub atr_low: bool,
}

/// Per-condition scoring weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub in_compression: f64,
    pub volume_decreasing: f64,
    pub rsi_neutral: f64,
    pub no_recent_fakeout: f64,
    pub potential_breakout: f64,
    pub trend_alignment: f64,
    pub bollinger_squeeze: f64,
    pub macd_alignment: f64,
    pub volume_spike: f64,
    pub atr_low: f64,
}

impl Weights {
    /// Base weights for every condition
    pub fn base() -> Self {
        Self {
            in_compression: 20.0,
            volume_decreasing: 15.0,
            rsi_neutral: 10.0,
            no_recent_fakeout: 15.0,
            potential_breakout: 20.0,
            trend_alignment: 10.0,
            bollinger_squeeze: 12.0,
            macd_alignment: 8.0,
            volume_spike: 15.0,
            atr_low: 10.0,
        }
    }

    /// Base weights, with momentum conditions boosted when the latest candle
    /// is unusually large (> 0.5% of price).
    pub fn for_candle(latest: &Candle) -> Self {
        let mut weights = Self::base();
        if latest.low > 0.0 && latest.range() / latest.low > 0.005 {
            weights.volume_spike += 5.0;
            weights.trend_alignment += 5.0;
        }
        weights
    }
}

/// Volume/range measurements of the current compression zone
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionMeasure {
    /// Zone range relative to the zone midpoint
    pub range_ratio: f64,
    /// Relative change of the last-5-candle average volume vs the 5 before
    pub volume_trend: f64,
}

/// Result of the recent-fakeout scan
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeoutMeasure {
    pub has_fakeout: bool,
    pub count: usize,
}

/// Full output of one analysis pass
#[derive(Debug, Clone)]
pub struct Analysis {
    pub state: Classification,
    pub watch_strength: u8,
    /// Rounded confidence, clamped to 0..=95
    pub confidence: i32,
    pub direction: Option<Direction>,
    pub price: f64,
    pub rsi: f64,
    pub sma20: f64,
    pub sma50: f64,
    /// Bollinger band width relative to price
    pub bollinger_width: f64,
    /// ATR as a percentage of price
    pub atr_pct: f64,
    pub macd_histogram: f64,
    pub compression: bool,
    pub fakeout_alert: bool,
    /// Up to three human-readable reasons behind the classification
    pub reasons: Vec<String>,
    /// Estimated minutes until the optimal entry
    pub entry_minutes: u32,
    pub session_filtered: bool,
    pub news_filtered: bool,
}

impl Analysis {
    /// The fixed WAIT result returned when history is too short to analyze
    pub fn insufficient_history() -> Self {
        Self {
            state: Classification::Wait,
            watch_strength: 0,
            confidence: 0,
            direction: None,
            price: 0.0,
            rsi: 50.0,
            sma20: 0.0,
            sma50: 0.0,
            bollinger_width: 0.0,
            atr_pct: 0.0,
            macd_histogram: 0.0,
            compression: false,
            fakeout_alert: false,
            reasons: Vec::new(),
            entry_minutes: 0,
            session_filtered: false,
            news_filtered: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplier_waits_for_sample_size() {
        let mut stats = AdaptiveStats::default();
        for _ in 0..9 {
            stats.record_outcome(true);
        }
        stats.update_multiplier();
        assert_eq!(stats.confidence_multiplier, 1.0);
    }

    #[test]
    fn multiplier_reacts_to_win_rate() {
        let mut stats = AdaptiveStats::default();
        for i in 0..10 {
            stats.record_outcome(i < 7); // 70% win rate
        }
        stats.update_multiplier();
        assert_eq!(stats.confidence_multiplier, 1.1);

        let mut losing = AdaptiveStats::default();
        for i in 0..10 {
            losing.record_outcome(i < 3); // 30% win rate
        }
        losing.update_multiplier();
        assert_eq!(losing.confidence_multiplier, 0.9);

        let mut middling = AdaptiveStats::default();
        for i in 0..10 {
            middling.record_outcome(i < 5);
        }
        middling.update_multiplier();
        assert_eq!(middling.confidence_multiplier, 1.0);
    }

    #[test]
    fn boosted_weights_require_large_candle() {
        let small = Candle {
            start: 0,
            open: 1.1000,
            high: 1.1002,
            low: 1.0999,
            close: 1.1001,
            volume: 5.0,
        };
        assert_eq!(Weights::for_candle(&small), Weights::base());

        let large = Candle {
            start: 0,
            open: 1.1000,
            high: 1.1080,
            low: 1.1000,
            close: 1.1075,
            volume: 50.0,
        };
        let boosted = Weights::for_candle(&large);
        assert_eq!(boosted.volume_spike, Weights::base().volume_spike + 5.0);
        assert_eq!(boosted.trend_alignment, Weights::base().trend_alignment + 5.0);
    }
}
