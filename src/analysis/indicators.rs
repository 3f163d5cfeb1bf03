//! Technical indicator library
//!
//! Stateless numeric functions over candle slices. Callers pass the window
//! they care about (usually a trailing slice of an instrument's history);
//! nothing here keeps state between calls.

use crate::common::types::Candle;

/// Bollinger band values for a window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bollinger {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl Bollinger {
    /// Band width relative to a reference price
    pub fn width_ratio(&self, price: f64) -> f64 {
        if price == 0.0 {
            return 0.0;
        }
        (self.upper - self.lower) / price
    }
}

/// MACD line, signal line and histogram
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Arithmetic mean of closes over the given slice
pub fn sma(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(|c| c.close).sum::<f64>() / candles.len() as f64
}

/// Exponential moving average of closes
///
/// Seeded with the SMA of the first `period` closes, then the standard
/// recurrence with multiplier 2/(period+1). Falls back to a plain SMA when
/// the slice is shorter than `period`.
pub fn ema(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period {
        return sma(candles);
    }

    let mut value = sma(&candles[..period]);
    let multiplier = 2.0 / (period as f64 + 1.0);

    for candle in &candles[period..] {
        value = (candle.close - value) * multiplier + value;
    }

    value
}

/// Relative strength index over the trailing `period + 1` candles
///
/// Uses simple averaging of the positive and negative close deltas (not
/// Wilder smoothing). Returns a neutral 50 when fewer than `period + 1`
/// candles are available, 100 when there are no losses and 0 when there are
/// no gains.
pub fn rsi(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 50.0;
    }

    let window = &candles[candles.len() - (period + 1)..];
    let mut gains = 0.0;
    let mut losses = 0.0;

    for pair in window.windows(2) {
        let change = pair[1].close - pair[0].close;
        if change > 0.0 {
            gains += change;
        } else {
            losses -= change;
        }
    }

    let avg_gain = gains / period as f64;
    let avg_loss = losses / period as f64;

    if avg_loss == 0.0 {
        return 100.0;
    }
    if avg_gain == 0.0 {
        return 0.0;
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

/// Average true range over the trailing window
///
/// True range is the maximum of high−low, |high−prev close| and
/// |low−prev close|. Returns 0 when fewer than `period + 1` candles are
/// available.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if candles.len() < period + 1 {
        return 0.0;
    }

    let start = std::cmp::max(1, candles.len() - period - 1);
    let mut ranges = Vec::with_capacity(candles.len() - start);

    for i in start..candles.len() {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        ranges.push(tr);
    }

    ranges.iter().sum::<f64>() / ranges.len() as f64
}

/// Bollinger bands: SMA ± k standard deviations over the trailing window
pub fn bollinger(candles: &[Candle], period: usize, k: f64) -> Bollinger {
    if candles.len() < period {
        return Bollinger {
            upper: 0.0,
            middle: 0.0,
            lower: 0.0,
        };
    }

    let window = &candles[candles.len() - period..];
    let middle = sma(window);

    let variance = window
        .iter()
        .map(|c| (c.close - middle).powi(2))
        .sum::<f64>()
        / period as f64;
    let std_dev = variance.sqrt();

    Bollinger {
        upper: middle + k * std_dev,
        middle,
        lower: middle - k * std_dev,
    }
}

/// MACD(12, 26) with a 9-period signal line
///
/// The signal line is approximated by recomputing the MACD value on nine
/// successively trimmed trailing windows and taking the EMA(9) of that short
/// synthetic series, rather than maintaining an incremental MACD history.
pub fn macd(candles: &[Candle]) -> Macd {
    if candles.len() < 26 {
        return Macd {
            macd: 0.0,
            signal: 0.0,
            histogram: 0.0,
        };
    }

    let macd_value = ema(candles, 12) - ema(candles, 26);

    let mut synthetic = Vec::with_capacity(9);
    for i in 0..9 {
        let end = candles.len() - i;
        let start = candles.len().saturating_sub(26 + i);
        let window = &candles[start..end];

        if window.len() >= 26 {
            let value = ema(window, 12) - ema(window, 26);
            synthetic.push(Candle {
                start: 0,
                open: value,
                high: value,
                low: value,
                close: value,
                volume: 0.0,
            });
        }
    }

    let signal = if synthetic.len() >= 9 {
        ema(&synthetic, 9)
    } else {
        macd_value
    };

    Macd {
        macd: macd_value,
        signal,
        histogram: macd_value - signal,
    }
}
