//! Per-instrument strategy evaluation
//!
//! Detects volatility compression, breakouts and fakeouts over the rolling
//! candle history, scores ten weighted setup conditions, and walks the
//! WAIT → WATCH → READY state machine. All mutable strategy state
//! (compression zone, adaptive counters) lives on the `InstrumentState`, so
//! repeated calls see the zone and learning history they left behind.

use tracing::debug;

use crate::analysis::indicators::{atr, bollinger, macd, rsi, sma, Bollinger, Macd};
use crate::common::types::{Candle, Classification, Direction};
use crate::market::store::InstrumentState;

use super::scoring::{score, strong_watch_score, watch_score};
use super::types::{
    Analysis, CompressionMeasure, CompressionZone, ConditionSet, FakeoutMeasure, Trend, Weights,
};

/// Minimum sealed candles before any analysis is attempted
pub const MIN_CANDLES: usize = 50;
/// Candles spanned by the compression zone
const ZONE_SPAN: usize = 20;
/// Confidence bonus when the strong-watch escalation holds
const STRONG_WATCH_BONUS: f64 = 15.0;
/// Confidence bonus on reaching READY
const READY_BONUS: f64 = 20.0;
/// Hard ceiling on reported confidence
const CONFIDENCE_CAP: f64 = 95.0;

/// Stateless evaluator; per-instrument strategy state lives on the
/// instrument itself.
#[derive(Debug, Default)]
pub struct StrategyEngine;

impl StrategyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run one full analysis pass over an instrument.
    ///
    /// Requires at least [`MIN_CANDLES`] sealed candles; otherwise the fixed
    /// `{WAIT, 0}` result is returned regardless of any other input.
    pub fn analyze(&self, state: &mut InstrumentState, now_ms: i64) -> Analysis {
        if state.candle_count() < MIN_CANDLES {
            return Analysis::insufficient_history();
        }

        state.adaptive.update_multiplier();
        let multiplier = state.adaptive.confidence_multiplier;

        // Split the history into the breakout probe (latest candle) and the
        // zone window that precedes it: a close can only "exit" a zone that
        // was established without it.
        let snapshot = compute_zone(state.candles());
        apply_zone(&mut state.zone, snapshot, now_ms);
        let zone = state.zone.clone();

        let candles = state.candles();
        let latest = candles[candles.len() - 1].clone();
        let previous = candles[candles.len() - 2].clone();

        let rsi14 = rsi(candles, 14);
        let sma20 = sma(&candles[candles.len() - 20..]);
        let sma50 = sma(&candles[candles.len() - 50..]);
        let bands = bollinger(candles, 20, 2.0);
        let macd_values = macd(candles);
        let atr14 = atr(candles, 14);

        let last_price = latest.close;
        let primary_trend = if sma20 > sma50 {
            Trend::Bullish
        } else {
            Trend::Bearish
        };

        let compression = measure_compression(&zone, candles);
        let fakeout = detect_fakeout(&candles[candles.len() - 10..]);

        let conditions = ConditionSet {
            in_compression: zone.is_compressed && compression.range_ratio < 0.005,
            volume_decreasing: compression.volume_trend < -0.2,
            rsi_neutral: rsi14 > 45.0 && rsi14 < 55.0,
            no_recent_fakeout: !fakeout.has_fakeout,
            potential_breakout: check_potential_breakout(&zone, &latest, &previous, &bands),
            trend_alignment: check_trend_alignment(&latest, primary_trend, &macd_values),
            bollinger_squeeze: (bands.upper - bands.lower) / last_price < 0.01,
            macd_alignment: match primary_trend {
                Trend::Bullish => macd_values.histogram > 0.0,
                Trend::Bearish => macd_values.histogram < 0.0,
            },
            volume_spike: latest.volume
                > average_volume(&candles[candles.len() - 10..]) * 1.5,
            atr_low: atr14 / last_price < 0.001,
        };

        let weights = Weights::for_candle(&latest);
        let raw_confidence = score(&conditions, &weights);
        let mut confidence = raw_confidence * multiplier;

        let mut classification = Classification::Wait;
        let mut watch_strength: u8 = 0;

        let watch = watch_score(&conditions);
        let strong_watch = strong_watch_score(&conditions);

        if watch >= 3 {
            classification = Classification::Watch;
            watch_strength = 1;
            if strong_watch >= 2 && watch >= 4 {
                watch_strength = 2;
                confidence += STRONG_WATCH_BONUS;
            }
        }

        let ready_checks = [
            zone.confirmed_breakout,
            conditions.potential_breakout,
            conditions.trend_alignment,
            conditions.volume_spike,
            check_breakout_confirmation(&zone, &latest, &previous, &bands),
        ];
        let ready = ready_checks.iter().filter(|&&held| held).count();

        if ready >= 4 && watch_strength >= 1 {
            classification = Classification::Ready;
            confidence = (confidence + READY_BONUS).min(CONFIDENCE_CAP);
        }

        // A READY verdict without at least watch standing is not trusted.
        if classification == Classification::Ready && watch_strength < 1 {
            classification = Classification::Watch;
            confidence -= 10.0;
        }

        let news_filtered = state.high_impact_news;
        if news_filtered {
            classification = Classification::Wait;
            confidence *= 0.7;
        }

        let session_filtered = !state.active_session;
        if session_filtered {
            confidence *= 0.8;
        }

        let direction = resolve_direction(&zone, &latest, &previous, primary_trend, &bands);

        let analysis = Analysis {
            state: classification,
            watch_strength,
            confidence: confidence.round().clamp(0.0, CONFIDENCE_CAP) as i32,
            direction,
            price: last_price,
            rsi: rsi14,
            sma20,
            sma50,
            bollinger_width: bands.width_ratio(last_price),
            atr_pct: atr14 / last_price * 100.0,
            macd_histogram: macd_values.histogram,
            compression: zone.is_compressed,
            fakeout_alert: fakeout.has_fakeout,
            reasons: build_reasons(&conditions, &compression, &fakeout, &zone),
            entry_minutes: entry_minutes(classification, now_ms),
            session_filtered,
            news_filtered,
        };

        debug!(
            symbol = %state.instrument.symbol,
            state = %analysis.state,
            confidence = analysis.confidence,
            "analysis complete"
        );

        analysis
    }
}

/// Fresh zone statistics computed from one analysis pass
struct ZoneSnapshot {
    high: f64,
    low: f64,
    volume: f64,
    candle_count: usize,
    is_compressed: bool,
    /// Direction of a breakout the latest close just made, if any
    breakout: Option<Trend>,
}

/// Measure the 20 candles preceding the latest one and test the latest
/// close against their bounds: a close can only exit a zone it was not part
/// of.
fn compute_zone(candles: &[Candle]) -> Option<ZoneSnapshot> {
    if candles.len() < ZONE_SPAN + 1 {
        return None;
    }

    let latest = &candles[candles.len() - 1];
    let window = &candles[candles.len() - 1 - ZONE_SPAN..candles.len() - 1];

    let mut high = f64::NEG_INFINITY;
    let mut low = f64::INFINITY;
    let mut total_volume = 0.0;
    let mut total_range = 0.0;

    for candle in window {
        high = high.max(candle.high);
        low = low.min(candle.low);
        total_volume += candle.volume;
        total_range += candle.range();
    }

    let avg_range = total_range / window.len() as f64;
    let range_ratio = if low > 0.0 { (high - low) / low } else { 0.0 };
    let is_compressed =
        range_ratio < 0.008 && avg_range < ((high - low) / ZONE_SPAN as f64) * 0.6;

    let breakout = if is_compressed && latest.close > high {
        Some(Trend::Bullish)
    } else if is_compressed && latest.close < low {
        Some(Trend::Bearish)
    } else {
        None
    };

    Some(ZoneSnapshot {
        high,
        low,
        volume: total_volume,
        candle_count: window.len(),
        is_compressed,
        breakout,
    })
}

/// Fold a snapshot into the persistent zone. A confirmed breakout sticks
/// while the zone stays compressed and clears when compression ends.
fn apply_zone(zone: &mut CompressionZone, snapshot: Option<ZoneSnapshot>, now_ms: i64) {
    let snapshot = match snapshot {
        Some(snapshot) => snapshot,
        None => return,
    };

    zone.high = snapshot.high;
    zone.low = snapshot.low;
    zone.volume = snapshot.volume;
    zone.candle_count = snapshot.candle_count;
    zone.is_compressed = snapshot.is_compressed;

    if snapshot.is_compressed {
        if let Some(trend) = snapshot.breakout {
            zone.confirmed_breakout = true;
            zone.breakout_trend = Some(trend);
            zone.breakout_at_ms = Some(now_ms);
        }
    } else {
        zone.confirmed_breakout = false;
        zone.breakout_trend = None;
    }
}

/// Range ratio of the zone plus the recent volume trend (average of the last
/// 5 candles vs the 5 before them)
fn measure_compression(zone: &CompressionZone, candles: &[Candle]) -> CompressionMeasure {
    let midpoint = zone.midpoint();
    let range_ratio = if midpoint > 0.0 && midpoint.is_finite() {
        zone.range() / midpoint
    } else {
        0.0
    };

    if candles.len() < 10 {
        return CompressionMeasure {
            range_ratio,
            volume_trend: 0.0,
        };
    }

    let older = &candles[candles.len() - 10..candles.len() - 5];
    let newer = &candles[candles.len() - 5..];
    let older_avg = older.iter().map(|c| c.volume).sum::<f64>() / 5.0;
    let newer_avg = newer.iter().map(|c| c.volume).sum::<f64>() / 5.0;

    let volume_trend = if older_avg > 0.0 {
        (newer_avg - older_avg) / older_avg
    } else {
        0.0
    };

    CompressionMeasure {
        range_ratio,
        volume_trend,
    }
}

/// Count range exits that immediately reverted over the recent window
fn detect_fakeout(recent: &[Candle]) -> FakeoutMeasure {
    if recent.len() < 5 {
        return FakeoutMeasure::default();
    }

    let mut count = 0;
    for i in 1..recent.len() - 1 {
        let prev = &recent[i - 1];
        let current = &recent[i];
        let next = &recent[i + 1];

        let false_break_up = current.close > prev.high && next.close < prev.high;
        let false_break_down = current.close < prev.low && next.close > prev.low;
        if false_break_up || false_break_down {
            count += 1;
        }
    }

    FakeoutMeasure {
        has_fakeout: count > 0,
        count,
    }
}

/// A strong candle pushing against the zone edge on rising volume
fn check_potential_breakout(
    zone: &CompressionZone,
    current: &Candle,
    previous: &Candle,
    bands: &Bollinger,
) -> bool {
    if !zone.is_compressed || zone.range() <= 0.0 {
        return false;
    }

    let position = (current.close - zone.low) / zone.range();
    let near_edge = position > 0.7 || position < 0.3;
    let rising_volume = current.volume > previous.volume * 1.2;
    let closing_strong = current.body() > current.range() * 0.6;
    let near_band = current.close > bands.upper * 0.98 || current.close < bands.lower * 1.02;

    near_edge && rising_volume && closing_strong && near_band
}

/// A decisive candle agreeing with the primary trend and MACD
fn check_trend_alignment(candle: &Candle, trend: Trend, macd_values: &Macd) -> bool {
    if candle.range() <= 0.0 {
        return false;
    }
    let strength = candle.body() / candle.range();

    match trend {
        Trend::Bullish => {
            candle.is_bullish() && strength > 0.4 && macd_values.histogram > -0.0001
        }
        Trend::Bearish => {
            !candle.is_bullish() && strength > 0.4 && macd_values.histogram < 0.0001
        }
    }
}

/// The breakout candle itself holding beyond the zone with volume behind it
fn check_breakout_confirmation(
    zone: &CompressionZone,
    current: &Candle,
    previous: &Candle,
    bands: &Bollinger,
) -> bool {
    if !zone.confirmed_breakout {
        return false;
    }

    match zone.breakout_trend {
        Some(Trend::Bullish) => {
            current.close > zone.high
                && current.is_bullish()
                && current.volume > previous.volume
                && current.close > bands.middle
        }
        Some(Trend::Bearish) => {
            current.close < zone.low
                && !current.is_bullish()
                && current.volume > previous.volume
                && current.close < bands.middle
        }
        None => false,
    }
}

fn average_volume(candles: &[Candle]) -> f64 {
    if candles.is_empty() {
        return 0.0;
    }
    candles.iter().map(|c| c.volume).sum::<f64>() / candles.len() as f64
}

/// Resolve the alert direction with fixed priority: confirmed breakout
/// direction, then zone-midpoint side (only with a live potential breakout),
/// then the primary trend. A compressed zone with no breakout pressure
/// resolves nothing.
fn resolve_direction(
    zone: &CompressionZone,
    latest: &Candle,
    previous: &Candle,
    trend: Trend,
    bands: &Bollinger,
) -> Option<Direction> {
    if zone.confirmed_breakout {
        return zone.breakout_trend.map(|t| match t {
            Trend::Bullish => Direction::Call,
            Trend::Bearish => Direction::Put,
        });
    }

    if zone.is_compressed {
        if check_potential_breakout(zone, latest, previous, bands) {
            return Some(if latest.close > zone.midpoint() {
                Direction::Call
            } else {
                Direction::Put
            });
        }
        return None;
    }

    match trend {
        Trend::Bullish => Some(Direction::Call),
        Trend::Bearish => Some(Direction::Put),
    }
}

/// Minutes until the next candle boundary; WATCH adds one more candle of
/// patience, WAIT reports no entry at all.
fn entry_minutes(classification: Classification, now_ms: i64) -> u32 {
    let seconds_into_minute = (now_ms / 1000).rem_euclid(60);
    let to_boundary = ((60 - seconds_into_minute) as f64 / 60.0).ceil() as u32;

    match classification {
        Classification::Wait => 0,
        Classification::Ready => to_boundary.max(1),
        Classification::Watch => to_boundary.max(1) + 1,
    }
}

fn build_reasons(
    conditions: &ConditionSet,
    compression: &CompressionMeasure,
    fakeout: &FakeoutMeasure,
    zone: &CompressionZone,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if conditions.in_compression {
        reasons.push(format!(
            "tight compression (range {:.2}%)",
            compression.range_ratio * 100.0
        ));
    }
    if conditions.volume_decreasing {
        reasons.push("volume fading ahead of a break".to_string());
    }
    if conditions.no_recent_fakeout && fakeout.count == 0 {
        reasons.push("no recent fakeouts".to_string());
    }
    if conditions.bollinger_squeeze {
        reasons.push("Bollinger bands squeezed".to_string());
    }
    if conditions.potential_breakout {
        reasons.push("strong potential-breakout signals".to_string());
    }
    if conditions.macd_alignment {
        reasons.push("MACD agrees with the trend".to_string());
    }
    if zone.confirmed_breakout {
        let side = match zone.breakout_trend {
            Some(Trend::Bullish) => "bullish",
            _ => "bearish",
        };
        reasons.push(format!("confirmed {side} breakout"));
    }

    reasons.truncate(3);
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Instrument, Tick};

    fn instrument() -> Instrument {
        Instrument {
            symbol: "frxEURUSD".to_string(),
            display_name: "EUR/USD".to_string(),
            market: "forex".to_string(),
            pip: 0.0001,
        }
    }

    fn candle(start: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            start,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    fn flat_candle(index: i64, price: f64, volume: f64) -> Candle {
        candle(
            index * 60,
            price,
            price + 0.00001,
            price - 0.00001,
            price,
            volume,
        )
    }

    /// 50 flat candles followed by a tight ascending zone and a decisive
    /// breakout candle: the canonical READY setup.
    fn breakout_history() -> Vec<Candle> {
        let mut candles = Vec::new();

        // 0..29: quiet base well below the zone, establishes SMA50 < SMA20
        for i in 0..30 {
            candles.push(flat_candle(i, 1.0990, 80.0));
        }

        // 30..39: drift up across the zone on tiny ranges
        for i in 0..10 {
            let close = 1.10000 + i as f64 * 0.00011;
            candles.push(flat_candle(30 + i as i64, close, 80.0));
        }

        // 40..49: flat consolidation, no fakeouts, volume drying up
        for i in 0..10 {
            let volume = if i < 6 { 100.0 } else { 40.0 };
            candles.push(flat_candle(40 + i as i64, 1.10060, volume));
        }

        // 50: breakout above the zone high on a volume spike
        candles.push(candle(50 * 60, 1.10021, 1.10141, 1.10020, 1.10140, 150.0));

        candles
    }

    fn analyzed_state(candles: Vec<Candle>) -> (InstrumentState, Analysis) {
        let engine = StrategyEngine::new();
        let mut state = InstrumentState::new(instrument());
        state.set_history(candles);
        state.active_session = true;
        let analysis = engine.analyze(&mut state, 1_700_000_000_000);
        (state, analysis)
    }

    #[test]
    fn short_history_always_waits() {
        let engine = StrategyEngine::new();
        let mut state = InstrumentState::new(instrument());
        for i in 0..49 {
            state.update_candle(&Tick {
                symbol: "frxEURUSD".to_string(),
                epoch: 1_700_000_000 + i * 60,
                quote: 1.1 + i as f64 * 0.01,
            });
        }
        state.active_session = true;

        let analysis = engine.analyze(&mut state, 1_700_000_000_000);
        assert_eq!(analysis.state, Classification::Wait);
        assert_eq!(analysis.confidence, 0);
    }

    #[test]
    fn compressed_breakout_reaches_ready() {
        let (state, analysis) = analyzed_state(breakout_history());

        assert!(state.zone.is_compressed, "zone should be compressed");
        assert!(state.zone.confirmed_breakout, "breakout should be confirmed");
        assert_eq!(state.zone.breakout_trend, Some(Trend::Bullish));
        assert_eq!(analysis.state, Classification::Ready);
        assert_eq!(analysis.direction, Some(Direction::Call));
        assert!(
            analysis.confidence >= 75,
            "confidence {} below signal threshold",
            analysis.confidence
        );
        assert!(analysis.confidence <= 95);
        assert!(!analysis.reasons.is_empty());
        assert!(analysis.reasons.len() <= 3);
    }

    #[test]
    fn news_filter_forces_wait() {
        let engine = StrategyEngine::new();
        let mut state = InstrumentState::new(instrument());
        state.set_history(breakout_history());
        state.active_session = true;
        state.high_impact_news = true;

        let analysis = engine.analyze(&mut state, 1_700_000_000_000);
        assert_eq!(analysis.state, Classification::Wait);
        assert!(analysis.news_filtered);
    }

    #[test]
    fn session_filter_scales_confidence_without_forcing_wait() {
        let (_, active) = analyzed_state(breakout_history());

        let engine = StrategyEngine::new();
        let mut state = InstrumentState::new(instrument());
        state.set_history(breakout_history());
        state.active_session = false;
        let off_session = engine.analyze(&mut state, 1_700_000_000_000);

        assert_eq!(off_session.state, active.state);
        assert!(off_session.session_filtered);
        assert!(off_session.confidence <= active.confidence);
    }

    #[test]
    fn flat_market_stays_quiet() {
        let candles: Vec<Candle> = (0..60).map(|i| flat_candle(i, 1.1, 50.0)).collect();
        let (_, analysis) = analyzed_state(candles);
        assert_ne!(analysis.state, Classification::Ready);
    }

    #[test]
    fn adaptive_multiplier_scales_confidence() {
        let engine = StrategyEngine::new();

        let mut boosted = InstrumentState::new(instrument());
        boosted.set_history(breakout_history());
        boosted.active_session = true;
        for i in 0..10 {
            boosted.adaptive.record_outcome(i < 7);
        }
        let with_boost = engine.analyze(&mut boosted, 1_700_000_000_000);

        let mut dampened = InstrumentState::new(instrument());
        dampened.set_history(breakout_history());
        dampened.active_session = true;
        for i in 0..10 {
            dampened.adaptive.record_outcome(i < 3);
        }
        let with_damp = engine.analyze(&mut dampened, 1_700_000_000_000);

        assert_eq!(boosted.adaptive.confidence_multiplier, 1.1);
        assert_eq!(dampened.adaptive.confidence_multiplier, 0.9);
        assert!(with_damp.confidence <= with_boost.confidence);
    }

    #[test]
    fn fakeout_detection_finds_reverted_exit() {
        let mut recent = vec![
            candle(0, 1.1000, 1.1005, 1.0995, 1.1000, 10.0),
            // exit above previous high...
            candle(60, 1.1000, 1.1011, 1.0999, 1.1010, 12.0),
            // ...and straight back below it
            candle(120, 1.1010, 1.1011, 1.0998, 1.0999, 9.0),
            candle(180, 1.0999, 1.1002, 1.0996, 1.1000, 10.0),
            candle(240, 1.1000, 1.1003, 1.0997, 1.1001, 10.0),
        ];
        assert!(detect_fakeout(&recent).has_fakeout);

        // remove the reversion and the pattern disappears
        recent[2] = candle(120, 1.1010, 1.1015, 1.1008, 1.1012, 9.0);
        assert!(!detect_fakeout(&recent).has_fakeout);
    }
}
