//! Signal dispatch: hashing, suppression and delayed self-evaluation
//!
//! Sits between the strategy engine and the notifier. A READY analysis only
//! becomes an outbound alert after the dispatcher has fingerprinted it,
//! checked it against the instrument's recent signal history and confirmed
//! the preceding candle does not contradict the direction.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::common::types::{Candle, Direction};
use crate::feed::FeedClient;
use crate::market::store::InstrumentState;
use crate::strategy::types::Analysis;

/// Price move (relative) that decides a win at evaluation time
const EVALUATION_THRESHOLD: f64 = 0.001;
/// Candle body fraction that makes the previous candle a hard counter-signal
const COUNTER_BODY_RATIO: f64 = 0.7;

/// An accepted, deliverable signal
#[derive(Debug, Clone)]
pub struct Signal {
    pub symbol: String,
    pub direction: Direction,
    pub confidence: i32,
    pub hash: String,
    pub entry_price: f64,
    pub created_ms: i64,
}

/// Why a READY analysis did or did not become a signal
#[derive(Debug)]
pub enum DispatchDecision {
    /// Hand off to the notifier
    Deliver(Signal),
    /// Identical hash already sent for this instrument inside the window
    DuplicateHash,
    /// Instrument is still inside its notification cooldown
    CoolingDown,
    /// The previous candle shows a strong counter-directional body;
    /// counted as a false positive
    CounterCandle,
    /// The analysis resolved no direction to trade
    NoDirection,
}

/// Outcome of the delayed self-evaluation of one delivered signal
#[derive(Debug, Clone)]
pub struct EvaluationResult {
    pub symbol: String,
    pub direction: Direction,
    pub win: bool,
}

/// Signal gatekeeper. Holds only configuration; per-instrument bookkeeping
/// lives on the instrument state it inspects.
#[derive(Debug)]
pub struct SignalDispatcher {
    /// Window in which an identical hash is suppressed, millis
    repeat_window_ms: i64,
    /// Per-instrument cooldown applied after a delivery, millis
    cooldown_ms: i64,
}

impl SignalDispatcher {
    pub fn new(repeat_window_ms: i64, cooldown_ms: i64) -> Self {
        Self {
            repeat_window_ms,
            cooldown_ms,
        }
    }

    /// Decide whether a READY analysis becomes a deliverable signal.
    ///
    /// The caller has already checked classification and the confidence
    /// threshold; this applies the dedup, cooldown and counter-candle
    /// filters.
    pub fn evaluate(
        &self,
        state: &InstrumentState,
        analysis: &Analysis,
        now_ms: i64,
    ) -> DispatchDecision {
        let direction = match analysis.direction {
            Some(direction) => direction,
            None => return DispatchDecision::NoDirection,
        };

        let hash = signal_hash(state, analysis);

        if state.last_signal_hash.as_deref() == Some(hash.as_str())
            && now_ms - state.last_signal_ms < self.repeat_window_ms
        {
            return DispatchDecision::DuplicateHash;
        }

        if now_ms < state.cooldown_until_ms {
            return DispatchDecision::CoolingDown;
        }

        if !confirmed_by_previous_candle(state.candles(), direction) {
            return DispatchDecision::CounterCandle;
        }

        DispatchDecision::Deliver(Signal {
            symbol: state.instrument.symbol.clone(),
            direction,
            confidence: analysis.confidence,
            hash,
            entry_price: analysis.price,
            created_ms: now_ms,
        })
    }

    /// Record a successful delivery on the instrument: hash, timestamps,
    /// cooldown and the sent counter feeding the adaptive stats.
    pub fn record_delivery(&self, state: &mut InstrumentState, signal: &Signal, now_ms: i64) {
        state.last_signal_hash = Some(signal.hash.clone());
        state.last_signal_ms = now_ms;
        state.cooldown_until_ms = now_ms + self.cooldown_ms;
        state.adaptive.signals_sent += 1;
    }
}

/// Deterministic signal fingerprint: instrument, direction, rounded
/// confidence, a digest of the last three candles' body direction and size,
/// and the watch strength.
pub fn signal_hash(state: &InstrumentState, analysis: &Analysis) -> String {
    let candles = state.candles();
    let tail = &candles[candles.len().saturating_sub(3)..];

    let pattern: Vec<String> = tail
        .iter()
        .map(|candle| {
            let side = if candle.is_bullish() { 'B' } else { 'S' };
            let size_permille = if candle.low > 0.0 {
                (candle.range() / candle.low * 1000.0).round() as i64
            } else {
                0
            };
            format!("{side}{size_permille}")
        })
        .collect();

    let direction = analysis
        .direction
        .map(|d| d.to_string())
        .unwrap_or_else(|| "NONE".to_string());

    let seed = format!(
        "{}|{}|{}|{}|{}",
        state.instrument.symbol,
        direction,
        analysis.confidence,
        pattern.join("-"),
        analysis.watch_strength
    );

    let digest = Sha256::digest(seed.as_bytes());
    hex::encode(&digest[..8])
}

/// The alert direction must not be contradicted by a strong opposite body on
/// the candle immediately before the breakout candle.
fn confirmed_by_previous_candle(candles: &[Candle], direction: Direction) -> bool {
    if candles.len() < 3 {
        return false;
    }
    let previous = &candles[candles.len() - 2];
    if previous.range() <= 0.0 {
        return true;
    }

    let strong_body = previous.body() >= previous.range() * COUNTER_BODY_RATIO;
    match direction {
        Direction::Call => !(strong_body && !previous.is_bullish()),
        Direction::Put => !(strong_body && previous.is_bullish()),
    }
}

/// Schedule the delayed outcome check for a delivered signal.
///
/// After `delay`, fetches a fresh quote through the one-shot probe (which
/// releases its subscription on every path and is guarded by its own safety
/// timeout) and classifies the move against the entry price. Errors are
/// logged and skipped; they never reach the monitor loop.
pub fn spawn_evaluation(
    feed: FeedClient,
    signal: Signal,
    delay: Duration,
    results: mpsc::Sender<EvaluationResult>,
) {
    tokio::spawn(async move {
        sleep(delay).await;

        match feed.latest_price(&signal.symbol).await {
            Ok(price) if price > 0.0 => {
                let win = match signal.direction {
                    Direction::Call => price > signal.entry_price * (1.0 + EVALUATION_THRESHOLD),
                    Direction::Put => price < signal.entry_price * (1.0 - EVALUATION_THRESHOLD),
                };
                info!(
                    symbol = %signal.symbol,
                    direction = %signal.direction,
                    outcome = if win { "win" } else { "loss" },
                    "signal evaluation"
                );
                let _ = results
                    .send(EvaluationResult {
                        symbol: signal.symbol,
                        direction: signal.direction,
                        win,
                    })
                    .await;
            }
            Ok(_) => {
                warn!(symbol = %signal.symbol, "evaluation price probe returned no quote");
            }
            Err(e) => {
                // Skip the statistics update entirely on probe failure.
                warn!(symbol = %signal.symbol, "signal evaluation failed: {e}");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Classification, Instrument};

    fn instrument() -> Instrument {
        Instrument {
            symbol: "frxEURUSD".to_string(),
            display_name: "EUR/USD".to_string(),
            market: "forex".to_string(),
            pip: 0.0001,
        }
    }

    fn candle(open: f64, close: f64) -> Candle {
        let high = open.max(close) + 0.0001;
        let low = open.min(close) - 0.0001;
        Candle {
            start: 0,
            open,
            high,
            low,
            close,
            volume: 10.0,
        }
    }

    fn ready_analysis(direction: Option<Direction>, confidence: i32) -> Analysis {
        Analysis {
            state: Classification::Ready,
            direction,
            confidence,
            ..Analysis::insufficient_history()
        }
    }

    fn state_with_candles(candles: Vec<Candle>) -> InstrumentState {
        let mut state = InstrumentState::new(instrument());
        state.set_history(candles);
        state
    }

    fn neutral_candles() -> Vec<Candle> {
        vec![
            candle(1.1000, 1.1001),
            candle(1.1001, 1.1002),
            candle(1.1002, 1.1010),
        ]
    }

    #[test]
    fn hash_is_deterministic() {
        let state = state_with_candles(neutral_candles());
        let analysis = ready_analysis(Some(Direction::Call), 80);
        assert_eq!(signal_hash(&state, &analysis), signal_hash(&state, &analysis));
    }

    #[test]
    fn hash_differs_across_direction_and_confidence() {
        let state = state_with_candles(neutral_candles());
        let call = ready_analysis(Some(Direction::Call), 80);
        let put = ready_analysis(Some(Direction::Put), 80);
        let weaker = ready_analysis(Some(Direction::Call), 79);

        assert_ne!(signal_hash(&state, &call), signal_hash(&state, &put));
        assert_ne!(signal_hash(&state, &call), signal_hash(&state, &weaker));
    }

    #[test]
    fn accepts_clean_signal() {
        let dispatcher = SignalDispatcher::new(2 * 3_600_000, 30 * 60_000);
        let state = state_with_candles(neutral_candles());
        let analysis = ready_analysis(Some(Direction::Call), 82);

        match dispatcher.evaluate(&state, &analysis, 1_000_000) {
            DispatchDecision::Deliver(signal) => {
                assert_eq!(signal.direction, Direction::Call);
                assert_eq!(signal.confidence, 82);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_hash_suppressed_within_window() {
        let dispatcher = SignalDispatcher::new(2 * 3_600_000, 30 * 60_000);
        let mut state = state_with_candles(neutral_candles());
        let analysis = ready_analysis(Some(Direction::Call), 82);

        let signal = match dispatcher.evaluate(&state, &analysis, 1_000_000) {
            DispatchDecision::Deliver(signal) => signal,
            other => panic!("expected delivery, got {other:?}"),
        };
        dispatcher.record_delivery(&mut state, &signal, 1_000_000);

        // identical analysis one hour later: suppressed
        let one_hour = 1_000_000 + 3_600_000;
        assert!(matches!(
            dispatcher.evaluate(&state, &analysis, one_hour),
            DispatchDecision::DuplicateHash
        ));

        // past the 2-hour window the same hash may fire again (cooldown has
        // also lapsed by then)
        let past_window = 1_000_000 + 2 * 3_600_000 + 1;
        assert!(matches!(
            dispatcher.evaluate(&state, &analysis, past_window),
            DispatchDecision::Deliver(_)
        ));
    }

    #[test]
    fn cooldown_suppresses_different_hash() {
        let dispatcher = SignalDispatcher::new(2 * 3_600_000, 30 * 60_000);
        let mut state = state_with_candles(neutral_candles());
        let first = ready_analysis(Some(Direction::Call), 82);

        let signal = match dispatcher.evaluate(&state, &first, 1_000_000) {
            DispatchDecision::Deliver(signal) => signal,
            other => panic!("expected delivery, got {other:?}"),
        };
        dispatcher.record_delivery(&mut state, &signal, 1_000_000);

        // different confidence -> different hash, still inside cooldown
        let second = ready_analysis(Some(Direction::Call), 90);
        let ten_minutes = 1_000_000 + 10 * 60_000;
        assert!(matches!(
            dispatcher.evaluate(&state, &second, ten_minutes),
            DispatchDecision::CoolingDown
        ));
    }

    #[test]
    fn strong_counter_candle_rejects_signal() {
        let dispatcher = SignalDispatcher::new(2 * 3_600_000, 30 * 60_000);
        // previous candle: large bearish body (body ~0.0009 of range ~0.0011)
        let candles = vec![
            candle(1.1000, 1.1001),
            candle(1.1010, 1.1001),
            candle(1.1001, 1.1012),
        ];
        let state = state_with_candles(candles);
        let analysis = ready_analysis(Some(Direction::Call), 85);

        assert!(matches!(
            dispatcher.evaluate(&state, &analysis, 1_000_000),
            DispatchDecision::CounterCandle
        ));

        // the same candle does not contradict a PUT
        let put = ready_analysis(Some(Direction::Put), 85);
        assert!(matches!(
            dispatcher.evaluate(&state, &put, 1_000_000),
            DispatchDecision::Deliver(_)
        ));
    }

    #[test]
    fn missing_direction_never_dispatches() {
        let dispatcher = SignalDispatcher::new(2 * 3_600_000, 30 * 60_000);
        let state = state_with_candles(neutral_candles());
        let analysis = ready_analysis(None, 90);

        assert!(matches!(
            dispatcher.evaluate(&state, &analysis, 1_000_000),
            DispatchDecision::NoDirection
        ));
    }
}
