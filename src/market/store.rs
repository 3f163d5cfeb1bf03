//! Per-instrument mutable state and tick-to-candle aggregation

use crate::common::types::{Candle, Classification, Instrument, Tick};
use crate::strategy::types::{AdaptiveStats, Analysis, CompressionZone};

/// Maximum number of sealed candles kept per instrument
pub const HISTORY_CAP: usize = 200;

/// Mutable per-instrument record: candle history, open candle, strategy
/// state and signal bookkeeping.
///
/// Owned by the monitor loop; nothing else holds a reference, so candle
/// updates and analyses for one instrument are naturally serialized.
#[derive(Debug)]
pub struct InstrumentState {
    pub instrument: Instrument,
    /// Sealed candles, oldest first, FIFO-capped at [`HISTORY_CAP`]
    candles: Vec<Candle>,
    /// The in-progress candle, if any tick has arrived for the current bucket
    current: Option<Candle>,
    /// Latest strategy classification
    pub classification: Classification,
    /// Latest analysis output, kept for reporting
    pub analysis: Option<Analysis>,
    /// Wall-clock time of the last analysis, epoch millis
    pub last_analysis_ms: i64,
    /// Hash of the last accepted signal
    pub last_signal_hash: Option<String>,
    /// When the last signal was sent, epoch millis
    pub last_signal_ms: i64,
    /// No new signal for this instrument before this time, epoch millis
    pub cooldown_until_ms: i64,
    /// Whether the current wall-clock hour falls in an active trading session
    pub active_session: bool,
    /// Whether a high-impact news event is near for this instrument
    pub high_impact_news: bool,
    /// Persistent compression-zone state, updated by each analysis
    pub zone: CompressionZone,
    /// Persistent adaptive-learning counters
    pub adaptive: AdaptiveStats,
    /// Total ticks seen, for reporting
    pub ticks_seen: u64,
}

impl InstrumentState {
    pub fn new(instrument: Instrument) -> Self {
        Self {
            instrument,
            candles: Vec::with_capacity(HISTORY_CAP),
            current: None,
            classification: Classification::Wait,
            analysis: None,
            last_analysis_ms: 0,
            last_signal_hash: None,
            last_signal_ms: 0,
            cooldown_until_ms: 0,
            active_session: false,
            high_impact_news: false,
            zone: CompressionZone::default(),
            adaptive: AdaptiveStats::default(),
            ticks_seen: 0,
        }
    }

    /// Fold a tick into the open candle.
    ///
    /// When the tick's bucket differs from the open candle's, the open candle
    /// is sealed into history (evicting the oldest entry past the cap) and a
    /// fresh candle starts from this tick. Returns `true` exactly when a
    /// candle was sealed or opened, which is the trigger for re-analysis.
    pub fn update_candle(&mut self, tick: &Tick) -> bool {
        self.ticks_seen += 1;
        let bucket = tick.bucket_start();

        match self.current.as_mut() {
            Some(candle) if candle.start == bucket => {
                candle.apply_tick(tick);
                false
            }
            _ => {
                if let Some(sealed) = self.current.take() {
                    self.push_candle(sealed);
                }
                self.current = Some(Candle::from_tick(tick));
                true
            }
        }
    }

    /// Replace the sealed history with backfilled candles, keeping the most
    /// recent [`HISTORY_CAP`] entries.
    pub fn set_history(&mut self, mut candles: Vec<Candle>) {
        let skip = candles.len().saturating_sub(HISTORY_CAP);
        if skip > 0 {
            candles.drain(..skip);
        }
        self.candles = candles;
    }

    fn push_candle(&mut self, candle: Candle) {
        if self.candles.len() == HISTORY_CAP {
            self.candles.remove(0);
        }
        self.candles.push(candle);
    }

    /// Sealed history, oldest first
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Number of sealed candles
    pub fn candle_count(&self) -> usize {
        self.candles.len()
    }

    /// Most recently sealed candle
    pub fn last_candle(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// The in-progress candle, if any
    pub fn open_candle(&self) -> Option<&Candle> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument() -> Instrument {
        Instrument {
            symbol: "frxEURUSD".to_string(),
            display_name: "EUR/USD".to_string(),
            market: "forex".to_string(),
            pip: 0.0001,
        }
    }

    fn tick(epoch: i64, quote: f64) -> Tick {
        Tick {
            symbol: "frxEURUSD".to_string(),
            epoch,
            quote,
        }
    }

    #[test]
    fn first_tick_opens_a_candle() {
        let mut state = InstrumentState::new(instrument());
        assert!(state.update_candle(&tick(1_700_000_000, 1.1)));
        assert_eq!(state.candle_count(), 0);
        assert_eq!(state.open_candle().unwrap().open, 1.1);
    }

    #[test]
    fn ticks_in_same_bucket_update_in_place() {
        let mut state = InstrumentState::new(instrument());
        state.update_candle(&tick(1_700_000_000, 1.1000));
        assert!(!state.update_candle(&tick(1_700_000_030, 1.1005)));
        assert!(!state.update_candle(&tick(1_700_000_059, 1.0998)));

        let open = state.open_candle().unwrap();
        assert_eq!(open.high, 1.1005);
        assert_eq!(open.low, 1.0998);
        assert_eq!(open.close, 1.0998);
        assert_eq!(open.volume, 3.0);
    }

    #[test]
    fn bucket_change_seals_previous_candle() {
        let mut state = InstrumentState::new(instrument());
        state.update_candle(&tick(1_700_000_000, 1.1000));
        state.update_candle(&tick(1_700_000_030, 1.1010));
        assert!(state.update_candle(&tick(1_700_000_060, 1.1005)));

        assert_eq!(state.candle_count(), 1);
        let sealed = state.last_candle().unwrap();
        assert_eq!(sealed.open, 1.1000);
        assert_eq!(sealed.close, 1.1010);
        assert_eq!(sealed.volume, 2.0);
        assert_eq!(state.open_candle().unwrap().open, 1.1005);
    }

    #[test]
    fn sixty_second_linear_rise_builds_one_candle() {
        // 60 ticks at 1-second cadence rising linearly 1.10000 -> 1.10060
        let mut state = InstrumentState::new(instrument());
        let base = 1_700_000_040; // deliberately unaligned start
        let aligned = base - base % 60 + 60;
        for i in 0..60 {
            let quote = 1.10000 + i as f64 * (0.00060 / 59.0);
            state.update_candle(&tick(aligned + i, quote));
        }
        // next bucket seals the candle
        state.update_candle(&tick(aligned + 60, 1.10061));

        assert_eq!(state.candle_count(), 1);
        let sealed = state.last_candle().unwrap();
        assert_eq!(sealed.start, aligned);
        assert_eq!(sealed.start % 60, 0);
        assert!((sealed.open - 1.10000).abs() < 1e-9);
        assert!((sealed.high - 1.10060).abs() < 1e-9);
        assert!((sealed.low - 1.10000).abs() < 1e-9);
        assert!((sealed.close - 1.10060).abs() < 1e-9);
        assert_eq!(sealed.volume, 60.0);
    }

    #[test]
    fn history_never_exceeds_cap() {
        let mut state = InstrumentState::new(instrument());
        for i in 0..(HISTORY_CAP as i64 + 50) {
            state.update_candle(&tick(1_700_000_000 + i * 60, 1.1));
        }
        assert_eq!(state.candle_count(), HISTORY_CAP);
        // oldest candles were evicted first
        assert_eq!(state.candles()[0].start, 1_700_000_000 + 50 * 60);
    }

    #[test]
    fn set_history_trims_to_cap() {
        let mut state = InstrumentState::new(instrument());
        let candles: Vec<Candle> = (0..250)
            .map(|i| Candle {
                start: i * 60,
                open: 1.0,
                high: 1.0,
                low: 1.0,
                close: 1.0,
                volume: 1.0,
            })
            .collect();
        state.set_history(candles);
        assert_eq!(state.candle_count(), HISTORY_CAP);
        assert_eq!(state.candles()[0].start, 50 * 60);
    }
}
