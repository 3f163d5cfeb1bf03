//! Production monitor orchestration
//!
//! Wires the feed client, backfiller, strategy engine, dispatcher and
//! notifier together and drives the whole pipeline from one event loop. The
//! loop is the single owner of every `InstrumentState`, so candle updates,
//! scheduled re-analyses and evaluation results for an instrument can never
//! interleave.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Instant};
use tracing::{debug, info, warn};

use crate::common::channels::create_feed_channel;
use crate::common::errors::Result;
use crate::common::types::{Classification, FeedEvent, Instrument, Tick};
use crate::config::MonitorConfig;
use crate::feed::FeedClient;
use crate::market::backfill::{BackfillComplete, HistoryBackfiller};
use crate::market::session::{NewsCalendar, TradingSessions};
use crate::market::store::InstrumentState;
use crate::notify::TelegramNotifier;
use crate::signal::dispatcher::{
    spawn_evaluation, DispatchDecision, EvaluationResult, SignalDispatcher,
};
use crate::strategy::engine::StrategyEngine;

use super::report::{
    final_test_report, five_minute_report, format_alert, hourly_report, PerformanceStats,
};

/// Instruments whose states are created per startup batch
const STATE_BATCH_SIZE: usize = 10;
/// Stagger between startup batches
const STATE_BATCH_STAGGER: Duration = Duration::from_secs(1);
/// News lookahead window passed to the calendar, minutes
const NEWS_BUFFER_MINUTES: i64 = 30;

/// How the monitor runs: indefinitely, or for a fixed test window with a
/// final pass/fail verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Production,
    Test,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Copy)]
pub struct RunSummary {
    /// Set in test mode: whether the run met the pass thresholds
    pub test_passed: Option<bool>,
}

/// Internal multiplexed loop event
enum LoopEvent {
    Feed(FeedEvent),
    Backfill(BackfillComplete),
    Evaluation(EvaluationResult),
    Rescan,
    ReportTick,
    SessionRefresh,
    Deadline,
    Shutdown(&'static str),
}

/// The production monitor
pub struct Monitor {
    config: MonitorConfig,
    feed: FeedClient,
    feed_events: mpsc::Receiver<FeedEvent>,
    backfill_queue: mpsc::Sender<String>,
    backfill_done: mpsc::Receiver<BackfillComplete>,
    evaluations_tx: mpsc::Sender<EvaluationResult>,
    evaluations_rx: mpsc::Receiver<EvaluationResult>,
    engine: StrategyEngine,
    dispatcher: SignalDispatcher,
    notifier: TelegramNotifier,
    sessions: TradingSessions,
    news: NewsCalendar,
    states: HashMap<String, InstrumentState>,
    stats: PerformanceStats,
    started_ms: i64,
    last_report_ms: i64,
    last_hourly_ms: i64,
}

impl Monitor {
    /// Build the monitor and spawn its background collaborators (feed task,
    /// subscription pump, backfiller).
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let (feed_tx, feed_rx) = create_feed_channel();
        let feed = FeedClient::spawn(config.feed.clone(), feed_tx)?;

        let (done_tx, done_rx) = mpsc::channel(256);
        let (backfill_queue, backfiller) =
            HistoryBackfiller::new(feed.clone(), done_tx, config.monitor.history_count);
        tokio::spawn(backfiller.run());

        let (evaluations_tx, evaluations_rx) = mpsc::channel(256);

        let dispatcher = SignalDispatcher::new(
            config.monitor.repeat_window_hours * 3_600_000,
            config.monitor.cooldown_minutes * 60_000,
        );
        let notifier = TelegramNotifier::new(
            &config.telegram,
            config.monitor.dedup_hours * 3_600_000,
            config.monitor.cooldown_minutes * 60_000,
        )?;

        Ok(Self {
            config,
            feed,
            feed_events: feed_rx,
            backfill_queue,
            backfill_done: done_rx,
            evaluations_tx,
            evaluations_rx,
            engine: StrategyEngine::new(),
            dispatcher,
            notifier,
            sessions: TradingSessions::default(),
            news: NewsCalendar::new(),
            states: HashMap::new(),
            stats: PerformanceStats::default(),
            started_ms: Utc::now().timestamp_millis(),
            last_report_ms: 0,
            last_hourly_ms: 0,
        })
    }

    /// Startup sequence followed by the main event loop.
    pub async fn run(mut self, mode: RunMode) -> Result<RunSummary> {
        info!("starting production monitor in {:?} mode", mode);

        self.news.load().await;
        self.feed.wait_until_connected().await?;

        let universe = filter_universe(self.feed.active_instruments().await?);
        info!("tradable universe: {} instruments", universe.len());
        self.create_states(universe).await;

        let deadline = match mode {
            RunMode::Test => Some(
                Instant::now()
                    + Duration::from_secs(self.config.monitor.test_duration_hours * 3600),
            ),
            RunMode::Production => None,
        };

        let rescan_every = Duration::from_secs(self.config.monitor.reanalyze_after_seconds as u64);
        let mut rescan = interval(rescan_every);
        let mut report_tick = interval(Duration::from_secs(1));
        let mut session_refresh = interval(Duration::from_secs(3600));
        // the first immediate interval ticks are harmless; consume them
        rescan.tick().await;
        report_tick.tick().await;
        session_refresh.tick().await;

        loop {
            let event = tokio::select! {
                _ = sleep_until_deadline(deadline) => LoopEvent::Deadline,
                maybe = self.feed_events.recv() => match maybe {
                    Some(event) => LoopEvent::Feed(event),
                    None => LoopEvent::Shutdown("feed channel closed"),
                },
                maybe = self.backfill_done.recv() => match maybe {
                    Some(done) => LoopEvent::Backfill(done),
                    None => LoopEvent::Shutdown("backfill channel closed"),
                },
                maybe = self.evaluations_rx.recv() => match maybe {
                    Some(result) => LoopEvent::Evaluation(result),
                    // the monitor holds a sender, so this cannot happen
                    None => LoopEvent::Shutdown("evaluation channel closed"),
                },
                _ = rescan.tick() => LoopEvent::Rescan,
                _ = report_tick.tick() => LoopEvent::ReportTick,
                _ = session_refresh.tick() => LoopEvent::SessionRefresh,
            };

            match event {
                LoopEvent::Feed(FeedEvent::Tick(tick)) => self.handle_tick(tick).await,
                LoopEvent::Feed(FeedEvent::Connected) => {
                    info!("feed connection established");
                }
                LoopEvent::Feed(FeedEvent::Disconnected { reason }) => {
                    warn!(
                        "feed connection lost: {}",
                        reason.as_deref().unwrap_or("unknown")
                    );
                }
                LoopEvent::Backfill(done) => self.handle_backfill(done).await,
                LoopEvent::Evaluation(result) => self.handle_evaluation(result),
                LoopEvent::Rescan => self.rescan_idle().await,
                LoopEvent::ReportTick => self.maybe_report(),
                LoopEvent::SessionRefresh => self.refresh_session_flags(),
                LoopEvent::Deadline => break,
                LoopEvent::Shutdown(reason) => {
                    warn!("monitor loop stopping: {reason}");
                    break;
                }
            }
        }

        let uptime = Utc::now().timestamp_millis() - self.started_ms;
        let test_passed = match mode {
            RunMode::Test => Some(final_test_report(&self.stats, uptime)),
            RunMode::Production => None,
        };
        Ok(RunSummary { test_passed })
    }

    /// Create instrument states and queue their backfills in staggered
    /// batches.
    async fn create_states(&mut self, instruments: Vec<Instrument>) {
        let total_batches = instruments.len().div_ceil(STATE_BATCH_SIZE);
        for (index, chunk) in instruments.chunks(STATE_BATCH_SIZE).enumerate() {
            for instrument in chunk {
                let symbol = instrument.symbol.clone();
                self.states
                    .insert(symbol.clone(), InstrumentState::new(instrument.clone()));
                let _ = self.backfill_queue.send(symbol).await;
            }
            if index + 1 < total_batches {
                sleep(STATE_BATCH_STAGGER).await;
            }
        }
    }

    async fn handle_tick(&mut self, tick: Tick) {
        let sealed = match self.states.get_mut(&tick.symbol) {
            Some(state) => state.update_candle(&tick),
            None => return,
        };
        if sealed {
            let symbol = tick.symbol;
            self.analyze_instrument(&symbol).await;
        }
    }

    async fn handle_backfill(&mut self, done: BackfillComplete) {
        let symbol = done.symbol;
        match self.states.get_mut(&symbol) {
            Some(state) => state.set_history(done.candles),
            None => return,
        }
        self.feed.subscribe_ticks(&symbol).await;
        self.analyze_instrument(&symbol).await;
    }

    fn handle_evaluation(&mut self, result: EvaluationResult) {
        self.stats.evaluated_signals += 1;
        if result.win {
            self.stats.successful_signals += 1;
        }
        if let Some(state) = self.states.get_mut(&result.symbol) {
            state.adaptive.record_outcome(result.win);
        }
    }

    /// Analyze one instrument, honoring the per-instrument minimum gap, and
    /// dispatch a signal when the classifier is confident enough.
    async fn analyze_instrument(&mut self, symbol: &str) {
        let now_ms = Utc::now().timestamp_millis();
        let throttle_ms = self.config.monitor.analysis_throttle_seconds * 1000;
        let active_session = self.sessions.is_active_now();
        let high_impact_news = self.news.has_high_impact(symbol, NEWS_BUFFER_MINUTES);

        let state = match self.states.get_mut(symbol) {
            Some(state) => state,
            None => return,
        };

        if now_ms - state.last_analysis_ms < throttle_ms {
            return;
        }
        state.last_analysis_ms = now_ms;
        state.active_session = active_session;
        state.high_impact_news = high_impact_news;

        let analysis = self.engine.analyze(state, now_ms);
        state.classification = analysis.state;

        if analysis.compression {
            self.stats.compressions_found += 1;
        }
        if analysis.fakeout_alert {
            self.stats.fakeouts_detected += 1;
        }
        if analysis.session_filtered {
            self.stats.session_filtered += 1;
        }
        if analysis.news_filtered {
            self.stats.news_filtered += 1;
        }

        let confident = analysis.state == Classification::Ready
            && analysis.confidence >= self.config.monitor.confidence_threshold;

        if !confident {
            state.analysis = Some(analysis);
            return;
        }

        match self.dispatcher.evaluate(state, &analysis, now_ms) {
            DispatchDecision::Deliver(signal) => {
                let text = format_alert(state, &analysis, &self.stats);
                let delivered = self
                    .notifier
                    .send_alert(&text, symbol, &signal.hash, now_ms)
                    .await;

                if delivered {
                    // re-borrow: the notifier call ended the previous one
                    if let Some(state) = self.states.get_mut(symbol) {
                        self.dispatcher.record_delivery(state, &signal, now_ms);
                    }
                    self.stats.signals_sent += 1;
                    info!(
                        symbol,
                        direction = %signal.direction,
                        confidence = signal.confidence,
                        hash = %signal.hash,
                        "signal sent"
                    );
                    spawn_evaluation(
                        self.feed.clone(),
                        signal,
                        Duration::from_secs(self.config.monitor.eval_delay_minutes * 60),
                        self.evaluations_tx.clone(),
                    );
                }
            }
            DispatchDecision::CounterCandle => {
                self.stats.false_positives += 1;
                debug!(symbol, "signal rejected by counter-candle confirmation");
            }
            DispatchDecision::DuplicateHash => {
                debug!(symbol, "identical signal already sent recently");
            }
            DispatchDecision::CoolingDown => {
                debug!(symbol, "instrument still cooling down");
            }
            DispatchDecision::NoDirection => {
                debug!(symbol, "ready state without a resolvable direction");
            }
        }

        if let Some(state) = self.states.get_mut(symbol) {
            state.analysis = Some(analysis);
        }
    }

    /// Re-analyze instruments that have been idle past the scheduler
    /// threshold.
    async fn rescan_idle(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let idle_ms = self.config.monitor.reanalyze_after_seconds * 1000;

        let idle: Vec<String> = self
            .states
            .values()
            .filter(|state| now_ms - state.last_analysis_ms > idle_ms)
            .map(|state| state.instrument.symbol.clone())
            .collect();

        for symbol in idle {
            self.analyze_instrument(&symbol).await;
        }
    }

    /// Fire the 5-minute and hourly reports on elapsed wall-clock deltas so
    /// timer drift cannot skip a report.
    fn maybe_report(&mut self) {
        let now_ms = Utc::now().timestamp_millis();
        let uptime = now_ms - self.started_ms;

        if now_ms - self.last_report_ms >= 5 * 60_000 {
            self.last_report_ms = now_ms;
            five_minute_report(
                &self.stats,
                uptime,
                self.states.len(),
                self.feed.is_connected(),
            );
        }

        if now_ms - self.last_hourly_ms >= 60 * 60_000 {
            self.last_hourly_ms = now_ms;
            hourly_report(&self.stats, uptime);
        }
    }

    /// Hourly refresh of the session and news flags on every instrument
    fn refresh_session_flags(&mut self) {
        let active = self.sessions.is_active_now();
        for state in self.states.values_mut() {
            state.active_session = active;
            state.high_impact_news = self
                .news
                .has_high_impact(&state.instrument.symbol, NEWS_BUFFER_MINUTES);
        }
        debug!(active_session = active, "session flags refreshed");
    }

    /// Read-only view of the running statistics (used by reports and tests)
    pub fn stats(&self) -> &PerformanceStats {
        &self.stats
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(instant) => tokio::time::sleep_until(instant).await,
        None => std::future::pending().await,
    }
}

/// Keep forex/crypto/commodity instruments and drop OTC-named symbols
pub fn filter_universe(instruments: Vec<Instrument>) -> Vec<Instrument> {
    instruments
        .into_iter()
        .filter(|instrument| {
            let market = instrument.market.to_lowercase();
            let allowed = market.contains("forex")
                || market.contains("crypto")
                || market.contains("commodit");
            let otc = instrument.display_name.contains("OTC")
                || instrument.symbol.contains("OTC")
                || instrument.symbol.contains("_OTC");
            allowed && !otc
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instrument(symbol: &str, display_name: &str, market: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            display_name: display_name.to_string(),
            market: market.to_string(),
            pip: 0.0001,
        }
    }

    #[test]
    fn universe_filter_keeps_allowed_markets() {
        let universe = vec![
            instrument("frxEURUSD", "EUR/USD", "forex"),
            instrument("cryBTCUSD", "BTC/USD", "cryptocurrency"),
            instrument("frxXAUUSD", "Gold/USD", "commodities"),
            instrument("R_50", "Volatility 50 Index", "synthetic_index"),
        ];

        let filtered = filter_universe(universe);
        let symbols: Vec<&str> = filtered.iter().map(|i| i.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["frxEURUSD", "cryBTCUSD", "frxXAUUSD"]);
    }

    #[test]
    fn universe_filter_drops_otc_symbols() {
        let universe = vec![
            instrument("frxEURUSD", "EUR/USD", "forex"),
            instrument("frxEURUSD_OTC", "EUR/USD OTC", "forex"),
            instrument("OTC_SPX", "US 500 OTC", "commodities"),
        ];

        let filtered = filter_universe(universe);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].symbol, "frxEURUSD");
    }
}
