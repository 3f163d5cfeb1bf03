//! Performance accounting, periodic reports and alert formatting

use tracing::{info, warn};

use crate::market::store::InstrumentState;
use crate::strategy::types::Analysis;

/// Running counters for the whole monitor
#[derive(Debug, Default, Clone)]
pub struct PerformanceStats {
    pub signals_sent: u32,
    pub successful_signals: u32,
    pub evaluated_signals: u32,
    pub fakeouts_detected: u64,
    pub compressions_found: u64,
    pub false_positives: u32,
    pub session_filtered: u64,
    pub news_filtered: u64,
}

impl PerformanceStats {
    /// Share of evaluated signals that won
    pub fn win_rate(&self) -> f64 {
        if self.evaluated_signals == 0 {
            return 0.0;
        }
        f64::from(self.successful_signals) / f64::from(self.evaluated_signals)
    }

    /// Share of dispatched signals that survived the confirmation filter
    pub fn accuracy_rate(&self) -> f64 {
        let attempted = self.signals_sent + self.false_positives;
        if attempted == 0 {
            return 0.0;
        }
        f64::from(self.signals_sent) / f64::from(attempted) * 100.0
    }
}

/// Render elapsed milliseconds as "3h 12m 5s"
pub fn format_uptime(elapsed_ms: i64) -> String {
    let total_seconds = elapsed_ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours}h {minutes}m {seconds}s")
}

/// Five-minute operational summary
pub fn five_minute_report(
    stats: &PerformanceStats,
    uptime_ms: i64,
    active_symbols: usize,
    feed_connected: bool,
) {
    info!(
        uptime = %format_uptime(uptime_ms),
        active_symbols,
        feed_connected,
        signals_sent = stats.signals_sent,
        win_rate = format!("{:.1}%", stats.win_rate() * 100.0),
        false_positives = stats.false_positives,
        session_filtered = stats.session_filtered,
        news_filtered = stats.news_filtered,
        "5-minute status"
    );

    if stats.win_rate() < 0.4 && stats.signals_sent > 10 {
        warn!("win rate below 40% across {} signals", stats.signals_sent);
    }
}

/// Hourly summary with the slower-moving counters
pub fn hourly_report(stats: &PerformanceStats, uptime_ms: i64) {
    info!(
        uptime = %format_uptime(uptime_ms),
        signals_sent = stats.signals_sent,
        successful = stats.successful_signals,
        win_rate = format!("{:.1}%", stats.win_rate() * 100.0),
        compressions_found = stats.compressions_found,
        fakeouts_detected = stats.fakeouts_detected,
        accuracy = format!("{:.1}%", stats.accuracy_rate()),
        "hourly report"
    );
}

/// Pass thresholds for a test-mode run
const TEST_MIN_WIN_RATE: f64 = 0.55;
const TEST_MIN_SIGNALS: u32 = 50;

/// Final test-mode summary. Returns whether the run met the win-rate and
/// volume thresholds.
pub fn final_test_report(stats: &PerformanceStats, uptime_ms: i64) -> bool {
    info!(
        runtime = %format_uptime(uptime_ms),
        signals = stats.signals_sent,
        successful = stats.successful_signals,
        win_rate = format!("{:.1}%", stats.win_rate() * 100.0),
        compressions = stats.compressions_found,
        fakeouts = stats.fakeouts_detected,
        false_positives = stats.false_positives,
        session_filtered = stats.session_filtered,
        news_filtered = stats.news_filtered,
        accuracy = format!("{:.1}%", stats.accuracy_rate()),
        "test run complete"
    );

    let passed = stats.win_rate() > TEST_MIN_WIN_RATE && stats.signals_sent > TEST_MIN_SIGNALS;

    if passed {
        info!("test passed: monitor ready for production");
        if stats.win_rate() > 0.65 {
            info!("win rate above 65%: consider shortening the cooldown to 20 minutes");
        }
        if stats.false_positives > stats.signals_sent * 3 / 10 {
            warn!("high false-positive share: tighten the confirmation filter");
        }
        if stats.session_filtered > u64::from(stats.signals_sent) / 2 {
            warn!("many signals fired off-session: consider widening session hours");
        }
    } else {
        warn!("test failed: strategy needs adjustment before production");
        info!("consider raising the confidence threshold, adding confirmation filters or reviewing compression-zone parameters");
    }

    passed
}

/// Build the HTML alert text for one accepted signal
pub fn format_alert(
    state: &InstrumentState,
    analysis: &Analysis,
    stats: &PerformanceStats,
) -> String {
    let direction_label = match analysis.direction {
        Some(crate::common::types::Direction::Call) => "BUY 📈",
        Some(crate::common::types::Direction::Put) => "SELL 📉",
        None => "-",
    };

    let entry_text = if analysis.entry_minutes == 1 {
        "in 1 minute".to_string()
    } else {
        format!("in {} minutes", analysis.entry_minutes)
    };

    let compression_line = if analysis.compression {
        "✅ inside a compression zone"
    } else {
        "❌ no compression"
    };
    let fakeout_line = if analysis.fakeout_alert {
        "⚠️ recent fakeouts nearby"
    } else {
        "✅ no recent fakeouts"
    };

    let reasons = analysis
        .reasons
        .iter()
        .enumerate()
        .map(|(i, reason)| format!("{}. {reason}", i + 1))
        .collect::<Vec<_>>()
        .join("\n");

    let session_warning = if analysis.session_filtered {
        "\n⚠️ <b>Note:</b> outside the main trading sessions"
    } else {
        ""
    };
    let news_warning = if analysis.news_filtered {
        "\n⚠️ <b>Warning:</b> high-impact economic news nearby"
    } else {
        ""
    };

    let hashtag: String = state
        .instrument
        .symbol
        .replace('.', "")
        .chars()
        .take(6)
        .collect();

    format!(
        "🎯 <b>Trade Signal</b>\n\
         \n\
         📊 <b>{name} ({symbol})</b>\n\
         🏪 Market: {market}\n\
         ⏰ Session: {session}\n\
         \n\
         🚀 <b>Direction: {direction}</b>\n\
         ⏰ <b>Entry: {entry}</b>\n\
         ⏳ Suggested hold: 1-2 minutes\n\
         📈 Confidence: {confidence}%\n\
         \n\
         🔍 <b>Pattern analysis:</b>\n\
         {compression_line}\n\
         {fakeout_line}\n\
         Bollinger width: {bollinger:.2}%\n\
         ATR: {atr:.3}%\n\
         \n\
         📋 <b>Reasons:</b>\n\
         {reasons}\n\
         \n\
         💰 <b>Technicals:</b>\n\
         Price: {price:.5}\n\
         RSI: {rsi:.0}\n\
         SMA20: {sma20:.5}\n\
         SMA50: {sma50:.5}\n\
         MACD: {macd:.5}\n\
         {session_warning}{news_warning}\n\
         \n\
         ⚠️ <b>Execution notes:</b>\n\
         1. Wait for the next candle to open\n\
         2. Skip the signal if you are more than 30 seconds late\n\
         3. Size the stop at 1.5x the target\n\
         4. Automated signal - confirm visually before acting\n\
         \n\
         📊 <b>System stats:</b>\n\
         • {sent} signals sent\n\
         • {successful} successful\n\
         • Win rate: {win_rate:.1}%\n\
         • {compressions} compression zones spotted\n\
         \n\
         #{hashtag}",
        name = state.instrument.display_name,
        symbol = state.instrument.symbol,
        market = state.instrument.market,
        session = if analysis.session_filtered { "off-hours" } else { "active" },
        direction = direction_label,
        entry = entry_text,
        confidence = analysis.confidence,
        compression_line = compression_line,
        fakeout_line = fakeout_line,
        bollinger = analysis.bollinger_width * 100.0,
        atr = analysis.atr_pct,
        reasons = reasons,
        price = analysis.price,
        rsi = analysis.rsi,
        sma20 = analysis.sma20,
        sma50 = analysis.sma50,
        macd = analysis.macd_histogram,
        session_warning = session_warning,
        news_warning = news_warning,
        sent = stats.signals_sent,
        successful = stats.successful_signals,
        win_rate = stats.win_rate() * 100.0,
        compressions = stats.compressions_found,
        hashtag = hashtag,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::{Classification, Direction, Instrument};

    #[test]
    fn uptime_formats_hours_minutes_seconds() {
        assert_eq!(format_uptime(0), "0h 0m 0s");
        assert_eq!(format_uptime(5_000), "0h 0m 5s");
        assert_eq!(format_uptime(3 * 3_600_000 + 12 * 60_000 + 5_000), "3h 12m 5s");
    }

    #[test]
    fn win_rate_handles_zero_evaluations() {
        let stats = PerformanceStats::default();
        assert_eq!(stats.win_rate(), 0.0);
        assert_eq!(stats.accuracy_rate(), 0.0);
    }

    #[test]
    fn test_verdict_requires_both_thresholds() {
        let mut stats = PerformanceStats {
            signals_sent: 60,
            successful_signals: 40,
            evaluated_signals: 60,
            ..PerformanceStats::default()
        };
        assert!(final_test_report(&stats, 1_000));

        stats.signals_sent = 40; // volume too low
        assert!(!final_test_report(&stats, 1_000));

        stats.signals_sent = 60;
        stats.successful_signals = 20; // win rate too low
        assert!(!final_test_report(&stats, 1_000));
    }

    #[test]
    fn alert_text_carries_key_fields() {
        let instrument = Instrument {
            symbol: "frxEURUSD".to_string(),
            display_name: "EUR/USD".to_string(),
            market: "forex".to_string(),
            pip: 0.0001,
        };
        let state = InstrumentState::new(instrument);
        let analysis = Analysis {
            state: Classification::Ready,
            direction: Some(Direction::Call),
            confidence: 82,
            price: 1.10042,
            entry_minutes: 1,
            reasons: vec!["tight compression (range 0.09%)".to_string()],
            ..Analysis::insufficient_history()
        };
        let stats = PerformanceStats {
            signals_sent: 3,
            ..PerformanceStats::default()
        };

        let text = format_alert(&state, &analysis, &stats);
        assert!(text.contains("EUR/USD (frxEURUSD)"));
        assert!(text.contains("BUY"));
        assert!(text.contains("82%"));
        assert!(text.contains("1.10042"));
        assert!(text.contains("#frxEUR"));
        assert!(text.contains("tight compression"));
    }
}
