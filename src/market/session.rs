//! Trading-session clock and news-calendar stub

use std::collections::HashMap;

use chrono::{Timelike, Utc};
use tracing::info;

/// One session window in whole UTC hours, end exclusive
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

impl SessionWindow {
    fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// The major trading sessions the monitor considers "active" time
#[derive(Debug, Clone)]
pub struct TradingSessions {
    pub london: SessionWindow,
    pub new_york: SessionWindow,
}

impl Default for TradingSessions {
    fn default() -> Self {
        Self {
            london: SessionWindow {
                start_hour: 7,
                end_hour: 16,
            },
            new_york: SessionWindow {
                start_hour: 13,
                end_hour: 22,
            },
        }
    }
}

impl TradingSessions {
    /// Whether the given UTC hour falls in the London or New York session
    pub fn is_active_hour(&self, utc_hour: u32) -> bool {
        self.london.contains(utc_hour) || self.new_york.contains(utc_hour)
    }

    /// Whether the current wall-clock time is inside an active session
    pub fn is_active_now(&self) -> bool {
        self.is_active_hour(Utc::now().hour())
    }
}

/// High-impact economic news calendar.
///
/// Stub implementation: loads an empty calendar and reports no events.
/// The monitor treats it as an external collaborator; swapping in a real
/// feed only requires changing `load`.
#[derive(Debug, Default)]
pub struct NewsCalendar {
    events: HashMap<String, Vec<i64>>,
}

impl NewsCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load upcoming events. Stub: always empty.
    pub async fn load(&mut self) {
        self.events.clear();
        info!("news calendar: disabled (stub implementation)");
    }

    /// Whether a high-impact event is within `_minutes_buffer` of now for
    /// the symbol. Stub: always false.
    pub fn has_high_impact(&self, _symbol: &str, _minutes_buffer: i64) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_hours_cover_london_and_new_york() {
        let sessions = TradingSessions::default();
        assert!(!sessions.is_active_hour(6));
        assert!(sessions.is_active_hour(7)); // London open
        assert!(sessions.is_active_hour(12));
        assert!(sessions.is_active_hour(16)); // NY still open
        assert!(sessions.is_active_hour(21));
        assert!(!sessions.is_active_hour(22)); // NY closed
        assert!(!sessions.is_active_hour(23));
    }

    #[tokio::test]
    async fn news_calendar_stub_reports_nothing() {
        let mut calendar = NewsCalendar::new();
        calendar.load().await;
        assert!(!calendar.has_high_impact("frxEURUSD", 30));
    }
}
