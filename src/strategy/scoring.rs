//! Weighted condition scoring
//!
//! Kept as a pure function so the scoring rules can be unit-tested without
//! any indicator computation or I/O behind them.

use super::types::{ConditionSet, Weights};

/// Sum of the weights of every condition that holds
pub fn score(conditions: &ConditionSet, weights: &Weights) -> f64 {
    let mut total = 0.0;
    if conditions.in_compression {
        total += weights.in_compression;
    }
    if conditions.volume_decreasing {
        total += weights.volume_decreasing;
    }
    if conditions.rsi_neutral {
        total += weights.rsi_neutral;
    }
    if conditions.no_recent_fakeout {
        total += weights.no_recent_fakeout;
    }
    if conditions.potential_breakout {
        total += weights.potential_breakout;
    }
    if conditions.trend_alignment {
        total += weights.trend_alignment;
    }
    if conditions.bollinger_squeeze {
        total += weights.bollinger_squeeze;
    }
    if conditions.macd_alignment {
        total += weights.macd_alignment;
    }
    if conditions.volume_spike {
        total += weights.volume_spike;
    }
    if conditions.atr_low {
        total += weights.atr_low;
    }
    total
}

/// How many of the base WATCH conditions hold
pub fn watch_score(conditions: &ConditionSet) -> usize {
    [
        conditions.in_compression,
        conditions.volume_decreasing,
        conditions.rsi_neutral,
        conditions.no_recent_fakeout,
    ]
    .iter()
    .filter(|&&held| held)
    .count()
}

/// How many of the strong-watch escalation conditions hold
pub fn strong_watch_score(conditions: &ConditionSet) -> usize {
    [
        conditions.bollinger_squeeze,
        conditions.atr_low,
        conditions.macd_alignment,
    ]
    .iter()
    .filter(|&&held| held)
    .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_condition_set_scores_zero() {
        assert_eq!(score(&ConditionSet::default(), &Weights::base()), 0.0);
    }

    #[test]
    fn all_conditions_sum_every_weight() {
        let conditions = ConditionSet {
            in_compression: true,
            volume_decreasing: true,
            rsi_neutral: true,
            no_recent_fakeout: true,
            potential_breakout: true,
            trend_alignment: true,
            bollinger_squeeze: true,
            macd_alignment: true,
            volume_spike: true,
            atr_low: true,
        };
        assert_eq!(score(&conditions, &Weights::base()), 135.0);
    }

    #[test]
    fn partial_set_sums_only_held_conditions() {
        let conditions = ConditionSet {
            in_compression: true,
            rsi_neutral: true,
            volume_spike: true,
            ..ConditionSet::default()
        };
        // 20 + 10 + 15
        assert_eq!(score(&conditions, &Weights::base()), 45.0);
    }

    #[test]
    fn watch_scores_count_their_subsets() {
        let conditions = ConditionSet {
            in_compression: true,
            volume_decreasing: true,
            rsi_neutral: true,
            bollinger_squeeze: true,
            atr_low: true,
            ..ConditionSet::default()
        };
        assert_eq!(watch_score(&conditions), 3);
        assert_eq!(strong_watch_score(&conditions), 2);
    }
}
