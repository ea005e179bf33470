//! Signal scoring.
//!
//! A signal's score is its engagement, capped and normalized into `[0, 1]`,
//! mapped onto `[2, 10]` and multiplied by the source's trust weight. The
//! floor of `2 * weight` keeps low-activity sources visible.

use std::cmp::Ordering;

use crate::config::ScoringConfig;
use crate::types::{SignalSource, TrendSignal};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 10.0;

/// Score a single observation. Pure and total: negative or NaN engagement
/// counts as zero.
#[must_use]
pub fn score_signal(source: SignalSource, engagement: f64, config: &ScoringConfig) -> f64 {
    let weight = config.weight_for(source);
    let cap = config.engagement_cap;
    let engagement = if engagement.is_nan() { 0.0 } else { engagement.max(0.0) };
    let normalized = if cap > 0.0 { engagement.min(cap) / cap } else { 0.0 };
    round_one_decimal((normalized * 8.0 + 2.0) * weight)
}

/// Score every signal in place from its engagement.
pub fn apply_scores(signals: &mut [TrendSignal], config: &ScoringConfig) {
    for signal in signals {
        signal.score = score_signal(signal.source, signal.engagement.unwrap_or(0.0), config);
    }
}

/// Clamp every score into `[0, 10]` and sort descending.
#[must_use]
pub fn finalize_scores(mut signals: Vec<TrendSignal>) -> Vec<TrendSignal> {
    for signal in &mut signals {
        signal.score = if signal.score.is_nan() {
            MIN_SCORE
        } else {
            signal.score.clamp(MIN_SCORE, MAX_SCORE)
        };
    }
    signals.sort_by(|a, b| cmp_score_desc(a.score, b.score));
    signals
}

/// Descending comparator on scores (stable for equal values).
pub fn cmp_score_desc(a: f64, b: f64) -> Ordering {
    b.partial_cmp(&a).unwrap_or(Ordering::Equal)
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

// ─── Tests ────────────────────────────────────────────────────────
