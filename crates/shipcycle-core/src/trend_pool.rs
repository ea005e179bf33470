//! Rolling, deduplicated store of observed signals.
//!
//! Entries are keyed by `source:normalized summary`, a deliberately fuzzy key:
//! two observations of the same headline from the same source collapse even
//! when ids, urls or engagement differ.
//!
//! Bounds are applied by [`TrendPool::prune`]. Entries whose timestamps do not
//! parse are never age-evicted there, while [`TrendPool::window_query`]
//! excludes them. The two rules differ on purpose; keep them that way.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::scoring::cmp_score_desc;
use crate::types::{PublishedSummary, TrendPoolEntry, TrendSignal, parse_timestamp};

/// Normalized summaries are truncated to this many characters.
pub const KEY_SUMMARY_MAX_CHARS: usize = 160;

/// Lowercase, strip everything but ASCII letters/digits/whitespace, collapse
/// whitespace, truncate.
#[must_use]
pub fn normalize_summary(summary: &str) -> String {
    let stripped: String = summary
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(KEY_SUMMARY_MAX_CHARS).collect()
}

/// Dedup key for a signal: a pure function of `(source, summary)`.
#[must_use]
pub fn build_key(signal: &TrendSignal) -> String {
    format!("{}:{}", signal.source.as_str(), normalize_summary(&signal.summary))
}

/// Timestamp used for retention: `detected_at`, falling back to `captured_at`.
fn retention_time(entry: &TrendPoolEntry) -> Option<DateTime<Utc>> {
    entry
        .detected_at
        .as_deref()
        .and_then(parse_timestamp)
        .or_else(|| entry.signal.captured_time())
}

/// Timestamp used for windowing: `captured_at`, falling back to `detected_at`.
fn observation_time(entry: &TrendPoolEntry) -> Option<DateTime<Utc>> {
    entry
        .signal
        .captured_time()
        .or_else(|| entry.detected_at.as_deref().and_then(parse_timestamp))
}

/// Newest first; entries without a usable time sort last.
fn cmp_time_desc(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Order for picking entries: score descending, then newest `captured_at`.
pub fn sort_for_selection<E: Borrow<TrendPoolEntry>>(entries: &mut [E]) {
    entries.sort_by(|a, b| {
        let (a, b) = (a.borrow(), b.borrow());
        cmp_score_desc(a.signal.score, b.signal.score)
            .then_with(|| cmp_time_desc(a.signal.captured_time(), b.signal.captured_time()))
    });
}

/// Union of the pool keys already referenced by published summaries.
#[must_use]
pub fn used_keys_from_history(posts: &[PublishedSummary]) -> HashSet<String> {
    posts
        .iter()
        .flat_map(|post| post.trend_keys.iter().cloned())
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrendPool {
    entries: Vec<TrendPoolEntry>,
}

impl TrendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<TrendPoolEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[TrendPoolEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Add up to `max_per_run` pre-sorted signals from one detection run,
    /// then prune. Ranks are 1-based positions in `signals`. An incoming
    /// signal replaces any older entry with the same key.
    ///
    /// Returns the number of entries added.
    pub fn append(
        &mut self,
        signals: &[TrendSignal],
        run_id: Option<&str>,
        detected_at: Option<DateTime<Utc>>,
        config: &PoolConfig,
        now: DateTime<Utc>,
    ) -> usize {
        let detected_at = detected_at
            .unwrap_or(now)
            .to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut seen = HashSet::new();
        let mut incoming = Vec::new();
        for (index, signal) in signals.iter().take(config.max_per_run).enumerate() {
            let key = build_key(signal);
            if !seen.insert(key.clone()) {
                continue;
            }
            incoming.push(TrendPoolEntry {
                signal: signal.clone(),
                detected_at: Some(detected_at.clone()),
                run_id: run_id.map(str::to_string),
                rank: u32::try_from(index + 1).ok(),
                key,
            });
        }

        self.entries.retain(|entry| !seen.contains(&entry.key));
        let added = incoming.len();
        self.entries.extend(incoming);
        self.prune(config, now);
        added
    }

    /// Apply the count and age bounds. Returns the number of evicted entries.
    pub fn prune(&mut self, config: &PoolConfig, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();

        self.entries
            .sort_by(|a, b| cmp_time_desc(retention_time(a), retention_time(b)));

        if let Some(max_age) = config.max_age() {
            let cutoff = now - max_age;
            self.entries
                .retain(|entry| retention_time(entry).is_none_or(|ts| ts >= cutoff));
        }

        self.entries.truncate(config.max_entries);
        before - self.entries.len()
    }

    /// Entries observed within `lookback` of `now`. Entries without a
    /// parseable timestamp are excluded.
    pub fn window_query(&self, lookback: Duration, now: DateTime<Utc>) -> Vec<&TrendPoolEntry> {
        let cutoff = now - lookback;
        self.entries
            .iter()
            .filter(|entry| observation_time(entry).is_some_and(|ts| ts >= cutoff))
            .collect()
    }

    /// Best `limit` entries in the window whose keys were not yet published.
    pub fn select_for_digest(
        &self,
        lookback: Duration,
        used_keys: &HashSet<String>,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Vec<&TrendPoolEntry> {
        let mut candidates: Vec<&TrendPoolEntry> = self
            .window_query(lookback, now)
            .into_iter()
            .filter(|entry| !used_keys.contains(&entry.key))
            .collect();
        sort_for_selection(&mut candidates);
        candidates.truncate(limit);
        candidates
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SignalSource;
    use proptest::prelude::*;

    fn ts(value: &str) -> DateTime<Utc> {
        parse_timestamp(value).expect("valid RFC3339 timestamp")
    }

    fn now() -> DateTime<Utc> {
        ts("2026-03-10T12:00:00Z")
    }

    fn signal(id: &str, summary: &str, captured_at: &str, score: f64) -> TrendSignal {
        let mut s = TrendSignal::new(id, SignalSource::Github, summary, captured_at);
        s.score = score;
        s
    }

    fn entry(id: &str, detected_at: Option<&str>, captured_at: &str) -> TrendPoolEntry {
        let s = signal(id, id, captured_at, 5.0);
        TrendPoolEntry {
            key: build_key(&s),
            signal: s,
            detected_at: detected_at.map(str::to_string),
            run_id: None,
            rank: None,
        }
    }

    fn config(max_entries: usize, max_age_hours: Option<f64>) -> PoolConfig {
        PoolConfig {
            max_entries,
            max_age_hours,
            ..PoolConfig::default()
        }
    }

    // -- Keys --

    #[test]
    fn normalize_strips_punctuation_and_collapses_whitespace() {
        assert_eq!(
            normalize_summary("  Hello,   WORLD!! Rust\t2026 "),
            "hello world rust 2026"
        );
    }

    #[test]
    fn normalize_truncates_to_160_chars() {
        let long = "a".repeat(400);
        assert_eq!(normalize_summary(&long).chars().count(), KEY_SUMMARY_MAX_CHARS);
    }

    #[test]
    fn key_ignores_non_summary_fields() {
        let mut a = signal("a", "New L2 launches!", "2026-03-01T00:00:00Z", 3.0);
        let mut b = signal("b", "new l2 LAUNCHES", "garbage", 9.0);
        a.url = Some("https://a".into());
        b.engagement = Some(42.0);
        assert_eq!(build_key(&a), build_key(&b));
        assert_eq!(build_key(&a), "github:new l2 launches");
    }

    #[test]
    fn key_distinguishes_sources() {
        let a = signal("a", "same", "2026-03-01T00:00:00Z", 1.0);
        let mut b = a.clone();
        b.source = SignalSource::Twitter;
        assert_ne!(build_key(&a), build_key(&b));
    }

    // -- Append --

    #[test]
    fn append_ranks_tags_and_caps_per_run() {
        let mut pool = TrendPool::new();
        let signals: Vec<TrendSignal> = (0..5)
            .map(|i| signal(&format!("s{i}"), &format!("topic {i}"), "2026-03-10T11:00:00Z", 5.0))
            .collect();
        let cfg = PoolConfig {
            max_per_run: 3,
            ..PoolConfig::default()
        };
        let added = pool.append(&signals, Some("run-7"), None, &cfg, now());
        assert_eq!(added, 3);
        assert_eq!(pool.len(), 3);
        let mut ranks: Vec<u32> = pool.entries().iter().filter_map(|e| e.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, vec![1, 2, 3]);
        for e in pool.entries() {
            assert_eq!(e.run_id.as_deref(), Some("run-7"));
            assert_eq!(e.detected_at.as_deref(), Some("2026-03-10T12:00:00.000Z"));
        }
    }

    #[test]
    fn append_replaces_entry_with_same_key() {
        let mut pool = TrendPool::new();
        let cfg = PoolConfig::default();
        pool.append(
            &[signal("old", "Same Topic", "2026-03-10T10:00:00Z", 3.0)],
            Some("run-1"),
            None,
            &cfg,
            now() - Duration::hours(1),
        );
        pool.append(
            &[signal("new", "same topic!", "2026-03-10T11:30:00Z", 7.0)],
            Some("run-2"),
            None,
            &cfg,
            now(),
        );
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.entries()[0].signal.id, "new");
    }

    // -- Prune --

    #[test]
    fn prune_evicts_old_but_keeps_timestampless() {
        let mut pool = TrendPool::from_entries(vec![
            entry("fresh", Some("2026-03-10T10:00:00Z"), "x"),
            entry("stale", Some("2026-02-01T10:00:00Z"), "x"),
            entry("undated", None, "not a date"),
            entry("captured-only", None, "2026-03-09T00:00:00Z"),
        ]);
        let removed = pool.prune(&config(100, Some(168.0)), now());
        assert_eq!(removed, 1);
        let ids: Vec<&str> = pool.entries().iter().map(|e| e.signal.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "captured-only", "undated"]);
    }

    #[test]
    fn prune_count_bound_drops_timestampless_first() {
        let mut pool = TrendPool::from_entries(vec![
            entry("undated", None, "nope"),
            entry("a", Some("2026-03-10T09:00:00Z"), "x"),
            entry("b", Some("2026-03-10T11:00:00Z"), "x"),
        ]);
        pool.prune(&config(2, None), now());
        let ids: Vec<&str> = pool.entries().iter().map(|e| e.signal.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn prune_without_age_bound_keeps_ancient_entries() {
        let mut pool = TrendPool::from_entries(vec![entry("ancient", Some("2001-01-01T00:00:00Z"), "x")]);
        pool.prune(&config(10, Some(0.0)), now());
        assert_eq!(pool.len(), 1);
    }

    // -- Window --

    #[test]
    fn window_excludes_timestampless_entries() {
        let pool = TrendPool::from_entries(vec![
            entry("recent", None, "2026-03-10T06:00:00Z"),
            entry("old", None, "2026-03-01T06:00:00Z"),
            entry("undated", None, "soon"),
            entry("detected-fallback", Some("2026-03-10T11:00:00Z"), "soon"),
        ]);
        let ids: Vec<&str> = pool
            .window_query(Duration::hours(24), now())
            .iter()
            .map(|e| e.signal.id.as_str())
            .collect();
        assert_eq!(ids, vec!["recent", "detected-fallback"]);
    }

    // -- Selection --

    #[test]
    fn sort_for_selection_breaks_ties_by_recency() {
        let mut entries = vec![
            entry("older", None, "2026-03-09T00:00:00Z"),
            entry("newer", None, "2026-03-10T00:00:00Z"),
        ];
        entries[0].signal.score = 8.0;
        entries[1].signal.score = 8.0;
        let mut top = entry("top", None, "2026-03-01T00:00:00Z");
        top.signal.score = 9.5;
        entries.push(top);
        sort_for_selection(&mut entries);
        let ids: Vec<&str> = entries.iter().map(|e| e.signal.id.as_str()).collect();
        assert_eq!(ids, vec!["top", "newer", "older"]);
    }

    #[test]
    fn used_keys_union_across_posts() {
        let posts = vec![
            PublishedSummary {
                id: "p1".into(),
                posted_at: now(),
                text: "digest".into(),
                trend_keys: vec!["github:a".into(), "github:b".into()],
            },
            PublishedSummary {
                id: "p2".into(),
                posted_at: now(),
                text: "digest".into(),
                trend_keys: vec!["github:b".into(), "twitter:c".into()],
            },
        ];
        let keys = used_keys_from_history(&posts);
        assert_eq!(keys.len(), 3);
        assert!(keys.contains("twitter:c"));
    }

    #[test]
    fn digest_selection_skips_used_keys() {
        let mut a = entry("a", None, "2026-03-10T10:00:00Z");
        a.signal.score = 9.0;
        let mut b = entry("b", None, "2026-03-10T10:00:00Z");
        b.signal.score = 4.0;
        let mut c = entry("c", None, "2026-03-10T10:00:00Z");
        c.signal.score = 6.0;
        let used: HashSet<String> = [a.key.clone()].into_iter().collect();
        let pool = TrendPool::from_entries(vec![a, b, c]);
        let picked: Vec<&str> = pool
            .select_for_digest(Duration::hours(24), &used, 1, now())
            .iter()
            .map(|e| e.signal.id.as_str())
            .collect();
        assert_eq!(picked, vec!["c"]);
    }

    #[test]
    fn pool_serializes_as_plain_array() {
        let pool = TrendPool::from_entries(vec![entry("a", None, "2026-03-10T10:00:00Z")]);
        let value = serde_json::to_value(&pool).expect("serialize pool");
        assert!(value.is_array());
        let back: TrendPool = serde_json::from_value(value).expect("deserialize pool");
        assert_eq!(back, pool);
    }

    // -- Properties --

    fn arb_entry() -> impl Strategy<Value = TrendPoolEntry> {
        (
            "[a-z]{1,8}",
            prop::option::of(0i64..2_000),
            prop::bool::ANY,
        )
            .prop_map(|(id, hours_ago, dated)| {
                let stamp = hours_ago
                    .map(|h| (now() - Duration::hours(h)).to_rfc3339())
                    .unwrap_or_else(|| "unknown".to_string());
                let detected = if dated { Some(stamp.clone()) } else { None };
                entry(&id, detected.as_deref(), &stamp)
            })
    }

    proptest! {
        #[test]
        fn prune_respects_bounds(
            entries in proptest::collection::vec(arb_entry(), 0..60),
            max_entries in 1usize..30,
            max_age in 1.0f64..500.0,
        ) {
            let undated_before = entries
                .iter()
                .filter(|e| retention_time(e).is_none())
                .count();
            let mut pool = TrendPool::from_entries(entries);
            let cfg = config(max_entries, Some(max_age));
            pool.prune(&cfg, now());

            prop_assert!(pool.len() <= max_entries);
            let cutoff = now() - cfg.max_age().expect("age bound enabled");
            for e in pool.entries() {
                if let Some(t) = retention_time(e) {
                    prop_assert!(t >= cutoff);
                }
            }
            // Timestamp-less entries are only lost to the count bound.
            let undated_after = pool
                .entries()
                .iter()
                .filter(|e| retention_time(e).is_none())
                .count();
            if pool.len() < max_entries {
                prop_assert_eq!(undated_after, undated_before);
            }
        }

        #[test]
        fn key_is_pure_in_source_and_summary(
            summary in ".{0,200}",
            id_a in "[a-z]{1,5}",
            id_b in "[a-z]{1,5}",
            score in 0.0f64..10.0,
        ) {
            let a = signal(&id_a, &summary, "2026-03-01T00:00:00Z", score);
            let b = signal(&id_b, &summary, "whenever", 10.0 - score);
            prop_assert_eq!(build_key(&a), build_key(&b));
        }
    }
}
