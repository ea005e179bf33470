//! Health rules evaluated on every monitor tick.
//!
//! Pure, side-effect-free: [`evaluate`] inspects a snapshot of the durable
//! state and [`admit`] applies per-key cooldowns against the persisted
//! [`MonitorAlertState`]. Delivery lives in the daemon crate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MonitorConfig;
use crate::queue::RunQueue;
use crate::types::{AgentState, RunResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    StaleRun,
    LastRunFailed,
    StuckPhase,
    Backlog,
}

impl AlertKind {
    pub fn key(self) -> &'static str {
        match self {
            Self::StaleRun => "stale-run",
            Self::LastRunFailed => "last-run-failed",
            Self::StuckPhase => "stuck-phase",
            Self::Backlog => "backlog",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub kind: AlertKind,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

/// Last-fired timestamp per alert key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitorAlertState {
    last_fired: BTreeMap<String, DateTime<Utc>>,
}

impl MonitorAlertState {
    pub fn last_fired(&self, key: &str) -> Option<DateTime<Utc>> {
        self.last_fired.get(key).copied()
    }

    /// `true` while `key` fired less than `cooldown` ago.
    pub fn is_suppressed(&self, key: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        self.last_fired(key)
            .is_some_and(|fired| now.signed_duration_since(fired) < cooldown)
    }

    pub fn record(&mut self, key: &str, now: DateTime<Utc>) {
        self.last_fired.insert(key.to_string(), now);
    }
}

/// Evaluate every rule independently.
#[must_use]
pub fn evaluate(
    state: &AgentState,
    queue: &RunQueue,
    config: &MonitorConfig,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let mut alerts = Vec::new();
    let mut raise = |kind: AlertKind, message: String| {
        alerts.push(Alert {
            kind,
            message,
            raised_at: now,
        });
    };

    if queue.is_empty() {
        let stale_after = config.stale_after();
        match state.last_run_at {
            Some(last) if now.signed_duration_since(last) > stale_after => raise(
                AlertKind::StaleRun,
                format!(
                    "no cycle has run for {}h (threshold {}h, last at {})",
                    now.signed_duration_since(last).num_hours(),
                    config.stale_run_hours,
                    last.to_rfc3339()
                ),
            ),
            Some(_) => {}
            None => raise(
                AlertKind::StaleRun,
                "no cycle has ever run and the queue is empty".to_string(),
            ),
        }
    }

    if state.last_result == Some(RunResult::Failed) {
        raise(
            AlertKind::LastRunFailed,
            format!(
                "last cycle failed: {}",
                state.last_error.as_deref().unwrap_or("unknown error")
            ),
        );
    }

    if !state.current_phase.is_idle() {
        match state.phase_started_at {
            Some(started) if now.signed_duration_since(started) > config.stuck_after() => raise(
                AlertKind::StuckPhase,
                format!(
                    "phase {} running for {}m (threshold {}m)",
                    state.current_phase,
                    now.signed_duration_since(started).num_minutes(),
                    config.stuck_phase_minutes
                ),
            ),
            Some(_) => {}
            None => raise(
                AlertKind::StuckPhase,
                format!("phase {} has no recorded start time", state.current_phase),
            ),
        }
    }

    if queue.len() >= config.backlog_threshold {
        raise(
            AlertKind::Backlog,
            format!(
                "{} jobs queued (threshold {})",
                queue.len(),
                config.backlog_threshold
            ),
        );
    }

    alerts
}

/// Drop alerts still inside their cooldown and record the rest as fired.
pub fn admit(
    alerts: Vec<Alert>,
    alert_state: &mut MonitorAlertState,
    cooldown: Duration,
    now: DateTime<Utc>,
) -> Vec<Alert> {
    alerts
        .into_iter()
        .filter(|alert| {
            let key = alert.kind.key();
            if alert_state.is_suppressed(key, now, cooldown) {
                return false;
            }
            alert_state.record(key, now);
            true
        })
        .collect()
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobKind, JobRequest, QueueItem};
    use crate::types::Phase;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-10T12:00:00Z")
            .expect("valid RFC3339 timestamp")
            .with_timezone(&Utc)
    }

    fn healthy_state() -> AgentState {
        AgentState {
            last_run_at: Some(now() - Duration::hours(1)),
            last_result: Some(RunResult::Success),
            ..AgentState::default()
        }
    }

    fn queue_of(n: usize) -> RunQueue {
        let mut queue = RunQueue::default();
        for i in 0..n {
            let request = JobRequest::by("test").forced();
            queue.enqueue(QueueItem::new(format!("q{i}"), JobKind::Run, request, now()));
        }
        queue
    }

    fn kinds(alerts: &[Alert]) -> Vec<AlertKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn healthy_state_raises_nothing() {
        let alerts = evaluate(&healthy_state(), &queue_of(0), &MonitorConfig::default(), now());
        assert!(alerts.is_empty(), "unexpected alerts: {alerts:?}");
    }

    #[test]
    fn stale_run_requires_empty_queue() {
        let state = AgentState {
            last_run_at: Some(now() - Duration::hours(40)),
            ..AgentState::default()
        };
        let cfg = MonitorConfig::default();
        assert_eq!(kinds(&evaluate(&state, &queue_of(0), &cfg, now())), vec![AlertKind::StaleRun]);
        assert!(evaluate(&state, &queue_of(1), &cfg, now()).is_empty());
    }

    #[test]
    fn never_run_counts_as_stale() {
        let alerts = evaluate(&AgentState::default(), &queue_of(0), &MonitorConfig::default(), now());
        assert_eq!(kinds(&alerts), vec![AlertKind::StaleRun]);
    }

    #[test]
    fn failed_last_run_alerts_with_error() {
        let state = AgentState {
            last_result: Some(RunResult::Failed),
            last_error: Some("deploy reverted".into()),
            ..healthy_state()
        };
        let alerts = evaluate(&state, &queue_of(0), &MonitorConfig::default(), now());
        assert_eq!(kinds(&alerts), vec![AlertKind::LastRunFailed]);
        assert!(alerts[0].message.contains("deploy reverted"));
    }

    #[test]
    fn stuck_phase_after_threshold() {
        let mut state = healthy_state();
        state.current_phase = Phase::Development;
        state.phase_started_at = Some(now() - Duration::minutes(121));
        let alerts = evaluate(&state, &queue_of(0), &MonitorConfig::default(), now());
        assert_eq!(kinds(&alerts), vec![AlertKind::StuckPhase]);

        state.phase_started_at = Some(now() - Duration::minutes(30));
        assert!(evaluate(&state, &queue_of(0), &MonitorConfig::default(), now()).is_empty());
    }

    #[test]
    fn non_idle_phase_without_start_is_stuck() {
        let mut state = healthy_state();
        state.current_phase = Phase::Broadcast;
        let alerts = evaluate(&state, &queue_of(0), &MonitorConfig::default(), now());
        assert_eq!(kinds(&alerts), vec![AlertKind::StuckPhase]);
    }

    #[test]
    fn backlog_at_threshold() {
        let cfg = MonitorConfig::default();
        assert!(evaluate(&healthy_state(), &queue_of(2), &cfg, now()).is_empty());
        let alerts = evaluate(&healthy_state(), &queue_of(3), &cfg, now());
        assert_eq!(kinds(&alerts), vec![AlertKind::Backlog]);
    }

    #[test]
    fn rules_are_independent() {
        let state = AgentState {
            last_result: Some(RunResult::Failed),
            current_phase: Phase::Decision,
            phase_started_at: Some(now() - Duration::hours(5)),
            last_run_at: Some(now() - Duration::hours(50)),
            ..AgentState::default()
        };
        let alerts = evaluate(&state, &queue_of(4), &MonitorConfig::default(), now());
        assert_eq!(
            kinds(&alerts),
            vec![AlertKind::LastRunFailed, AlertKind::StuckPhase, AlertKind::Backlog]
        );
    }

    #[test]
    fn cooldown_suppresses_repeat_alerts() {
        let mut alert_state = MonitorAlertState::default();
        let cooldown = Duration::minutes(60);
        let raise = |at: DateTime<Utc>| {
            vec![Alert {
                kind: AlertKind::StaleRun,
                message: "stale".into(),
                raised_at: at,
            }]
        };

        assert_eq!(admit(raise(now()), &mut alert_state, cooldown, now()).len(), 1);
        let later = now() + Duration::minutes(10);
        assert!(admit(raise(later), &mut alert_state, cooldown, later).is_empty());
        assert_eq!(alert_state.last_fired("stale-run"), Some(now()));

        let after = now() + Duration::minutes(61);
        assert_eq!(admit(raise(after), &mut alert_state, cooldown, after).len(), 1);
        assert_eq!(alert_state.last_fired("stale-run"), Some(after));
    }

    #[test]
    fn cooldowns_are_per_key() {
        let mut alert_state = MonitorAlertState::default();
        alert_state.record("backlog", now());
        let alerts = vec![
            Alert {
                kind: AlertKind::Backlog,
                message: "b".into(),
                raised_at: now(),
            },
            Alert {
                kind: AlertKind::StuckPhase,
                message: "s".into(),
                raised_at: now(),
            },
        ];
        let fired = admit(alerts, &mut alert_state, Duration::minutes(60), now());
        assert_eq!(kinds(&fired), vec![AlertKind::StuckPhase]);
    }

    #[test]
    fn alert_state_serializes_as_map() {
        let mut alert_state = MonitorAlertState::default();
        alert_state.record("stale-run", now());
        let value = serde_json::to_value(&alert_state).expect("serialize alert state");
        assert!(value.get("stale-run").is_some());
    }
}
