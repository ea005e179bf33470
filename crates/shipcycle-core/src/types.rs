use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::UnknownVariant;

/// Parse an RFC 3339 timestamp string. Returns `None` for anything else.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

// ─── Signal Source ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Github,
    HackerNews,
    Farcaster,
    Twitter,
    Onchain,
    /// User-submitted (staked) suggestion. Always survives detection.
    Suggestion,
}

impl SignalSource {
    pub const ALL: [Self; 6] = [
        Self::Github,
        Self::HackerNews,
        Self::Farcaster,
        Self::Twitter,
        Self::Onchain,
        Self::Suggestion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::HackerNews => "hacker_news",
            Self::Farcaster => "farcaster",
            Self::Twitter => "twitter",
            Self::Onchain => "onchain",
            Self::Suggestion => "suggestion",
        }
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalSource {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|source| source.as_str() == s.to_ascii_lowercase())
            .ok_or_else(|| UnknownVariant {
                kind: "signal source",
                value: s.to_string(),
            })
    }
}

// ─── Signals ──────────────────────────────────────────────────────

/// Supporting material attached to a signal during the decision phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendSignal {
    pub id: String,
    pub source: SignalSource,
    pub summary: String,
    #[serde(default)]
    pub score: f64,
    /// RFC 3339 when produced by a well-behaved source; kept verbatim otherwise.
    pub captured_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<Evidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<f64>,
}

impl TrendSignal {
    pub fn new(
        id: impl Into<String>,
        source: SignalSource,
        summary: impl Into<String>,
        captured_at: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            summary: summary.into(),
            score: 0.0,
            captured_at: captured_at.into(),
            url: None,
            engagement: None,
            meta: None,
            evidence: Vec::new(),
            validation: None,
        }
    }

    pub fn is_suggestion(&self) -> bool {
        self.source == SignalSource::Suggestion
    }

    pub fn captured_time(&self) -> Option<DateTime<Utc>> {
        parse_timestamp(&self.captured_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoolEntry {
    #[serde(flatten)]
    pub signal: TrendSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub key: String,
}

// ─── Phase & Results ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    #[default]
    Idle,
    SignalDetection,
    Decision,
    Development,
    Broadcast,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::SignalDetection => "signal-detection",
            Self::Decision => "decision",
            Self::Development => "development",
            Self::Broadcast => "broadcast",
        }
    }

    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunResult {
    Success,
    Failed,
    Skipped,
}

impl RunResult {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Agent State ──────────────────────────────────────────────────

/// Durable state of the pipeline. Mutated only by the state machine and
/// explicit admin actions (pause / resume / override).
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentState {
    pub paused: bool,
    pub current_phase: Phase,
    pub run_started_at: Option<DateTime<Utc>>,
    pub phase_started_at: Option<DateTime<Utc>>,
    pub last_run_id: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result: Option<RunResult>,
    pub last_error: Option<String>,
    pub last_skip_reason: Option<String>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub last_signal_result: Option<RunResult>,
    pub last_signal_error: Option<String>,
    pub override_signal_id: Option<String>,
}

impl AgentState {
    /// Move into `phase`, stamping the phase start time.
    pub fn enter_phase(&mut self, phase: Phase, now: DateTime<Utc>) {
        self.current_phase = phase;
        self.phase_started_at = Some(now);
    }

    /// Return to idle, clearing the run-scoped timestamps.
    pub fn reset_to_idle(&mut self) {
        self.current_phase = Phase::Idle;
        self.phase_started_at = None;
        self.run_started_at = None;
    }
}

// ─── Decisions & Drops ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFile {
    pub path: String,
    pub contents: String,
}

/// Output of the decision phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub go: bool,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<GeneratedFile>,
    /// Set when the decision was synthesized locally by the suggestion fallback.
    #[serde(default)]
    pub fallback: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasInfo {
    pub tx_hash: String,
    pub gas_used: u64,
    pub gas_price: u64,
    pub gas_cost_eth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Testnet,
    Mainnet,
}

impl Network {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Testnet => "testnet",
            Self::Mainnet => "mainnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub network: Network,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<GasInfo>,
}

/// A shipped product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DropRecord {
    pub id: String,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub decision: DecisionRecord,
    pub signal: TrendSignal,
    pub testnet: DeploymentRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mainnet: Option<DeploymentRecord>,
    pub repo_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hosting_url: Option<String>,
}

/// A posted trend digest and the pool keys it referenced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedSummary {
    pub id: String,
    pub posted_at: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub trend_keys: Vec<String>,
}

/// Append `item` to `history`, keeping only the most recent `limit` entries.
pub fn push_capped<T>(history: &mut Vec<T>, item: T, limit: usize) {
    history.push(item);
    if history.len() > limit {
        let excess = history.len() - limit;
        history.drain(..excess);
    }
}

// ─── Tests ────────────────────────────────────────────────────────
