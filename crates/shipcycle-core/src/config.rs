//! Typed daemon configuration loaded from TOML.
//!
//! Every section carries explicit per-field defaults, unknown keys are
//! rejected, and [`Config::validate`] runs eagerly at load time so the
//! daemon never starts on malformed input.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::SignalSource;

/// Default config file name, resolved relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "shipcycle.toml";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub scoring: ScoringConfig,
    pub pool: PoolConfig,
    pub pipeline: PipelineConfig,
    pub queue: QueueConfig,
    pub monitor: MonitorConfig,
    pub schedule: ScheduleConfig,
    pub store: StoreConfig,
    pub local: LocalConfig,
}

impl Config {
    /// Read, parse and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.pool.validate()?;
        self.pipeline.validate()?;
        self.queue.validate()?;
        self.monitor.validate()?;
        self.schedule.validate()?;
        self.store.validate()?;
        Ok(())
    }

    /// Settings that are valid but leave part of the cycle unable to finish.
    pub fn warnings(&self) -> Vec<String> {
        self.pipeline.warnings()
    }
}

// ─── Scoring ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScoringConfig {
    /// Engagement at or above this value maps to the maximum score.
    pub engagement_cap: f64,
    /// Per-source trust weight keyed by source name. Missing sources weigh 1.
    pub weights: BTreeMap<String, f64>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            engagement_cap: 500.0,
            weights: BTreeMap::new(),
        }
    }
}

impl ScoringConfig {
    pub fn weight_for(&self, source: SignalSource) -> f64 {
        self.weights.get(source.as_str()).copied().unwrap_or(1.0)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.engagement_cap.is_finite() || self.engagement_cap < 0.0 {
            return Err(ConfigError::invalid(
                "scoring.engagement_cap",
                format!("must be a non-negative number, got {}", self.engagement_cap),
            ));
        }
        for (name, weight) in &self.weights {
            name.parse::<SignalSource>()
                .map_err(|e| ConfigError::invalid("scoring.weights", e.to_string()))?;
            if !weight.is_finite() || *weight < 0.0 {
                return Err(ConfigError::invalid(
                    "scoring.weights",
                    format!("weight for {name} must be a non-negative number, got {weight}"),
                ));
            }
        }
        Ok(())
    }
}

// ─── Trend Pool ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    pub max_entries: usize,
    /// Age bound in hours. Unset or non-positive disables age eviction.
    pub max_age_hours: Option<f64>,
    pub max_per_run: usize,
    pub digest_lookback_hours: f64,
    pub digest_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_age_hours: Some(168.0),
            max_per_run: 25,
            digest_lookback_hours: 24.0,
            digest_size: 5,
        }
    }
}

impl PoolConfig {
    /// Effective age bound, `None` when disabled.
    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_hours
            .filter(|hours| hours.is_finite() && *hours > 0.0)
            .map(hours_to_duration)
    }

    pub fn digest_lookback(&self) -> Duration {
        hours_to_duration(self.digest_lookback_hours)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_entries == 0 {
            return Err(ConfigError::invalid("pool.max_entries", "must be at least 1"));
        }
        if self.max_per_run == 0 {
            return Err(ConfigError::invalid("pool.max_per_run", "must be at least 1"));
        }
        if let Some(hours) = self.max_age_hours {
            if hours.is_nan() {
                return Err(ConfigError::invalid("pool.max_age_hours", "must be a number"));
            }
            check_at_most("pool.max_age_hours", hours, MAX_HOURS)?;
        }
        if !self.digest_lookback_hours.is_finite() || self.digest_lookback_hours <= 0.0 {
            return Err(ConfigError::invalid(
                "pool.digest_lookback_hours",
                "must be a positive number",
            ));
        }
        check_at_most("pool.digest_lookback_hours", self.digest_lookback_hours, MAX_HOURS)?;
        Ok(())
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Upper bound on signals carried out of detection (suggestions included).
    pub max_signals: usize,
    /// Minimum acting-signal score for a cycle to proceed.
    pub min_score: f64,
    /// Minimum decision confidence in `[0, 1]`.
    pub min_confidence: f64,
    /// Multiplier applied to the validator's score before adding it.
    pub validation_weight: f64,
    pub auto_deploy: bool,
    pub testnet_rpc_url: Option<String>,
    pub mainnet_rpc_url: Option<String>,
    pub deploy_script: String,
    /// Free-form skill tags forwarded to the decision collaborator.
    pub skills: Vec<String>,
    pub decision_history_limit: usize,
    pub drop_history_limit: usize,
    pub summary_history_limit: usize,
    pub digest_enabled: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_signals: 20,
            min_score: 5.0,
            min_confidence: 0.6,
            validation_weight: 1.0,
            auto_deploy: false,
            testnet_rpc_url: None,
            mainnet_rpc_url: None,
            deploy_script: "script/Deploy.s.sol".to_string(),
            skills: Vec::new(),
            decision_history_limit: 50,
            drop_history_limit: 200,
            summary_history_limit: 50,
            digest_enabled: false,
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_signals == 0 {
            return Err(ConfigError::invalid("pipeline.max_signals", "must be at least 1"));
        }
        if !self.min_score.is_finite() {
            return Err(ConfigError::invalid("pipeline.min_score", "must be a number"));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::invalid(
                "pipeline.min_confidence",
                format!("must be within [0, 1], got {}", self.min_confidence),
            ));
        }
        if !self.validation_weight.is_finite() {
            return Err(ConfigError::invalid(
                "pipeline.validation_weight",
                "must be a number",
            ));
        }
        if self.deploy_script.trim().is_empty() {
            return Err(ConfigError::Missing("pipeline.deploy_script"));
        }
        for (field, limit) in [
            ("pipeline.decision_history_limit", self.decision_history_limit),
            ("pipeline.drop_history_limit", self.drop_history_limit),
            ("pipeline.summary_history_limit", self.summary_history_limit),
        ] {
            if limit == 0 {
                return Err(ConfigError::invalid(field, "must be at least 1"));
            }
        }
        for (field, url) in [
            ("pipeline.testnet_rpc_url", &self.testnet_rpc_url),
            ("pipeline.mainnet_rpc_url", &self.mainnet_rpc_url),
        ] {
            if let Some(url) = url {
                check_http_url(field, url)?;
            }
        }
        Ok(())
    }

    fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.testnet_rpc_url.is_none() {
            warnings.push(
                "pipeline.testnet_rpc_url is not set; every cycle that reaches development will fail"
                    .to_string(),
            );
        }
        if self.auto_deploy && self.mainnet_rpc_url.is_none() {
            warnings.push(
                "pipeline.auto_deploy is on but pipeline.mainnet_rpc_url is not set; mainnet deploys will fail"
                    .to_string(),
            );
        }
        warnings
    }
}

// ─── Queue ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Delay before re-draining when the state machine is busy.
    pub busy_retry_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            busy_retry_secs: 30,
        }
    }
}

impl QueueConfig {
    pub fn busy_retry(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.busy_retry_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.busy_retry_secs == 0 {
            return Err(ConfigError::invalid("queue.busy_retry_secs", "must be at least 1"));
        }
        if self.busy_retry_secs > MAX_SECS {
            return Err(ConfigError::invalid(
                "queue.busy_retry_secs",
                format!("must be at most {MAX_SECS}, got {}", self.busy_retry_secs),
            ));
        }
        Ok(())
    }
}

// ─── Monitor ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub stale_run_hours: u64,
    pub stuck_phase_minutes: u64,
    pub backlog_threshold: usize,
    pub cooldown_minutes: u64,
    pub webhook_url: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            stale_run_hours: 36,
            stuck_phase_minutes: 120,
            backlog_threshold: 3,
            cooldown_minutes: 60,
            webhook_url: None,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::hours(capped(self.stale_run_hours, MAX_HOURS))
    }

    pub fn stuck_after(&self) -> Duration {
        Duration::minutes(capped(self.stuck_phase_minutes, MAX_MINUTES))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::minutes(capped(self.cooldown_minutes, MAX_MINUTES))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.interval_secs == 0 {
            return Err(ConfigError::invalid("monitor.interval_secs", "must be at least 1"));
        }
        for (field, value, max) in [
            ("monitor.interval_secs", self.interval_secs, MAX_SECS),
            ("monitor.stale_run_hours", self.stale_run_hours, MAX_HOURS),
            ("monitor.stuck_phase_minutes", self.stuck_phase_minutes, MAX_MINUTES),
            ("monitor.cooldown_minutes", self.cooldown_minutes, MAX_MINUTES),
        ] {
            if value > max {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be at most {max}, got {value}"),
                ));
            }
        }
        if self.backlog_threshold == 0 {
            return Err(ConfigError::invalid(
                "monitor.backlog_threshold",
                "must be at least 1",
            ));
        }
        if let Some(url) = &self.webhook_url {
            check_http_url("monitor.webhook_url", url)?;
        }
        Ok(())
    }
}

// ─── Schedule ─────────────────────────────────────────────────────

/// Periodic triggers. `None` disables the trigger; admin/API enqueues still work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    pub run_interval_hours: Option<f64>,
    pub detect_interval_hours: Option<f64>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            run_interval_hours: Some(24.0),
            detect_interval_hours: Some(4.0),
        }
    }
}

impl ScheduleConfig {
    pub fn run_interval(&self) -> Option<std::time::Duration> {
        self.run_interval_hours.map(hours_to_std)
    }

    pub fn detect_interval(&self) -> Option<std::time::Duration> {
        self.detect_interval_hours.map(hours_to_std)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (field, hours) in [
            ("schedule.run_interval_hours", self.run_interval_hours),
            ("schedule.detect_interval_hours", self.detect_interval_hours),
        ] {
            if let Some(hours) = hours
                && (!hours.is_finite() || hours <= 0.0)
            {
                return Err(ConfigError::invalid(
                    field,
                    format!("must be a positive number of hours, got {hours}"),
                ));
            }
            if let Some(hours) = hours {
                check_at_most(field, hours, MAX_HOURS)?;
            }
        }
        Ok(())
    }
}

// ─── Store ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    pub dir: PathBuf,
    /// Logical namespace; all documents live under `dir/namespace/`.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from(".shipcycle"),
            namespace: "default".to_string(),
        }
    }
}

impl StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ns = self.namespace.trim();
        if ns.is_empty() {
            return Err(ConfigError::Missing("store.namespace"));
        }
        if ns.contains(['/', '\\']) || ns == "." || ns == ".." {
            return Err(ConfigError::invalid(
                "store.namespace",
                format!("must be a plain directory name, got {ns:?}"),
            ));
        }
        Ok(())
    }
}

// ─── Local collaborators ──────────────────────────────────────────

/// Settings for the collaborators bundled with the runtime binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// JSON files holding arrays of signals, read on every detection.
    pub signal_files: Vec<PathBuf>,
    /// Test gate command run inside `workdir`. Empty means the gate passes.
    pub test_command: Vec<String>,
    /// Deploy command; the script path and `--rpc-url <url>` are appended.
    pub deploy_command: Vec<String>,
    /// Directory generated files are materialized into.
    pub workdir: PathBuf,
    /// Directory each drop is published into (one sub-directory per drop).
    pub publish_dir: PathBuf,
    /// Base URL prefixed to published drop directories.
    pub publish_base_url: Option<String>,
    /// Append-only file receiving announcements. Unset logs only.
    pub broadcast_log: Option<PathBuf>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            signal_files: Vec::new(),
            test_command: Vec::new(),
            deploy_command: vec!["forge".to_string(), "script".to_string()],
            workdir: PathBuf::from("workspace"),
            publish_dir: PathBuf::from("drops"),
            publish_base_url: None,
            broadcast_log: None,
        }
    }
}

// ─── Helpers ──────────────────────────────────────────────────────

fn check_http_url(field: &'static str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("expected an http(s) URL, got {url:?}"),
        ))
    }
}

/// Upper bound for every hour-valued setting (ten years).
const MAX_HOURS: u64 = 87_600;
const MAX_MINUTES: u64 = MAX_HOURS * 60;
const MAX_SECS: u64 = MAX_HOURS * 3600;

#[allow(clippy::cast_precision_loss)]
fn check_at_most(field: &'static str, value: f64, max: u64) -> Result<(), ConfigError> {
    if value > max as f64 {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {max}, got {value}"),
        ));
    }
    Ok(())
}

fn capped(value: u64, max: u64) -> i64 {
    i64::try_from(value.min(max)).unwrap_or(i64::MAX)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn hours_to_duration(hours: f64) -> Duration {
    let secs = (hours.clamp(0.0, MAX_HOURS as f64) * 3600.0).round();
    Duration::try_seconds(secs as i64).unwrap_or(Duration::zero())
}

#[allow(clippy::cast_precision_loss)]
fn hours_to_std(hours: f64) -> std::time::Duration {
    std::time::Duration::try_from_secs_f64(hours.clamp(0.0, MAX_HOURS as f64) * 3600.0)
        .unwrap_or_default()
}

// ─── Tests ────────────────────────────────────────────────────────
