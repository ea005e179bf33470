//! Cycle state machine.
//!
//! idle → signal-detection → decision → development → broadcast → idle.
//!
//! Two guards run before anything else: a paused agent and a phase other
//! than idle both turn the call into a skip without touching state. Past the
//! guards every invocation ends back in idle with `last_result` recorded,
//! whatever the collaborators do. Errors inside the body are caught once, at
//! the top, and become [`CycleOutcome::Failed`].

use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::join_all;

use shipcycle_core::Config;
use shipcycle_core::config::PipelineConfig;
use shipcycle_core::error::ConfigError;
use shipcycle_core::scoring::{apply_scores, finalize_scores};
use shipcycle_core::trend_pool::{normalize_summary, used_keys_from_history};
use shipcycle_core::types::{
    AgentState, DecisionRecord, DeploymentRecord, DropRecord, Network, Phase, PublishedSummary,
    RunResult, TrendPoolEntry, TrendSignal,
};

use crate::collaborators::{
    Collaborators, DecisionContext, DeployRequest, DropDraft, EvidenceMap, ValidationMap,
};
use crate::store::{StateStore, StoreError};

/// Drop names handed to the decision maker as recent context.
const RECENT_DROP_CONTEXT: usize = 5;

/// Attempts at writing the final idle state before giving up.
const SETTLE_ATTEMPTS: u32 = 4;
const SETTLE_BACKOFF: Duration = Duration::from_millis(50);

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

// ─── Outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Paused,
    /// Another invocation is mid-run in this phase.
    Busy(Phase),
    NoSignals,
    NoDecision,
    NoGo,
    LowConfidence { confidence: f64, min: f64 },
    NoActingSignal,
    BelowMinScore { signal_id: String, score: f64, min: f64 },
}

impl SkipReason {
    /// Guard refusals leave state untouched.
    pub fn is_guard(&self) -> bool {
        matches!(self, Self::Paused | Self::Busy(_))
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused => f.write_str("agent is paused"),
            Self::Busy(phase) => write!(f, "already running ({phase})"),
            Self::NoSignals => f.write_str("no signals detected"),
            Self::NoDecision => f.write_str("no decision proposed"),
            Self::NoGo => f.write_str("decision was no-go"),
            Self::LowConfidence { confidence, min } => {
                write!(f, "confidence {confidence:.2} below minimum {min:.2}")
            }
            Self::NoActingSignal => f.write_str("no signal to act on"),
            Self::BelowMinScore {
                signal_id,
                score,
                min,
            } => write!(f, "signal {signal_id} scored {score:.1}, minimum is {min:.1}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Succeeded(Box<DropRecord>),
    Skipped(SkipReason),
    Failed { error: String },
}

impl CycleOutcome {
    pub fn result(&self) -> RunResult {
        match self {
            Self::Succeeded(_) => RunResult::Success,
            Self::Skipped(_) => RunResult::Skipped,
            Self::Failed { .. } => RunResult::Failed,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DetectionOutcome {
    Detected { count: usize },
    Skipped(SkipReason),
    Failed { error: String },
}

impl DetectionOutcome {
    pub fn result(&self) -> RunResult {
        match self {
            Self::Detected { .. } => RunResult::Success,
            Self::Skipped(_) => RunResult::Skipped,
            Self::Failed { .. } => RunResult::Failed,
        }
    }
}

// ─── Pure steps ───────────────────────────────────────────────────

/// Score, rank and trim a merged batch of signals.
///
/// Suggestions are always kept. The rest are deduplicated by normalized
/// summary (first, i.e. highest scored, wins) and capped so the whole batch
/// fits in `max_signals`.
#[must_use]
pub fn rank_signals(mut signals: Vec<TrendSignal>, config: &Config) -> Vec<TrendSignal> {
    apply_scores(&mut signals, &config.scoring);
    let (suggestions, others): (Vec<_>, Vec<_>) = finalize_scores(signals)
        .into_iter()
        .partition(TrendSignal::is_suggestion);

    let budget = config
        .pipeline
        .max_signals
        .saturating_sub(suggestions.len());
    let mut seen = HashSet::new();
    let kept = others
        .into_iter()
        .filter(|signal| seen.insert(normalize_summary(&signal.summary)))
        .take(budget);

    finalize_scores(suggestions.into_iter().chain(kept).collect())
}

/// Attach evidence and fold validation into the score, then re-rank.
#[must_use]
pub fn enrich_signals(
    mut signals: Vec<TrendSignal>,
    evidence: &EvidenceMap,
    validation: &ValidationMap,
    validation_weight: f64,
) -> Vec<TrendSignal> {
    for signal in &mut signals {
        if let Some(items) = evidence.get(&signal.id) {
            signal.evidence = items.clone();
        }
        if let Some(&value) = validation.get(&signal.id)
            && value.is_finite()
        {
            signal.validation = Some(value);
            signal.score += value * validation_weight;
        }
    }
    finalize_scores(signals)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActingSource {
    Override,
    Decision,
    TopRanked,
    SuggestionFallback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Act {
        decision: DecisionRecord,
        signal: TrendSignal,
        via: ActingSource,
    },
    Skip(SkipReason),
}

fn find_signal<'a>(signals: &'a [TrendSignal], id: &str) -> Option<&'a TrendSignal> {
    signals.iter().find(|s| s.id == id)
}

/// Pick the signal to act on and the decision to act with.
///
/// Priority is admin override, then the decision's own signal id, then the
/// top-ranked signal. Without an active override, a present suggestion
/// replaces a chosen signal that scores below `min_score`; the proposed
/// decision is then discarded in favor of a synthesized one.
#[must_use]
pub fn select_acting_signal(
    signals: &[TrendSignal],
    decision: Option<DecisionRecord>,
    override_id: Option<&str>,
    config: &PipelineConfig,
) -> Selection {
    let overridden = override_id.and_then(|id| find_signal(signals, id));
    let chosen = overridden
        .map(|s| (s, ActingSource::Override))
        .or_else(|| {
            decision
                .as_ref()
                .and_then(|d| d.signal_id.as_deref())
                .and_then(|id| find_signal(signals, id))
                .map(|s| (s, ActingSource::Decision))
        })
        .or_else(|| signals.first().map(|s| (s, ActingSource::TopRanked)));

    if overridden.is_none()
        && let Some(suggestion) = signals.iter().find(|s| s.is_suggestion())
        && chosen.is_none_or(|(signal, _)| signal.score < config.min_score)
    {
        return Selection::Act {
            decision: fallback_decision(suggestion),
            signal: suggestion.clone(),
            via: ActingSource::SuggestionFallback,
        };
    }

    let Some(mut decision) = decision else {
        return Selection::Skip(SkipReason::NoDecision);
    };
    if !decision.go {
        return Selection::Skip(SkipReason::NoGo);
    }
    if decision.confidence < config.min_confidence {
        return Selection::Skip(SkipReason::LowConfidence {
            confidence: decision.confidence,
            min: config.min_confidence,
        });
    }
    let Some((signal, via)) = chosen else {
        return Selection::Skip(SkipReason::NoActingSignal);
    };
    if signal.score < config.min_score {
        return Selection::Skip(SkipReason::BelowMinScore {
            signal_id: signal.id.clone(),
            score: signal.score,
            min: config.min_score,
        });
    }

    decision.signal_id = Some(signal.id.clone());
    Selection::Act {
        decision,
        signal: signal.clone(),
        via,
    }
}

fn fallback_decision(signal: &TrendSignal) -> DecisionRecord {
    let name = product_name(&signal.summary);
    DecisionRecord {
        go: true,
        confidence: 1.0,
        signal_id: Some(signal.id.clone()),
        symbol: ticker_symbol(&name),
        name,
        description: signal.summary.clone(),
        rationale: format!(
            "top signal below minimum score; acting on community suggestion {}",
            signal.id
        ),
        files: Vec::new(),
        fallback: true,
        decided_at: None,
        run_id: None,
    }
}

/// Short title-cased product name derived from a signal summary.
pub fn product_name(summary: &str) -> String {
    let words: Vec<String> = normalize_summary(summary)
        .split_whitespace()
        .take(3)
        .map(capitalize)
        .collect();
    if words.is_empty() {
        "Community Drop".to_string()
    } else {
        words.join(" ")
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Ticker from a product name's initials, or its first letters when short.
pub fn ticker_symbol(name: &str) -> String {
    let initials: String = name
        .split_whitespace()
        .filter_map(|w| w.chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    if initials.len() >= 3 {
        return initials;
    }
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .take(4)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// First `0x`-prefixed 40-hex-digit token in deploy output. Lines that
/// mention a deployment are searched before the rest.
pub fn extract_address(output: &str) -> Option<String> {
    let mentions_deploy = |line: &&str| {
        let lower = line.to_ascii_lowercase();
        lower.contains("deployed") || lower.contains("contract address")
    };
    output
        .lines()
        .filter(mentions_deploy)
        .chain(output.lines())
        .find_map(address_in_line)
}

fn address_in_line(line: &str) -> Option<String> {
    line.split(|c: char| !c.is_ascii_alphanumeric())
        .find(|token| {
            token.len() == 42
                && token.starts_with("0x")
                && token[2..].chars().all(|c| c.is_ascii_hexdigit())
        })
        .map(str::to_string)
}

fn deploy_env(decision: &DecisionRecord) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("TOKEN_NAME".to_string(), decision.name.clone());
    env.insert("TOKEN_SYMBOL".to_string(), decision.symbol.clone());
    if let Some(id) = &decision.signal_id {
        env.insert("SIGNAL_ID".to_string(), id.clone());
    }
    env
}

// ─── Pipeline ─────────────────────────────────────────────────────

pub struct Pipeline {
    config: Arc<Config>,
    store: StateStore,
    collaborators: Collaborators,
}

impl Pipeline {
    pub fn new(config: Arc<Config>, store: StateStore, collaborators: Collaborators) -> Self {
        Self {
            config,
            store,
            collaborators,
        }
    }

    /// Run one full cycle.
    pub async fn run_cycle(&self, run_id: &str) -> CycleOutcome {
        match self.enter(run_id, true).await {
            Ok(None) => {}
            Ok(Some(reason)) => return CycleOutcome::Skipped(reason),
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "cycle could not start");
                return CycleOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }
        tracing::info!(run_id = %run_id, "cycle started");

        let outcome = match AssertUnwindSafe(self.cycle_body(run_id)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => CycleOutcome::Failed {
                error: format!("{e:#}"),
            },
            Err(panic) => CycleOutcome::Failed {
                error: format!("cycle panicked: {}", panic_message(&*panic)),
            },
        };
        self.finish_cycle(run_id, &outcome).await;
        outcome
    }

    /// Run signal detection only.
    pub async fn run_detection(&self, run_id: &str) -> DetectionOutcome {
        match self.enter(run_id, false).await {
            Ok(None) => {}
            Ok(Some(reason)) => return DetectionOutcome::Skipped(reason),
            Err(e) => {
                tracing::error!(run_id = %run_id, error = %e, "detection could not start");
                return DetectionOutcome::Failed {
                    error: e.to_string(),
                };
            }
        }
        tracing::info!(run_id = %run_id, "detection started");

        let outcome = match AssertUnwindSafe(self.detect(run_id)).catch_unwind().await {
            Ok(Ok(signals)) if signals.is_empty() => {
                DetectionOutcome::Skipped(SkipReason::NoSignals)
            }
            Ok(Ok(signals)) => DetectionOutcome::Detected {
                count: signals.len(),
            },
            Ok(Err(e)) => DetectionOutcome::Failed {
                error: format!("{e:#}"),
            },
            Err(panic) => DetectionOutcome::Failed {
                error: format!("detection panicked: {}", panic_message(&*panic)),
            },
        };
        self.finish_detection(run_id, &outcome).await;
        outcome
    }

    // ─── Guards & bookkeeping ────────────────────────────────────

    /// Apply the entry guards and, when they pass, claim the state machine.
    async fn enter(&self, run_id: &str, full_cycle: bool) -> Result<Option<SkipReason>, StoreError> {
        let now = Utc::now();
        let claimed_by = run_id.to_string();
        let refusal = self
            .store
            .update_agent_state(move |state| {
                if state.paused {
                    return Some(SkipReason::Paused);
                }
                if !state.current_phase.is_idle() {
                    return Some(SkipReason::Busy(state.current_phase));
                }
                state.enter_phase(Phase::SignalDetection, now);
                state.run_started_at = Some(now);
                if full_cycle {
                    state.last_run_id = Some(claimed_by);
                }
                None
            })
            .await?;

        match &refusal {
            Some(SkipReason::Busy(phase)) => tracing::warn!(
                run_id = %run_id,
                phase = %phase,
                "invocation refused: a run is already in progress"
            ),
            Some(reason) => tracing::info!(run_id = %run_id, reason = %reason, "invocation skipped"),
            None => {}
        }
        Ok(refusal)
    }

    async fn set_phase(&self, run_id: &str, phase: Phase) -> Result<(), StoreError> {
        let now = Utc::now();
        self.store
            .update_agent_state(move |state| state.enter_phase(phase, now))
            .await?;
        tracing::info!(run_id = %run_id, phase = %phase, "phase transition");
        Ok(())
    }

    async fn finish_cycle(&self, run_id: &str, outcome: &CycleOutcome) {
        match outcome {
            CycleOutcome::Succeeded(drop) => {
                tracing::info!(run_id = %run_id, drop_id = %drop.id, "cycle succeeded");
            }
            CycleOutcome::Skipped(reason) => {
                tracing::info!(run_id = %run_id, reason = %reason, "cycle skipped");
            }
            CycleOutcome::Failed { error } => {
                tracing::error!(run_id = %run_id, error = %error, "cycle failed");
            }
        }

        let now = Utc::now();
        let result = outcome.result();
        let (last_error, skip_reason) = match outcome {
            CycleOutcome::Failed { error } => (Some(error.clone()), None),
            CycleOutcome::Skipped(reason) => (None, Some(reason.to_string())),
            CycleOutcome::Succeeded(_) => (None, None),
        };
        self.settle(run_id, move |state| {
            state.last_run_at = Some(now);
            state.last_result = Some(result);
            state.last_error = last_error;
            state.last_skip_reason = skip_reason;
        })
        .await;
    }

    async fn finish_detection(&self, run_id: &str, outcome: &DetectionOutcome) {
        let now = Utc::now();
        let failure = match outcome {
            DetectionOutcome::Failed { error } => {
                tracing::error!(run_id = %run_id, error = %error, "detection failed");
                Some(error.clone())
            }
            DetectionOutcome::Skipped(reason) => {
                tracing::info!(run_id = %run_id, reason = %reason, "detection skipped");
                None
            }
            DetectionOutcome::Detected { count } => {
                tracing::info!(run_id = %run_id, signals = count, "detection finished");
                None
            }
        };
        self.settle(run_id, move |state| {
            if let Some(error) = failure {
                state.last_signal_at = Some(now);
                state.last_signal_result = Some(RunResult::Failed);
                state.last_signal_error = Some(error);
            }
        })
        .await;
    }

    /// Return the state machine to idle and apply `record`, retrying store
    /// failures with backoff.
    async fn settle<F>(&self, run_id: &str, record: F)
    where
        F: FnOnce(&mut AgentState) + Clone + Send,
    {
        let mut delay = SETTLE_BACKOFF;
        for attempt in 1..=SETTLE_ATTEMPTS {
            let record = record.clone();
            let settled = self
                .store
                .update_agent_state(move |state| {
                    state.reset_to_idle();
                    record(state);
                })
                .await;
            match settled {
                Ok(()) => return,
                Err(e) if attempt < SETTLE_ATTEMPTS => {
                    tracing::warn!(run_id = %run_id, attempt, error = %e, "failed to settle state, retrying");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "failed to return state machine to idle");
                }
            }
        }
    }

    // ─── Body ────────────────────────────────────────────────────

    async fn cycle_body(&self, run_id: &str) -> anyhow::Result<CycleOutcome> {
        let signals = self.detect(run_id).await?;
        if signals.is_empty() {
            return Ok(CycleOutcome::Skipped(SkipReason::NoSignals));
        }

        self.set_phase(run_id, Phase::Decision).await?;
        let (decision, signal) = match self.decide(run_id, signals).await? {
            Selection::Act {
                decision, signal, ..
            } => (decision, signal),
            Selection::Skip(reason) => return Ok(CycleOutcome::Skipped(reason)),
        };

        self.set_phase(run_id, Phase::Development).await?;
        let (testnet, mainnet) = self.develop(run_id, &decision).await?;
        let drop = self
            .publish(DropDraft {
                run_id: run_id.to_string(),
                decision,
                signal,
                testnet,
                mainnet,
            })
            .await?;

        self.set_phase(run_id, Phase::Broadcast).await?;
        self.broadcast(run_id, &drop).await;

        Ok(CycleOutcome::Succeeded(Box::new(drop)))
    }

    async fn fetch_all(&self, run_id: &str) -> Vec<TrendSignal> {
        let config = &*self.config;
        let fetches = self.collaborators.sources.iter().map(|source| async move {
            (source.name().to_string(), source.fetch(config).await)
        });

        let mut merged = Vec::new();
        for (name, result) in join_all(fetches).await {
            match result {
                Ok(signals) => {
                    tracing::debug!(run_id = %run_id, source = %name, count = signals.len(), "source fetched");
                    merged.extend(signals);
                }
                Err(e) => {
                    tracing::warn!(run_id = %run_id, source = %name, error = %e, "signal source failed; skipping");
                }
            }
        }
        merged
    }

    async fn detect(&self, run_id: &str) -> anyhow::Result<Vec<TrendSignal>> {
        let ranked = rank_signals(self.fetch_all(run_id).await, &self.config);
        let now = Utc::now();

        if !ranked.is_empty() {
            let pool_config = &self.config.pool;
            let added = self
                .store
                .update_trend_pool(|pool| {
                    pool.append(&ranked, Some(run_id), Some(now), pool_config, now)
                })
                .await?;
            tracing::info!(run_id = %run_id, signals = ranked.len(), added, "trend pool updated");
        }

        let result = if ranked.is_empty() {
            RunResult::Skipped
        } else {
            RunResult::Success
        };
        self.store
            .update_agent_state(move |state| {
                state.last_signal_at = Some(now);
                state.last_signal_result = Some(result);
                state.last_signal_error = None;
            })
            .await?;
        Ok(ranked)
    }

    async fn decide(&self, run_id: &str, signals: Vec<TrendSignal>) -> anyhow::Result<Selection> {
        let config = &*self.config;

        let evidence = match self.collaborators.evidence.build(&signals, config).await {
            Ok(evidence) => evidence,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "evidence unavailable");
                EvidenceMap::new()
            }
        };
        let validation = match self
            .collaborators
            .validator
            .validate(&signals, &evidence, config)
            .await
        {
            Ok(validation) => validation,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "validation unavailable");
                ValidationMap::new()
            }
        };
        let signals = enrich_signals(
            signals,
            &evidence,
            &validation,
            config.pipeline.validation_weight,
        );

        let override_id = self.store.agent_state().await?.override_signal_id;
        let drops = self.store.drops().await?;
        let recent_from = drops.len().saturating_sub(RECENT_DROP_CONTEXT);
        let context = DecisionContext {
            run_id: run_id.to_string(),
            override_signal_id: override_id.clone(),
            skills: config.pipeline.skills.clone(),
            recent_drops: drops[recent_from..]
                .iter()
                .map(|d| d.decision.name.clone())
                .collect(),
        };

        let proposed = self
            .collaborators
            .decision
            .decide(&signals, &evidence, &context, config)
            .await
            .context("decision maker failed")?;

        if let Some(id) = override_id.as_deref()
            && !signals.iter().any(|s| s.id == id)
        {
            tracing::warn!(run_id = %run_id, signal_id = %id, "override signal not among detected signals");
        }

        let mut selection = select_acting_signal(
            &signals,
            proposed.clone(),
            override_id.as_deref(),
            &config.pipeline,
        );

        let now = Utc::now();
        let stamp = |mut record: DecisionRecord| {
            record.decided_at = Some(now);
            record.run_id = Some(run_id.to_string());
            record
        };
        let recorded = match &mut selection {
            Selection::Act {
                decision, signal, via,
            } => {
                *decision = stamp(decision.clone());
                tracing::info!(
                    run_id = %run_id,
                    signal_id = %signal.id,
                    via = ?via,
                    name = %decision.name,
                    "decision made"
                );
                Some(decision.clone())
            }
            Selection::Skip(_) => proposed.map(stamp),
        };
        if let Some(record) = recorded {
            self.store
                .append_decision(record, config.pipeline.decision_history_limit)
                .await?;
        }

        if let Selection::Act {
            via: ActingSource::Override,
            ..
        } = &selection
        {
            self.store
                .update_agent_state(|state| state.override_signal_id = None)
                .await?;
            tracing::info!(run_id = %run_id, "override consumed");
        }
        Ok(selection)
    }

    async fn develop(
        &self,
        run_id: &str,
        decision: &DecisionRecord,
    ) -> anyhow::Result<(DeploymentRecord, Option<DeploymentRecord>)> {
        let passed = self
            .collaborators
            .test_gate
            .run(decision)
            .await
            .context("test gate errored")?;
        if !passed {
            bail!("test gate failed; nothing deployed");
        }

        let pipeline = &self.config.pipeline;
        let testnet_url = pipeline
            .testnet_rpc_url
            .as_deref()
            .ok_or(ConfigError::Missing("pipeline.testnet_rpc_url"))?;
        let testnet = self
            .deploy(run_id, Network::Testnet, testnet_url, decision)
            .await?;

        let mainnet = if pipeline.auto_deploy {
            let mainnet_url = pipeline
                .mainnet_rpc_url
                .as_deref()
                .ok_or(ConfigError::Missing("pipeline.mainnet_rpc_url"))?;
            Some(
                self.deploy(run_id, Network::Mainnet, mainnet_url, decision)
                    .await?,
            )
        } else {
            None
        };
        Ok((testnet, mainnet))
    }

    async fn deploy(
        &self,
        run_id: &str,
        network: Network,
        rpc_url: &str,
        decision: &DecisionRecord,
    ) -> anyhow::Result<DeploymentRecord> {
        let request = DeployRequest {
            network,
            script: self.config.pipeline.deploy_script.clone(),
            rpc_url: rpc_url.to_string(),
            env: deploy_env(decision),
        };
        tracing::info!(run_id = %run_id, network = %network, name = %decision.name, "deploying");

        let outcome = self
            .collaborators
            .deployer
            .deploy(&request)
            .await
            .with_context(|| format!("{network} deploy errored"))?;
        if !outcome.success {
            bail!("{network} deployment failed: {}", outcome.output.trim());
        }

        let gas = match self.collaborators.gas_reader.read(&request, &outcome).await {
            Ok(gas) => gas,
            Err(e) => {
                tracing::warn!(run_id = %run_id, network = %network, error = %e, "gas info unavailable");
                None
            }
        };
        let address = extract_address(&outcome.output);
        if address.is_none() {
            tracing::warn!(run_id = %run_id, network = %network, "no contract address in deploy output");
        }
        Ok(DeploymentRecord {
            network,
            address,
            gas,
        })
    }

    async fn publish(&self, draft: DropDraft) -> anyhow::Result<DropRecord> {
        let repo_url = self
            .collaborators
            .repo
            .publish(&draft)
            .await
            .context("repository publish failed")?;

        let hosting_url = match &self.collaborators.hosting {
            Some(hosting) => match hosting.provision(&draft, &repo_url).await {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(run_id = %draft.run_id, error = %e, "hosting provisioning failed");
                    None
                }
            },
            None => None,
        };

        let drop = DropRecord {
            id: format!("drop-{}", draft.run_id),
            run_id: draft.run_id,
            created_at: Utc::now(),
            decision: draft.decision,
            signal: draft.signal,
            testnet: draft.testnet,
            mainnet: draft.mainnet,
            repo_url,
            hosting_url,
        };
        self.store
            .append_drop(drop.clone(), self.config.pipeline.drop_history_limit)
            .await?;
        tracing::info!(run_id = %drop.run_id, drop_id = %drop.id, repo = %drop.repo_url, "drop published");
        Ok(drop)
    }

    async fn broadcast(&self, run_id: &str, drop: &DropRecord) {
        for broadcaster in &self.collaborators.broadcasters {
            if let Err(e) = broadcaster.announce(drop).await {
                tracing::warn!(
                    run_id = %run_id,
                    broadcaster = %broadcaster.name(),
                    error = %e,
                    "announcement failed"
                );
            }
        }

        if self.config.pipeline.digest_enabled
            && let Err(e) = self.post_digest(run_id, Utc::now()).await
        {
            tracing::warn!(run_id = %run_id, error = %e, "trend digest failed");
        }
    }

    async fn post_digest(&self, run_id: &str, now: DateTime<Utc>) -> anyhow::Result<()> {
        let pool = self.store.trend_pool().await?;
        let used = used_keys_from_history(&self.store.summaries().await?);
        let pool_config = &self.config.pool;
        let entries: Vec<TrendPoolEntry> = pool
            .select_for_digest(pool_config.digest_lookback(), &used, pool_config.digest_size, now)
            .into_iter()
            .cloned()
            .collect();
        if entries.is_empty() {
            tracing::debug!(run_id = %run_id, "no fresh trends for a digest");
            return Ok(());
        }

        let mut posted = None;
        for broadcaster in &self.collaborators.broadcasters {
            match broadcaster.post_digest(&entries).await {
                Ok(text) => {
                    posted.get_or_insert(text);
                }
                Err(e) => tracing::warn!(
                    run_id = %run_id,
                    broadcaster = %broadcaster.name(),
                    error = %e,
                    "digest post failed"
                ),
            }
        }

        if let Some(text) = posted {
            let summary = PublishedSummary {
                id: format!("digest-{run_id}"),
                posted_at: now,
                text,
                trend_keys: entries.into_iter().map(|e| e.key).collect(),
            };
            self.store
                .append_summary(summary, self.config.pipeline.summary_history_limit)
                .await?;
        }
        Ok(())
    }
}

// ─── Tests ────────────────────────────────────────────────────────
