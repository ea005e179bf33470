//! Fake collaborators shared by the daemon's unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::bail;
use async_trait::async_trait;

use shipcycle_core::Config;
use shipcycle_core::types::{
    DecisionRecord, DropRecord, GasInfo, SignalSource, TrendPoolEntry, TrendSignal,
};

use crate::collaborators::{
    Broadcaster, Collaborators, DecisionContext, DecisionMaker, DeployOutcome, DeployRequest,
    Deployer, DropDraft, EvidenceMap, GasReader, HostingProvisioner, NoEvidence, NoValidation,
    RepoPublisher, SignalFetcher, TestGate,
};

pub(crate) const DEPLOYED_ADDRESS: &str = "0x5FbDB2315678afecb367f032d93F642f64180aa3";

pub(crate) fn signal(id: &str, source: SignalSource, summary: &str, engagement: f64) -> TrendSignal {
    let mut s = TrendSignal::new(id, source, summary, "2026-03-10T11:00:00.000Z");
    s.engagement = Some(engagement);
    s
}

pub(crate) fn go_decision(signal_id: Option<&str>, confidence: f64) -> DecisionRecord {
    DecisionRecord {
        go: true,
        confidence,
        signal_id: signal_id.map(str::to_string),
        name: "Signal Cat".into(),
        symbol: "SCAT".into(),
        description: "a cat for every signal".into(),
        rationale: "trending".into(),
        files: Vec::new(),
        fallback: false,
        decided_at: None,
        run_id: None,
    }
}

/// Config with a testnet RPC and a cap of 100 so engagement maps cleanly:
/// engagement 12.5 scores 3.0, 50 scores 6.0, 100 scores 10.0.
pub(crate) fn test_config() -> Config {
    let mut config = Config::default();
    config.scoring.engagement_cap = 100.0;
    config.pipeline.testnet_rpc_url = Some("https://testnet.example".into());
    config.pipeline.min_score = 5.0;
    config.pipeline.min_confidence = 0.6;
    config
}

// ─── Fakes ────────────────────────────────────────────────────────

pub(crate) struct StaticSource {
    name: String,
    signals: Vec<TrendSignal>,
    fail: bool,
    pub(crate) calls: AtomicUsize,
}

impl StaticSource {
    pub(crate) fn new(name: &str, signals: Vec<TrendSignal>) -> Self {
        Self {
            name: name.to_string(),
            signals,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name, Vec::new())
        }
    }
}

#[async_trait]
impl SignalFetcher for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _: &Config) -> anyhow::Result<Vec<TrendSignal>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            bail!("{} is rate limited", self.name);
        }
        Ok(self.signals.clone())
    }
}

pub(crate) struct FixedDecision {
    decision: Option<DecisionRecord>,
    fail: bool,
    pub(crate) calls: AtomicUsize,
    pub(crate) contexts: Mutex<Vec<DecisionContext>>,
}

impl FixedDecision {
    pub(crate) fn new(decision: Option<DecisionRecord>) -> Self {
        Self {
            decision,
            fail: false,
            calls: AtomicUsize::new(0),
            contexts: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(None)
        }
    }
}

#[async_trait]
impl DecisionMaker for FixedDecision {
    async fn decide(
        &self,
        _: &[TrendSignal],
        _: &EvidenceMap,
        context: &DecisionContext,
        _: &Config,
    ) -> anyhow::Result<Option<DecisionRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().expect("contexts lock").push(context.clone());
        if self.fail {
            bail!("model returned malformed JSON");
        }
        Ok(self.decision.clone())
    }
}

pub(crate) struct FixedGate {
    pass: bool,
    pub(crate) calls: AtomicUsize,
}

impl FixedGate {
    pub(crate) fn new(pass: bool) -> Self {
        Self {
            pass,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TestGate for FixedGate {
    async fn run(&self, _: &DecisionRecord) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pass)
    }
}

#[derive(Default)]
pub(crate) struct RecordingDeployer {
    pub(crate) requests: Mutex<Vec<DeployRequest>>,
}

impl RecordingDeployer {
    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

#[async_trait]
impl Deployer for RecordingDeployer {
    async fn deploy(&self, request: &DeployRequest) -> anyhow::Result<DeployOutcome> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        Ok(DeployOutcome {
            success: true,
            output: format!("== Logs ==\n  Deployed SignalCat at: {DEPLOYED_ADDRESS}\n"),
        })
    }
}

pub(crate) struct FixedGas;

#[async_trait]
impl GasReader for FixedGas {
    async fn read(&self, _: &DeployRequest, _: &DeployOutcome) -> anyhow::Result<Option<GasInfo>> {
        Ok(Some(GasInfo {
            tx_hash: "0xabc".into(),
            gas_used: 21_000,
            gas_price: 1_000_000_000,
            gas_cost_eth: 0.000_021,
        }))
    }
}

#[derive(Default)]
pub(crate) struct RecordingRepo {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl RepoPublisher for RecordingRepo {
    async fn publish(&self, draft: &DropDraft) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://git.example/drops/{}", draft.run_id))
    }
}

pub(crate) struct FailingHosting;

#[async_trait]
impl HostingProvisioner for FailingHosting {
    async fn provision(&self, _: &DropDraft, _: &str) -> anyhow::Result<String> {
        bail!("hosting quota exceeded")
    }
}

#[derive(Default)]
pub(crate) struct RecordingBroadcaster {
    pub(crate) announced: Mutex<Vec<String>>,
    pub(crate) digests: Mutex<Vec<Vec<String>>>,
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    fn name(&self) -> &str {
        "recording"
    }

    async fn announce(&self, drop: &DropRecord) -> anyhow::Result<()> {
        self.announced
            .lock()
            .expect("announced lock")
            .push(drop.id.clone());
        Ok(())
    }

    async fn post_digest(&self, entries: &[TrendPoolEntry]) -> anyhow::Result<String> {
        let keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
        let text = format!("trending: {}", keys.join(", "));
        self.digests.lock().expect("digests lock").push(keys);
        Ok(text)
    }
}

// ─── Bundle ───────────────────────────────────────────────────────

pub(crate) struct Fakes {
    pub(crate) sources: Vec<Arc<StaticSource>>,
    pub(crate) decision: Arc<FixedDecision>,
    pub(crate) gate: Arc<FixedGate>,
    pub(crate) deployer: Arc<RecordingDeployer>,
    pub(crate) repo: Arc<RecordingRepo>,
    pub(crate) broadcaster: Arc<RecordingBroadcaster>,
    pub(crate) hosting: Option<Arc<dyn HostingProvisioner>>,
}

impl Fakes {
    pub(crate) fn new(signals: Vec<TrendSignal>, decision: FixedDecision) -> Self {
        Self {
            sources: vec![Arc::new(StaticSource::new("static", signals))],
            decision: Arc::new(decision),
            gate: Arc::new(FixedGate::new(true)),
            deployer: Arc::new(RecordingDeployer::default()),
            repo: Arc::new(RecordingRepo::default()),
            broadcaster: Arc::new(RecordingBroadcaster::default()),
            hosting: None,
        }
    }

    /// Number of collaborator invocations of any kind so far.
    pub(crate) fn total_calls(&self) -> usize {
        self.sources
            .iter()
            .map(|s| s.calls.load(Ordering::SeqCst))
            .sum::<usize>()
            + self.decision.calls.load(Ordering::SeqCst)
            + self.gate.calls.load(Ordering::SeqCst)
            + self.deployer.calls()
            + self.repo.calls.load(Ordering::SeqCst)
            + self.broadcaster.announced.lock().expect("announced lock").len()
    }

    pub(crate) fn collaborators(&self) -> Collaborators {
        Collaborators {
            sources: self
                .sources
                .iter()
                .map(|s| Arc::clone(s) as Arc<dyn SignalFetcher>)
                .collect(),
            evidence: Arc::new(NoEvidence),
            validator: Arc::new(NoValidation),
            decision: self.decision.clone(),
            test_gate: self.gate.clone(),
            deployer: self.deployer.clone(),
            gas_reader: Arc::new(FixedGas),
            repo: self.repo.clone(),
            hosting: self.hosting.clone(),
            broadcasters: vec![self.broadcaster.clone()],
        }
    }
}
