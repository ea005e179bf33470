//! External collaborators the pipeline drives.
//!
//! Each seam is an async trait so the daemon can wire real integrations and
//! tests can wire fakes. Implementations should degrade transient failures to
//! empty results themselves; an `Err` is treated as unexpected by the caller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;

use shipcycle_core::Config;
use shipcycle_core::types::{
    DecisionRecord, DeploymentRecord, DropRecord, Evidence, GasInfo, Network, TrendPoolEntry,
    TrendSignal,
};

/// Evidence per signal id.
pub type EvidenceMap = HashMap<String, Vec<Evidence>>;

/// Validation score per signal id, in score units.
pub type ValidationMap = HashMap<String, f64>;

#[async_trait]
pub trait SignalFetcher: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, config: &Config) -> anyhow::Result<Vec<TrendSignal>>;
}

#[async_trait]
pub trait EvidenceBuilder: Send + Sync {
    async fn build(&self, signals: &[TrendSignal], config: &Config)
    -> anyhow::Result<EvidenceMap>;
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        signals: &[TrendSignal],
        evidence: &EvidenceMap,
        config: &Config,
    ) -> anyhow::Result<ValidationMap>;
}

/// What the decision maker sees besides the ranked signals.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub run_id: String,
    pub override_signal_id: Option<String>,
    pub skills: Vec<String>,
    /// Names of the most recent drops, newest last.
    pub recent_drops: Vec<String>,
}

#[async_trait]
pub trait DecisionMaker: Send + Sync {
    /// `Ok(None)` means the maker had nothing to propose.
    async fn decide(
        &self,
        signals: &[TrendSignal],
        evidence: &EvidenceMap,
        context: &DecisionContext,
        config: &Config,
    ) -> anyhow::Result<Option<DecisionRecord>>;
}

#[async_trait]
pub trait TestGate: Send + Sync {
    /// `Ok(false)` blocks deployment.
    async fn run(&self, decision: &DecisionRecord) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployRequest {
    pub network: Network,
    pub script: String,
    pub rpc_url: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub success: bool,
    /// Combined deploy output; scanned for the contract address.
    pub output: String,
}

#[async_trait]
pub trait Deployer: Send + Sync {
    async fn deploy(&self, request: &DeployRequest) -> anyhow::Result<DeployOutcome>;
}

#[async_trait]
pub trait GasReader: Send + Sync {
    async fn read(
        &self,
        request: &DeployRequest,
        outcome: &DeployOutcome,
    ) -> anyhow::Result<Option<GasInfo>>;
}

/// Everything known about a drop before it is published.
#[derive(Debug, Clone)]
pub struct DropDraft {
    pub run_id: String,
    pub decision: DecisionRecord,
    pub signal: TrendSignal,
    pub testnet: DeploymentRecord,
    pub mainnet: Option<DeploymentRecord>,
}

#[async_trait]
pub trait RepoPublisher: Send + Sync {
    /// Publish the drop's source and return its repository URL.
    async fn publish(&self, draft: &DropDraft) -> anyhow::Result<String>;
}

#[async_trait]
pub trait HostingProvisioner: Send + Sync {
    /// Provision hosting for a published repository and return its URL.
    async fn provision(&self, draft: &DropDraft, repo_url: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Broadcaster: Send + Sync {
    fn name(&self) -> &str;

    async fn announce(&self, drop: &DropRecord) -> anyhow::Result<()>;

    /// Post a digest of pool entries and return the posted text.
    async fn post_digest(&self, entries: &[TrendPoolEntry]) -> anyhow::Result<String>;
}

// ─── No-op enrichment ─────────────────────────────────────────────

/// Evidence builder that attaches nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

#[async_trait]
impl EvidenceBuilder for NoEvidence {
    async fn build(&self, _: &[TrendSignal], _: &Config) -> anyhow::Result<EvidenceMap> {
        Ok(EvidenceMap::new())
    }
}

/// Validator that leaves every score untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidation;

#[async_trait]
impl Validator for NoValidation {
    async fn validate(
        &self,
        _: &[TrendSignal],
        _: &EvidenceMap,
        _: &Config,
    ) -> anyhow::Result<ValidationMap> {
        Ok(ValidationMap::new())
    }
}

// ─── Bundle ───────────────────────────────────────────────────────

#[derive(Clone)]
pub struct Collaborators {
    pub sources: Vec<Arc<dyn SignalFetcher>>,
    pub evidence: Arc<dyn EvidenceBuilder>,
    pub validator: Arc<dyn Validator>,
    pub decision: Arc<dyn DecisionMaker>,
    pub test_gate: Arc<dyn TestGate>,
    pub deployer: Arc<dyn Deployer>,
    pub gas_reader: Arc<dyn GasReader>,
    pub repo: Arc<dyn RepoPublisher>,
    /// Optional; failures are logged and the drop proceeds without a URL.
    pub hosting: Option<Arc<dyn HostingProvisioner>>,
    pub broadcasters: Vec<Arc<dyn Broadcaster>>,
}
