//! Built-in collaborators wired by the daemon binary.
//!
//! Everything here works offline: signals come from JSON files, decisions
//! from a score rule, tests and deploys from configured commands, and drops
//! are published into a local directory. Hosted integrations plug in through
//! the same traits.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use shipcycle_core::Config;
use shipcycle_core::config::LocalConfig;
use shipcycle_core::scoring::MAX_SCORE;
use shipcycle_core::types::{
    DecisionRecord, DropRecord, GasInfo, GeneratedFile, TrendPoolEntry, TrendSignal,
};
use shipcycle_daemon::collaborators::{
    Broadcaster, Collaborators, DecisionContext, DecisionMaker, DeployOutcome, DeployRequest,
    Deployer, DropDraft, EvidenceMap, GasReader, NoEvidence, NoValidation, RepoPublisher,
    SignalFetcher, TestGate,
};
use shipcycle_daemon::pipeline::{product_name, ticker_symbol};

const WEI_PER_ETH: f64 = 1e18;

/// Build the collaborator set described by `[local]`.
pub fn collaborators(config: &LocalConfig) -> Collaborators {
    Collaborators {
        sources: config
            .signal_files
            .iter()
            .map(|path| Arc::new(JsonFileSource::new(path.clone())) as Arc<dyn SignalFetcher>)
            .collect(),
        evidence: Arc::new(NoEvidence),
        validator: Arc::new(NoValidation),
        decision: Arc::new(RuleBasedDecision),
        test_gate: Arc::new(CommandTestGate::new(
            config.test_command.clone(),
            config.workdir.clone(),
        )),
        deployer: Arc::new(CommandDeployer::new(
            config.deploy_command.clone(),
            config.workdir.clone(),
        )),
        gas_reader: Arc::new(OutputGasReader),
        repo: Arc::new(DirectoryPublisher::new(
            config.publish_dir.clone(),
            config.publish_base_url.clone(),
        )),
        hosting: None,
        broadcasters: vec![Arc::new(LogBroadcaster::new(config.broadcast_log.clone()))],
    }
}

// ─── Signals ──────────────────────────────────────────────────────

/// Reads a JSON array of signals on every fetch. A missing file yields none.
pub struct JsonFileSource {
    path: PathBuf,
    name: String,
}

impl JsonFileSource {
    pub fn new(path: PathBuf) -> Self {
        let name = format!("file:{}", path.display());
        Self { path, name }
    }
}

#[async_trait]
impl SignalFetcher for JsonFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, _: &Config) -> anyhow::Result<Vec<TrendSignal>> {
        let text = match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "signal file missing");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e).with_context(|| format!("reading {}", self.path.display())),
        };
        serde_json::from_str(&text).with_context(|| format!("parsing {}", self.path.display()))
    }
}

// ─── Decision ─────────────────────────────────────────────────────

/// Goes with the best non-suggestion signal when it clears `min_score`.
pub struct RuleBasedDecision;

#[async_trait]
impl DecisionMaker for RuleBasedDecision {
    async fn decide(
        &self,
        signals: &[TrendSignal],
        _: &EvidenceMap,
        _: &DecisionContext,
        config: &Config,
    ) -> anyhow::Result<Option<DecisionRecord>> {
        let Some(top) = signals.iter().find(|s| !s.is_suggestion()) else {
            return Ok(None);
        };
        let name = product_name(&top.summary);
        Ok(Some(DecisionRecord {
            go: top.score >= config.pipeline.min_score,
            confidence: (top.score / MAX_SCORE).clamp(0.0, 1.0),
            signal_id: Some(top.id.clone()),
            symbol: ticker_symbol(&name),
            name,
            description: top.summary.clone(),
            rationale: format!("highest ranked {} signal scored {:.1}", top.source, top.score),
            files: Vec::new(),
            fallback: false,
            decided_at: None,
            run_id: None,
        }))
    }
}

// ─── Commands ─────────────────────────────────────────────────────

/// Reject generated paths that would escape the working directory.
fn relative_path(path: &str) -> anyhow::Result<&Path> {
    let p = Path::new(path);
    if p.as_os_str().is_empty() || !p.components().all(|c| matches!(c, Component::Normal(_))) {
        bail!("generated file path must stay inside the workdir: {path:?}");
    }
    Ok(p)
}

async fn materialize(root: &Path, files: &[GeneratedFile]) -> anyhow::Result<()> {
    for file in files {
        let target = root.join(relative_path(&file.path)?);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &file.contents)
            .await
            .with_context(|| format!("writing {}", target.display()))?;
    }
    Ok(())
}

/// Writes the decision's files into the workdir, then runs the test command.
/// An empty command passes.
pub struct CommandTestGate {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandTestGate {
    pub fn new(command: Vec<String>, workdir: PathBuf) -> Self {
        Self { command, workdir }
    }
}

#[async_trait]
impl TestGate for CommandTestGate {
    async fn run(&self, decision: &DecisionRecord) -> anyhow::Result<bool> {
        tokio::fs::create_dir_all(&self.workdir).await?;
        materialize(&self.workdir, &decision.files).await?;

        let Some((program, args)) = self.command.split_first() else {
            return Ok(true);
        };
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .await
            .with_context(|| format!("spawning test command {program}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(
                code = output.status.code().unwrap_or(-1),
                stderr = %stderr.trim(),
                "test command failed"
            );
        }
        Ok(output.status.success())
    }
}

/// Runs `<command> <script> --rpc-url <url>` with the request env.
pub struct CommandDeployer {
    command: Vec<String>,
    workdir: PathBuf,
}

impl CommandDeployer {
    pub fn new(command: Vec<String>, workdir: PathBuf) -> Self {
        Self { command, workdir }
    }
}

#[async_trait]
impl Deployer for CommandDeployer {
    async fn deploy(&self, request: &DeployRequest) -> anyhow::Result<DeployOutcome> {
        let Some((program, args)) = self.command.split_first() else {
            bail!("local.deploy_command is empty");
        };
        tokio::fs::create_dir_all(&self.workdir).await?;
        let output = tokio::process::Command::new(program)
            .args(args)
            .arg(&request.script)
            .args(["--rpc-url", request.rpc_url.as_str()])
            .envs(&request.env)
            .current_dir(&self.workdir)
            .output()
            .await
            .with_context(|| format!("spawning deploy command {program}"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(DeployOutcome {
            success: output.status.success(),
            output: combined,
        })
    }
}

/// Reads `Transaction hash:`, `Gas used:` and `Gas price:` lines from the
/// deploy output.
pub struct OutputGasReader;

#[async_trait]
impl GasReader for OutputGasReader {
    async fn read(&self, _: &DeployRequest, outcome: &DeployOutcome) -> anyhow::Result<Option<GasInfo>> {
        Ok(parse_gas(&outcome.output))
    }
}

#[allow(clippy::cast_precision_loss)]
fn parse_gas(output: &str) -> Option<GasInfo> {
    let mut tx_hash = None;
    let mut gas_used = None;
    let mut gas_price = None;
    for line in output.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.split_whitespace().next().unwrap_or_default();
        match key.trim().to_ascii_lowercase().as_str() {
            "transaction hash" | "tx hash" => tx_hash = Some(value.to_string()),
            "gas used" => gas_used = value.parse::<u64>().ok(),
            "gas price" => gas_price = value.parse::<u64>().ok(),
            _ => {}
        }
    }
    let (tx_hash, gas_used) = (tx_hash?, gas_used?);
    let gas_price = gas_price.unwrap_or(0);
    Some(GasInfo {
        tx_hash,
        gas_used,
        gas_price,
        gas_cost_eth: gas_used as f64 * gas_price as f64 / WEI_PER_ETH,
    })
}

// ─── Publishing ───────────────────────────────────────────────────

/// Publishes each drop into `<dir>/<run id>/` with its files and a
/// `drop.json` manifest.
pub struct DirectoryPublisher {
    dir: PathBuf,
    base_url: Option<String>,
}

impl DirectoryPublisher {
    pub fn new(dir: PathBuf, base_url: Option<String>) -> Self {
        Self { dir, base_url }
    }
}

#[async_trait]
impl RepoPublisher for DirectoryPublisher {
    async fn publish(&self, draft: &DropDraft) -> anyhow::Result<String> {
        let target = self.dir.join(relative_path(&draft.run_id)?);
        tokio::fs::create_dir_all(&target).await?;
        materialize(&target, &draft.decision.files).await?;

        let manifest = serde_json::json!({
            "run_id": draft.run_id,
            "name": draft.decision.name,
            "symbol": draft.decision.symbol,
            "description": draft.decision.description,
            "signal": draft.signal,
            "testnet": draft.testnet,
            "mainnet": draft.mainnet,
        });
        let mut body = serde_json::to_string_pretty(&manifest)?;
        body.push('\n');
        tokio::fs::write(target.join("drop.json"), body).await?;

        Ok(match &self.base_url {
            Some(base) => format!("{}/{}", base.trim_end_matches('/'), draft.run_id),
            None => format!("file://{}", target.display()),
        })
    }
}

// ─── Broadcast ────────────────────────────────────────────────────

/// Logs every post and appends it to an optional file.
pub struct LogBroadcaster {
    path: Option<PathBuf>,
}

impl LogBroadcaster {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    async fn append(&self, text: &str) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        file.write_all(format!("{text}\n").as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

pub(crate) fn announcement_text(drop: &DropRecord) -> String {
    let mut text = format!(
        "New drop: {} (${}): {}",
        drop.decision.name, drop.decision.symbol, drop.decision.description
    );
    if let Some(address) = &drop.testnet.address {
        text.push_str(&format!(" | testnet {address}"));
    }
    if let Some(address) = drop.mainnet.as_ref().and_then(|m| m.address.as_ref()) {
        text.push_str(&format!(" | mainnet {address}"));
    }
    text.push_str(&format!(" | {}", drop.hosting_url.as_deref().unwrap_or(&drop.repo_url)));
    text
}

pub(crate) fn digest_text(entries: &[TrendPoolEntry]) -> String {
    let lines: Vec<String> = entries
        .iter()
        .enumerate()
        .map(|(i, e)| format!("{}. [{}] {}", i + 1, e.signal.source, e.signal.summary))
        .collect();
    format!("Trending now:\n{}", lines.join("\n"))
}

#[async_trait]
impl Broadcaster for LogBroadcaster {
    fn name(&self) -> &str {
        "log"
    }

    async fn announce(&self, drop: &DropRecord) -> anyhow::Result<()> {
        let text = announcement_text(drop);
        tracing::info!(drop_id = %drop.id, "{text}");
        self.append(&text).await
    }

    async fn post_digest(&self, entries: &[TrendPoolEntry]) -> anyhow::Result<String> {
        let text = digest_text(entries);
        tracing::info!(entries = entries.len(), "{text}");
        self.append(&text).await?;
        Ok(text)
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use shipcycle_core::types::{DeploymentRecord, Network, SignalSource};

    fn decision(files: Vec<GeneratedFile>) -> DecisionRecord {
        DecisionRecord {
            go: true,
            confidence: 0.9,
            signal_id: Some("s1".into()),
            name: "Frog Coin".into(),
            symbol: "FROG".into(),
            description: "frogs".into(),
            rationale: String::new(),
            files,
            fallback: false,
            decided_at: None,
            run_id: None,
        }
    }

    fn draft(run_id: &str) -> DropDraft {
        DropDraft {
            run_id: run_id.to_string(),
            decision: decision(vec![GeneratedFile {
                path: "src/Frog.sol".into(),
                contents: "contract Frog {}".into(),
            }]),
            signal: TrendSignal::new("s1", SignalSource::Github, "frogs", "2026-03-10T00:00:00Z"),
            testnet: DeploymentRecord {
                network: Network::Testnet,
                address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into()),
                gas: None,
            },
            mainnet: None,
        }
    }

    #[tokio::test]
    async fn json_file_source_reads_signals() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let path = tmp.path().join("signals.json");
        std::fs::write(
            &path,
            r#"[{"id":"s1","source":"github","summary":"frogs","captured_at":"2026-03-10T00:00:00Z","engagement":12}]"#,
        )
        .expect("write signals");

        let source = JsonFileSource::new(path);
        let signals = source.fetch(&Config::default()).await.expect("fetch");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].source, SignalSource::Github);
        assert_eq!(signals[0].engagement, Some(12.0));
    }

    #[tokio::test]
    async fn json_file_source_missing_file_is_empty() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = JsonFileSource::new(tmp.path().join("absent.json"));
        assert!(source.fetch(&Config::default()).await.expect("fetch").is_empty());
    }

    #[tokio::test]
    async fn rule_decision_respects_min_score() {
        let mut strong = TrendSignal::new("a", SignalSource::Github, "frog coin mania", "t");
        strong.score = 8.0;
        let mut suggestion = TrendSignal::new("s", SignalSource::Suggestion, "x", "t");
        suggestion.score = 10.0;
        let config = Config::default();

        let decision = RuleBasedDecision
            .decide(&[suggestion, strong.clone()], &EvidenceMap::new(), &DecisionContext::default(), &config)
            .await
            .expect("decide")
            .expect("a decision");
        assert!(decision.go);
        assert_eq!(decision.signal_id.as_deref(), Some("a"));
        assert_eq!(decision.name, "Frog Coin Mania");
        assert!((decision.confidence - 0.8).abs() < 1e-9);

        strong.score = 1.0;
        let decision = RuleBasedDecision
            .decide(&[strong], &EvidenceMap::new(), &DecisionContext::default(), &config)
            .await
            .expect("decide")
            .expect("a decision");
        assert!(!decision.go);
    }

    #[tokio::test]
    async fn empty_test_command_passes_and_writes_files() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let gate = CommandTestGate::new(Vec::new(), tmp.path().join("work"));
        let files = vec![GeneratedFile {
            path: "src/Frog.sol".into(),
            contents: "contract Frog {}".into(),
        }];
        assert!(gate.run(&decision(files)).await.expect("gate"));
        let written = std::fs::read_to_string(tmp.path().join("work/src/Frog.sol")).expect("file");
        assert_eq!(written, "contract Frog {}");
    }

    #[tokio::test]
    async fn test_command_exit_status_decides() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let pass = CommandTestGate::new(vec!["true".into()], tmp.path().to_path_buf());
        let fail = CommandTestGate::new(vec!["false".into()], tmp.path().to_path_buf());
        assert!(pass.run(&decision(Vec::new())).await.expect("gate"));
        assert!(!fail.run(&decision(Vec::new())).await.expect("gate"));
    }

    #[tokio::test]
    async fn escaping_paths_are_rejected() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let gate = CommandTestGate::new(Vec::new(), tmp.path().to_path_buf());
        let files = vec![GeneratedFile {
            path: "../outside.txt".into(),
            contents: String::new(),
        }];
        assert!(gate.run(&decision(files)).await.is_err());
    }

    #[tokio::test]
    async fn deployer_passes_script_rpc_and_env() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let deployer = CommandDeployer::new(
            vec!["sh".into(), "-c".into(), r#"echo "$TOKEN_NAME $0 $1 $2""#.into()],
            tmp.path().to_path_buf(),
        );
        let request = DeployRequest {
            network: Network::Testnet,
            script: "script/Deploy.s.sol".into(),
            rpc_url: "https://rpc.example".into(),
            env: [("TOKEN_NAME".to_string(), "Frog".to_string())].into(),
        };
        let outcome = deployer.deploy(&request).await.expect("deploy");
        assert!(outcome.success);
        assert_eq!(
            outcome.output.trim(),
            "Frog script/Deploy.s.sol --rpc-url https://rpc.example"
        );
    }

    #[test]
    fn gas_lines_are_parsed() {
        let output = "Transaction hash: 0xdeadbeef\nGas used: 210000\nGas price: 2000000000 wei\n";
        let gas = parse_gas(output).expect("gas info");
        assert_eq!(gas.tx_hash, "0xdeadbeef");
        assert_eq!(gas.gas_used, 210_000);
        assert_eq!(gas.gas_price, 2_000_000_000);
        assert!((gas.gas_cost_eth - 0.00042).abs() < 1e-12);
        assert!(parse_gas("Gas used: 5").is_none());
    }

    #[tokio::test]
    async fn directory_publisher_writes_manifest() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let publisher = DirectoryPublisher::new(tmp.path().to_path_buf(), Some("https://drops.example/".into()));
        let url = publisher.publish(&draft("run-1")).await.expect("publish");
        assert_eq!(url, "https://drops.example/run-1");

        let manifest: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(tmp.path().join("run-1/drop.json")).expect("manifest"),
        )
        .expect("json");
        assert_eq!(manifest["symbol"], "FROG");
        assert!(tmp.path().join("run-1/src/Frog.sol").exists());
    }

    #[tokio::test]
    async fn log_broadcaster_appends_posts() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let log = tmp.path().join("posts.log");
        let broadcaster = LogBroadcaster::new(Some(log.clone()));
        let d = draft("run-2");
        let drop = DropRecord {
            id: "drop-run-2".into(),
            run_id: d.run_id,
            created_at: chrono::Utc::now(),
            decision: d.decision,
            signal: d.signal,
            testnet: d.testnet,
            mainnet: None,
            repo_url: "https://drops.example/run-2".into(),
            hosting_url: None,
        };
        broadcaster.announce(&drop).await.expect("announce");
        broadcaster.announce(&drop).await.expect("announce");

        let text = std::fs::read_to_string(&log).expect("log");
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("New drop: Frog Coin ($FROG): frogs | testnet 0x5FbDB"));
        assert!(text.lines().all(|l| l.ends_with("https://drops.example/run-2")));
    }
}
