//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use shipcycle_core::config::DEFAULT_CONFIG_FILE;
use shipcycle_core::queue::JobRequest;

#[derive(Parser)]
#[command(name = "shipcycle", about = "recurring build-and-ship cycle orchestrator")]
pub struct Cli {
    /// UDS socket path (default: /tmp/shipcycle-$USER/shipcycled.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the daemon (scheduler + queue worker + monitor + UDS server)
    Daemon(ConfigOpts),
    /// Show agent state
    Status,
    /// Show queued and active jobs
    Queue,
    /// Enqueue a full cycle
    Run(EnqueueOpts),
    /// Enqueue a detection-only pass
    Detect(EnqueueOpts),
    /// Block future cycles until resumed
    Pause,
    /// Allow cycles again
    Resume,
    /// Pin the next cycle to a signal id; omit the id to clear
    Override { signal_id: Option<String> },
    /// Drop every queued job and the active marker
    ClearQueue,
    /// List recent drops, newest first
    Drops(LimitOpts),
    /// List the best trend pool entries
    Trends(LimitOpts),
    /// Validate a config file and print the effective settings
    CheckConfig(ConfigOpts),
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    /// TOML config file
    #[arg(long, short = 'c', env = "SHIPCYCLE_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,
}

#[derive(clap::Args)]
pub struct EnqueueOpts {
    /// Free-form reason recorded on the job
    #[arg(long)]
    pub reason: Option<String>,

    /// Queue even when a job of the same kind is waiting (raises priority)
    #[arg(long)]
    pub force: bool,

    /// Explicit priority, overriding the kind's default
    #[arg(long, allow_negative_numbers = true)]
    pub priority: Option<i32>,

    /// Requester recorded on the job
    #[arg(long, default_value = "cli")]
    pub requested_by: String,
}

impl EnqueueOpts {
    pub fn into_request(self) -> JobRequest {
        JobRequest {
            requested_by: self.requested_by,
            reason: self.reason,
            force: self.force,
            source: Some("cli".to_string()),
            priority: self.priority,
        }
    }
}

#[derive(clap::Args)]
pub struct LimitOpts {
    #[arg(long, short = 'n', default_value = "10")]
    pub limit: usize,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/shipcycle/shipcycled.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/shipcycle-{user}/shipcycled.sock")
}
