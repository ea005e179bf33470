//! shipcycle: build-and-ship cycle orchestrator binary.
//! The `daemon` subcommand runs every component in-process; the rest talk to
//! it over the UDS JSON-RPC socket.

use clap::Parser;

mod cli;
mod client;
mod daemon;
mod local;
mod rpc;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Daemon(opts) => {
            let filter = std::env::var("SHIPCYCLE_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("shipcycle daemon starting");
            daemon::run_daemon(opts, &socket_path).await?;
        }
        cli::Command::Status => client::cmd_status(&socket_path).await?,
        cli::Command::Queue => {
            client::cmd_print(&socket_path, "get_queue_state", serde_json::Value::Null).await?;
        }
        cli::Command::Run(opts) => {
            let params = serde_json::to_value(opts.into_request())?;
            client::cmd_print(&socket_path, "enqueue_run", params).await?;
        }
        cli::Command::Detect(opts) => {
            let params = serde_json::to_value(opts.into_request())?;
            client::cmd_print(&socket_path, "enqueue_detection", params).await?;
        }
        cli::Command::Pause => client::cmd_status_after(&socket_path, "pause").await?,
        cli::Command::Resume => client::cmd_status_after(&socket_path, "resume").await?,
        cli::Command::Override { signal_id } => {
            let params = serde_json::json!({ "signal_id": signal_id });
            client::cmd_print(&socket_path, "set_override", params).await?;
        }
        cli::Command::ClearQueue => {
            client::cmd_print(&socket_path, "clear_queue", serde_json::Value::Null).await?;
        }
        cli::Command::Drops(opts) => {
            let params = serde_json::json!({ "limit": opts.limit });
            client::cmd_print(&socket_path, "recent_drops", params).await?;
        }
        cli::Command::Trends(opts) => {
            let params = serde_json::json!({ "limit": opts.limit });
            client::cmd_print(&socket_path, "trend_pool", params).await?;
        }
        cli::Command::CheckConfig(opts) => {
            let config = shipcycle_core::Config::load(&opts.config)?;
            for warning in config.warnings() {
                eprintln!("warning: {warning}");
            }
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
