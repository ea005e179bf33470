//! Daemon wiring: config, store, orchestrator, background loops and the
//! UDS server, with graceful shutdown on ctrl-c or SIGTERM.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use shipcycle_core::Config;
use shipcycle_core::queue::{JobKind, JobRequest};
use shipcycle_daemon::Orchestrator;
use shipcycle_daemon::health::{AlertSink, WebhookSink};
use shipcycle_daemon::store::{JsonDirBackend, StateStore};

use crate::cli::ConfigOpts;
use crate::local;
use crate::server;

/// Load the config at `path`, falling back to defaults when it does not exist.
pub(crate) fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = if path.exists() {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        config.validate()?;
        config
    };
    for warning in config.warnings() {
        tracing::warn!(path = %path.display(), "{warning}");
    }
    Ok(config)
}

pub async fn run_daemon(opts: ConfigOpts, socket_path: &str) -> anyhow::Result<()> {
    let config = Arc::new(load_config(&opts.config)?);

    let backend = JsonDirBackend::new(&config.store.dir, &config.store.namespace);
    tracing::info!(dir = %backend.dir().display(), "state store ready");
    let store = StateStore::new(Arc::new(backend));

    let collaborators = local::collaborators(&config.local);
    let orch = Arc::new(Orchestrator::new(Arc::clone(&config), store, collaborators));

    let mut tasks = Vec::new();

    // Pick up anything left queued by a previous run.
    let worker = orch.worker();
    worker.wake();
    tasks.push(tokio::spawn(worker.run()));

    if config.monitor.enabled {
        let sink = match &config.monitor.webhook_url {
            Some(url) => Some(Arc::new(WebhookSink::new(url.clone())?) as Arc<dyn AlertSink>),
            None => None,
        };
        let monitor = orch.health_monitor(sink);
        tasks.push(tokio::spawn(monitor.run()));
    }

    for (kind, interval) in [
        (JobKind::Run, config.schedule.run_interval()),
        (JobKind::Detect, config.schedule.detect_interval()),
    ] {
        if let Some(interval) = interval {
            tracing::info!(kind = %kind, every_secs = interval.as_secs(), "schedule enabled");
            tasks.push(tokio::spawn(run_schedule(Arc::clone(&orch), kind, interval)));
        }
    }

    let server_orch = Arc::clone(&orch);
    let server_socket = socket_path.to_string();
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server::run_server(&server_socket, server_orch).await {
            tracing::error!("server error: {e}");
        }
    });

    // Wait for shutdown signal (ctrl-c or SIGTERM)
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
            tokio::select! {
                _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
                _ = sigterm.recv() => tracing::info!("received SIGTERM, shutting down"),
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            tracing::info!("received ctrl-c, shutting down");
        }
        Ok::<(), std::io::Error>(())
    };

    let result = tokio::select! {
        r = shutdown => r.context("installing signal handlers"),
        _ = server_handle => {
            tracing::warn!("server exited unexpectedly");
            Ok(())
        }
    };

    for task in &tasks {
        task.abort();
    }

    // Cleanup socket
    let _ = std::fs::remove_file(socket_path);
    tracing::info!("daemon stopped");
    result
}

/// Enqueue a `kind` job every `interval`. The first tick is skipped so a
/// restart does not immediately trigger a cycle.
async fn run_schedule(orch: Arc<Orchestrator>, kind: JobKind, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let request = JobRequest::by("scheduler").with_reason("interval");
        let queued = match kind {
            JobKind::Run => orch.enqueue_run(request).await,
            JobKind::Detect => orch.enqueue_detection(request).await,
        };
        match queued {
            Ok(item) => tracing::debug!(kind = %kind, job_id = %item.id, "scheduled job queued"),
            Err(e) => tracing::error!(kind = %kind, error = %e, "scheduled enqueue failed"),
        }
    }
}
