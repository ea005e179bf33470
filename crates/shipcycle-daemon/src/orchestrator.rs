//! Admin-facing facade over the store, pipeline and queue worker.

use std::sync::Arc;

use shipcycle_core::Config;
use shipcycle_core::queue::{JobKind, JobRequest, QueueItem, RunQueue};
use shipcycle_core::trend_pool::sort_for_selection;
use shipcycle_core::types::{AgentState, DropRecord, TrendPoolEntry};

use crate::collaborators::Collaborators;
use crate::health::{AlertSink, HealthMonitor};
use crate::pipeline::Pipeline;
use crate::run_queue::QueueWorker;
use crate::store::{StateStore, StoreError};

pub struct Orchestrator {
    config: Arc<Config>,
    store: StateStore,
    worker: Arc<QueueWorker>,
}

impl Orchestrator {
    pub fn new(config: Arc<Config>, store: StateStore, collaborators: Collaborators) -> Self {
        let pipeline = Pipeline::new(Arc::clone(&config), store.clone(), collaborators);
        let worker = QueueWorker::new(store.clone(), Arc::new(pipeline), config.queue.busy_retry());
        Self {
            config,
            store,
            worker: Arc::new(worker),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn worker(&self) -> Arc<QueueWorker> {
        Arc::clone(&self.worker)
    }

    pub fn health_monitor(&self, sink: Option<Arc<dyn AlertSink>>) -> HealthMonitor {
        HealthMonitor::new(self.store.clone(), self.config.monitor.clone(), sink)
    }

    pub async fn enqueue_run(&self, request: JobRequest) -> Result<QueueItem, StoreError> {
        self.worker.enqueue(JobKind::Run, request).await
    }

    pub async fn enqueue_detection(&self, request: JobRequest) -> Result<QueueItem, StoreError> {
        self.worker.enqueue(JobKind::Detect, request).await
    }

    pub async fn queue_state(&self) -> Result<RunQueue, StoreError> {
        self.worker.queue_state().await
    }

    pub async fn clear_queue(&self) -> Result<usize, StoreError> {
        self.worker.clear().await
    }

    pub async fn state(&self) -> Result<AgentState, StoreError> {
        self.store.agent_state().await
    }

    pub async fn pause(&self) -> Result<AgentState, StoreError> {
        let state = self
            .store
            .update_agent_state(|state| {
                state.paused = true;
                state.clone()
            })
            .await?;
        tracing::info!("agent paused");
        Ok(state)
    }

    pub async fn resume(&self) -> Result<AgentState, StoreError> {
        let state = self
            .store
            .update_agent_state(|state| {
                state.paused = false;
                state.clone()
            })
            .await?;
        tracing::info!("agent resumed");
        self.worker.wake();
        Ok(state)
    }

    /// Pin the next cycle to `signal_id`, or clear the pin with `None`.
    pub async fn set_override(&self, signal_id: Option<String>) -> Result<AgentState, StoreError> {
        let signal_id = signal_id.filter(|id| !id.trim().is_empty());
        tracing::info!(signal_id = ?signal_id, "override updated");
        self.store
            .update_agent_state(move |state| {
                state.override_signal_id = signal_id;
                state.clone()
            })
            .await
    }

    /// Most recent drops, newest first.
    pub async fn recent_drops(&self, limit: usize) -> Result<Vec<DropRecord>, StoreError> {
        let mut drops = self.store.drops().await?;
        drops.reverse();
        drops.truncate(limit);
        Ok(drops)
    }

    /// Best pool entries in selection order.
    pub async fn trend_pool(&self, limit: usize) -> Result<Vec<TrendPoolEntry>, StoreError> {
        let mut entries = self.store.trend_pool().await?.entries().to_vec();
        sort_for_selection(&mut entries);
        entries.truncate(limit);
        Ok(entries)
    }
}

// ─── Tests ────────────────────────────────────────────────────────
