//! Queue worker: drains the durable run queue one job at a time.
//!
//! The worker owns the drain. Enqueues and the busy-retry timer only wake it
//! through a [`Notify`]; an `AtomicBool` guard keeps drains from overlapping.
//! A drain stops when the queue is empty or the state machine is not idle,
//! and in the latter case at most one retry timer is pending.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use shipcycle_core::queue::{JobKind, JobRequest, QueueItem, RunQueue};
use shipcycle_core::types::RunResult;

use crate::pipeline::{CycleOutcome, DetectionOutcome, Pipeline, panic_message};
use crate::store::{StateStore, StoreError};

/// Executes dequeued jobs.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run_cycle(&self, run_id: &str) -> CycleOutcome;
    async fn run_detection(&self, run_id: &str) -> DetectionOutcome;
}

#[async_trait]
impl JobRunner for Pipeline {
    async fn run_cycle(&self, run_id: &str) -> CycleOutcome {
        Pipeline::run_cycle(self, run_id).await
    }

    async fn run_detection(&self, run_id: &str) -> DetectionOutcome {
        Pipeline::run_detection(self, run_id).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainReport {
    /// Another drain holds the guard.
    AlreadyDraining,
    Drained { processed: usize },
    /// State was not idle; a retry is pending.
    Busy { processed: usize },
    /// The store failed; a retry is pending.
    Failed { processed: usize },
}

enum Step {
    Ran,
    Empty,
    Busy,
}

enum Claim {
    Empty,
    Busy,
    Job(QueueItem),
}

/// Resets the drain flag however the drain exits.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QueueWorker {
    store: StateStore,
    runner: Arc<dyn JobRunner>,
    busy_retry: Duration,
    draining: AtomicBool,
    wake: Arc<Notify>,
    retry: Mutex<Option<JoinHandle<()>>>,
    sequence: AtomicU64,
}

impl QueueWorker {
    pub fn new(store: StateStore, runner: Arc<dyn JobRunner>, busy_retry: Duration) -> Self {
        Self {
            store,
            runner,
            busy_retry,
            draining: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            retry: Mutex::new(None),
            sequence: AtomicU64::new(0),
        }
    }

    fn next_job_id(&self, kind: JobKind, now: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{kind}-{}-{seq}", now.format("%Y%m%dT%H%M%S"))
    }

    /// Persist a request and wake the drain.
    ///
    /// Returns the queued item, or the already-queued item of the same kind
    /// when a non-forced request was dropped.
    pub async fn enqueue(&self, kind: JobKind, request: JobRequest) -> Result<QueueItem, StoreError> {
        let now = Utc::now();
        let item = QueueItem::new(self.next_job_id(kind, now), kind, request, now);
        let outcome = self.store.update_queue(|queue| queue.enqueue(item)).await?;

        let queued = outcome.item();
        if outcome.was_queued() {
            tracing::info!(
                job_id = %queued.id,
                kind = %kind,
                priority = queued.priority,
                requested_by = %queued.requested_by,
                "job queued"
            );
        } else {
            tracing::info!(job_id = %queued.id, kind = %kind, "same kind already queued; request dropped");
        }

        self.wake.notify_one();
        Ok(outcome.into_item())
    }

    pub async fn queue_state(&self) -> Result<RunQueue, StoreError> {
        self.store.queue().await
    }

    /// Empty the queue, drop the active marker and cancel a pending retry.
    pub async fn clear(&self) -> Result<usize, StoreError> {
        self.cancel_retry();
        let removed = self
            .store
            .update_queue(|queue| {
                let removed = queue.len();
                queue.clear();
                removed
            })
            .await?;
        tracing::info!(removed, "queue cleared");
        Ok(removed)
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Wake the drain loop.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Drain loop. Runs until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        // Pick up whatever was persisted before a restart.
        self.wake.notify_one();
        loop {
            self.wake.notified().await;
            let report = self.process_queue().await;
            tracing::debug!(report = ?report, "queue drain finished");
        }
    }

    /// Process queued jobs until the queue is empty or the state is busy.
    pub async fn process_queue(&self) -> DrainReport {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("queue drain already in progress");
            return DrainReport::AlreadyDraining;
        }
        let _guard = DrainGuard(&self.draining);

        let mut processed = 0;
        loop {
            match self.drain_step().await {
                Ok(Step::Ran) => processed += 1,
                Ok(Step::Empty) => return DrainReport::Drained { processed },
                Ok(Step::Busy) => {
                    self.schedule_retry();
                    return DrainReport::Busy { processed };
                }
                Err(e) => {
                    tracing::error!(error = %e, "queue drain failed");
                    self.schedule_retry();
                    return DrainReport::Failed { processed };
                }
            }
        }
    }

    async fn drain_step(&self) -> Result<Step, StoreError> {
        let idle = self.store.agent_state().await?.current_phase.is_idle();
        let now = Utc::now();

        let claim = self
            .store
            .update_queue(move |queue| {
                // The drain guard is held, so an active marker seen while
                // idle belongs to a run that never finished.
                if idle && let Some(stale) = queue.finish() {
                    tracing::warn!(job_id = %stale.item.id, "clearing stale active job");
                }
                if queue.is_empty() {
                    return Claim::Empty;
                }
                if !idle {
                    return Claim::Busy;
                }
                match queue.pop_next() {
                    Some(item) => {
                        queue.start(item.clone(), now);
                        Claim::Job(item)
                    }
                    None => Claim::Empty,
                }
            })
            .await?;

        let item = match claim {
            Claim::Empty => return Ok(Step::Empty),
            Claim::Busy => return Ok(Step::Busy),
            Claim::Job(item) => item,
        };

        tracing::info!(
            job_id = %item.id,
            kind = %item.kind,
            requested_by = %item.requested_by,
            "job started"
        );
        let job = async {
            match item.kind {
                JobKind::Run => self.runner.run_cycle(&item.id).await.result(),
                JobKind::Detect => self.runner.run_detection(&item.id).await.result(),
            }
        };
        let result = match AssertUnwindSafe(job).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                tracing::error!(job_id = %item.id, panic = %panic_message(&*panic), "job panicked");
                RunResult::Failed
            }
        };
        tracing::info!(job_id = %item.id, result = %result, "job finished");

        self.store
            .update_queue(|queue| {
                queue.finish();
            })
            .await?;
        Ok(Step::Ran)
    }

    fn schedule_retry(&self) {
        let mut slot = self.retry.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        let wake = Arc::clone(&self.wake);
        let delay = self.busy_retry;
        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            wake.notify_one();
        }));
        tracing::debug!(delay = ?delay, "queue drain retry scheduled");
    }

    fn cancel_retry(&self) {
        if let Some(handle) = self
            .retry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.cancel_retry();
    }
}

// ─── Tests ────────────────────────────────────────────────────────
