//! Workload scheduler: multiplexes many workloads over a small worker pool.
//!
//! Each tick pops a ready workload, runs one `step()`, and then requeues,
//! parks or retires it according to the outcome. Parked workloads wait for
//! an input signal. A failing or panicking step only affects its own
//! workload.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::events::Notifier;
use crate::gateway::Gateway;
use crate::pipeline::processor::{
    ApprovedDraft, DEFAULT_MAX_STAGE_FAILURES, Disposition, StepOutcome, WorkloadProcessor,
};
use crate::pipeline::stage::ProcessingStage;
use crate::pipeline::types::{RerunFlags, WorkloadId, WorkloadSeed, WorkloadState};
use crate::store::RecordStore;
use crate::worker::queue::{Claim, QueueSnapshot, QueueState, Slot};

/// Scheduler tuning.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Upper bound on an idle wait; wake-ups normally come from notifications.
    pub poll_interval: Duration,
    pub max_concurrent_steps: usize,
    pub max_stage_failures: u32,
    /// Return from `run()` once every known workload is terminal.
    pub exit_when_idle: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            max_concurrent_steps: 1,
            max_stage_failures: DEFAULT_MAX_STAGE_FAILURES,
            exit_when_idle: false,
        }
    }
}

/// A workload's persisted state plus where the scheduler has it.
#[derive(Debug, Clone, Serialize)]
pub struct WorkloadStatus {
    pub state: WorkloadState,
    pub slot: Option<Slot>,
}

/// What happened to one workload during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub workload: WorkloadId,
    pub disposition: Disposition,
    pub stage: ProcessingStage,
}

pub struct Scheduler {
    store: Arc<dyn RecordStore>,
    gateway: Gateway,
    notifier: Arc<dyn Notifier>,
    config: SchedulerConfig,
    queue: Mutex<QueueState>,
    /// Something became ready, or shutdown was requested.
    wake: Notify,
    /// A running workload was released.
    released: Notify,
    stopping: AtomicBool,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        gateway: Gateway,
        notifier: Arc<dyn Notifier>,
        config: SchedulerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateway,
            notifier,
            config,
            queue: Mutex::new(QueueState::new()),
            wake: Notify::new(),
            released: Notify::new(),
            stopping: AtomicBool::new(false),
        })
    }

    fn processor(&self, id: &WorkloadId) -> WorkloadProcessor {
        WorkloadProcessor::new(
            id.clone(),
            self.store.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
        )
        .with_max_stage_failures(self.config.max_stage_failures)
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Pick up every persisted workload. Non-terminal ones are queued.
    pub async fn resume_all(&self) -> Result<usize> {
        let workloads = self.store.list_workloads().await?;
        let mut queue = self.queue.lock().await;
        let mut resumed = 0;
        for state in workloads {
            queue.track(&state.id, state.stage);
            if state.stage.is_terminal() {
                if queue.locate(&state.id).is_none() {
                    queue.claim(&state.id);
                    queue.settle(&state.id, Disposition::Retire, state.stage);
                }
            } else if queue.enqueue(&state.id) {
                resumed += 1;
            }
        }
        drop(queue);
        if resumed > 0 {
            info!(count = resumed, "Resumed workloads");
            self.wake.notify_one();
        }
        Ok(resumed)
    }

    /// Register a workload, or resume it if it already exists.
    pub async fn register(
        &self,
        id: WorkloadId,
        seed: WorkloadSeed,
        rerun: RerunFlags,
    ) -> Result<WorkloadState> {
        let previous = self.claim(&id).await;
        match self.processor(&id).register(seed, rerun).await {
            Ok(state) => {
                self.release(&id, state.stage, Disposition::Requeue).await;
                Ok(state)
            }
            Err(e) => {
                self.restore(&id, previous).await;
                Err(e)
            }
        }
    }

    /// Record a selection and queue the workload.
    pub async fn submit_selection(&self, id: &WorkloadId, indices: &[usize]) -> Result<WorkloadState> {
        self.known(id).await?;
        let previous = self.claim(id).await;
        match self.processor(id).submit_selection(indices).await {
            Ok(state) => {
                self.release(id, state.stage, Disposition::Requeue).await;
                Ok(state)
            }
            Err(e) => {
                self.restore(id, previous).await;
                Err(e)
            }
        }
    }

    /// Store approved drafts and queue the workload.
    pub async fn submit_approved_drafts(
        &self,
        id: &WorkloadId,
        drafts: &[ApprovedDraft],
    ) -> Result<WorkloadState> {
        self.known(id).await?;
        let previous = self.claim(id).await;
        match self.processor(id).submit_approved_drafts(drafts).await {
            Ok(state) => {
                self.release(id, state.stage, Disposition::Requeue).await;
                Ok(state)
            }
            Err(e) => {
                self.restore(id, previous).await;
                Err(e)
            }
        }
    }

    /// Input for a waiting workload is now available.
    pub async fn signal_input(&self, id: &WorkloadId) -> Result<()> {
        self.known(id).await?;
        let mut queue = self.queue.lock().await;
        if queue.enqueue(id) {
            debug!(workload = %id, "Input signalled, workload queued");
            drop(queue);
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Force a workload to `Error`. A step or operator action in flight is
    /// allowed to finish, then the workload is failed and never retried.
    pub async fn cancel(&self, id: &WorkloadId) -> Result<()> {
        self.known(id).await?;
        let previous = {
            let mut queue = self.queue.lock().await;
            match queue.claim(id) {
                Claim::Busy => {
                    queue.mark_cancelled(id);
                    info!(workload = %id, "Cancel requested for running workload");
                    return Ok(());
                }
                Claim::Claimed(previous) => previous,
            }
        };
        match self.processor(id).force_error("cancelled by operator").await {
            Ok(state) => {
                self.release(id, state.stage, Disposition::Retire).await;
                info!(workload = %id, "Workload cancelled");
                Ok(())
            }
            Err(e) => {
                self.restore(id, previous).await;
                Err(e)
            }
        }
    }

    /// Move a workload to `stage` and queue it.
    pub async fn reset(&self, id: &WorkloadId, stage: ProcessingStage) -> Result<WorkloadState> {
        self.known(id).await?;
        let previous = self.claim(id).await;
        match self.processor(id).reset(stage).await {
            Ok(state) => {
                self.release(id, state.stage, Disposition::Requeue).await;
                Ok(state)
            }
            Err(e) => {
                self.restore(id, previous).await;
                Err(e)
            }
        }
    }

    pub async fn status(&self, id: &WorkloadId) -> Result<WorkloadStatus> {
        let state = self.processor(id).load().await?;
        let slot = self.queue.lock().await.locate(id);
        Ok(WorkloadStatus { state, slot })
    }

    pub async fn snapshot(&self) -> QueueSnapshot {
        self.queue.lock().await.snapshot()
    }

    /// Ask `run()` to return once in-flight steps finish.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    // ── Driving ─────────────────────────────────────────────────────

    /// Run one step of the next ready workload, inline.
    pub async fn run_once(&self) -> Option<TickReport> {
        let id = self.queue.lock().await.pop_ready()?;
        let result = run_step(self.processor(&id)).await;
        Some(self.settle(&id, result).await)
    }

    /// Drive workloads until shutdown, or until everything is terminal when
    /// `exit_when_idle` is set.
    pub async fn run(&self) -> Result<()> {
        let mut in_flight: JoinSet<(WorkloadId, std::result::Result<StepOutcome, String>)> =
            JoinSet::new();
        let max = self.config.max_concurrent_steps.max(1);

        info!(max_concurrent_steps = max, "Scheduler started");

        loop {
            if self.stopping.load(Ordering::SeqCst) {
                break;
            }

            while in_flight.len() < max {
                let Some(id) = self.queue.lock().await.pop_ready() else {
                    break;
                };
                let processor = self.processor(&id);
                in_flight.spawn(async move { (id, run_step(processor).await) });
            }

            if in_flight.is_empty() {
                if self.config.exit_when_idle && self.queue.lock().await.is_finished() {
                    info!("All workloads terminal, scheduler exiting");
                    return Ok(());
                }
                tokio::select! {
                    _ = self.wake.notified() => {}
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
                continue;
            }

            tokio::select! {
                Some(joined) = in_flight.join_next() => match joined {
                    Ok((id, result)) => {
                        self.settle(&id, result).await;
                    }
                    Err(e) => error!(error = %e, "Step task aborted"),
                },
                _ = self.wake.notified() => {}
            }
        }

        // Let in-flight steps finish so their results are persisted.
        while let Some(joined) = in_flight.join_next().await {
            match joined {
                Ok((id, result)) => {
                    self.settle(&id, result).await;
                }
                Err(e) => error!(error = %e, "Step task aborted"),
            }
        }
        info!("Scheduler stopped");
        Ok(())
    }

    /// Apply a step result to the queue.
    async fn settle(
        &self,
        id: &WorkloadId,
        result: std::result::Result<StepOutcome, String>,
    ) -> TickReport {
        let cancelled = self.queue.lock().await.take_cancelled(id);

        let (disposition, stage) = if cancelled {
            self.fail_workload(id, "cancelled by operator").await
        } else {
            match result {
                Ok(outcome) => {
                    debug!(
                        workload = %id,
                        worked = outcome.worked,
                        stage = %outcome.stage,
                        "Step finished"
                    );
                    (outcome.disposition(), outcome.stage)
                }
                Err(e) => {
                    error!(workload = %id, error = %e, "Step failed");
                    self.fail_workload(id, &e).await
                }
            }
        };

        self.release(id, stage, disposition).await;
        TickReport {
            workload: id.clone(),
            disposition,
            stage,
        }
    }

    /// Best-effort force to `Error` after a step error or panic.
    async fn fail_workload(&self, id: &WorkloadId, reason: &str) -> (Disposition, ProcessingStage) {
        if let Err(e) = self.processor(id).force_error(reason).await {
            warn!(workload = %id, error = %e, "Could not mark workload failed");
        }
        (Disposition::Retire, ProcessingStage::Error)
    }

    // ── Exclusive access ────────────────────────────────────────────

    async fn known(&self, id: &WorkloadId) -> Result<()> {
        if self.queue.lock().await.is_known(id) {
            return Ok(());
        }
        // Created by another process since we started.
        let state = self.processor(id).load().await?;
        let mut queue = self.queue.lock().await;
        if !queue.is_known(id) {
            queue.track(id, state.stage);
            if state.stage.is_terminal() {
                queue.claim(id);
                queue.settle(id, Disposition::Retire, state.stage);
            } else {
                queue.claim(id);
                queue.settle(id, Disposition::Park, state.stage);
            }
        }
        Ok(())
    }

    /// Wait until no step is in flight for `id`, then hold it as running.
    async fn claim(&self, id: &WorkloadId) -> Option<Slot> {
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Claim::Claimed(previous) = self.queue.lock().await.claim(id) {
                return previous;
            }
            released.await;
        }
    }

    async fn release(&self, id: &WorkloadId, stage: ProcessingStage, disposition: Disposition) {
        // A cancel that arrived while we held the workload wins.
        let (disposition, stage) = if self.queue.lock().await.take_cancelled(id) {
            info!(workload = %id, "Applying cancel deferred while workload was held");
            self.fail_workload(id, "cancelled by operator").await
        } else {
            (disposition, stage)
        };
        self.queue.lock().await.settle(id, disposition, stage);
        self.released.notify_waiters();
        self.wake.notify_one();
    }

    async fn restore(&self, id: &WorkloadId, previous: Option<Slot>) {
        if self.queue.lock().await.take_cancelled(id) {
            info!(workload = %id, "Applying cancel deferred while workload was held");
            let (disposition, stage) = self.fail_workload(id, "cancelled by operator").await;
            self.queue.lock().await.settle(id, disposition, stage);
        } else {
            self.queue.lock().await.restore(id, previous);
        }
        self.released.notify_waiters();
    }
}

/// Run one step on its own task so a panic becomes an error.
async fn run_step(processor: WorkloadProcessor) -> std::result::Result<StepOutcome, String> {
    match tokio::spawn(async move { processor.step().await }).await {
        Ok(step) => step.map_err(|e| e.to_string()),
        Err(join) => Err(panic_message(join)),
    }
}

fn panic_message(join: tokio::task::JoinError) -> String {
    if join.is_cancelled() {
        return "step was cancelled".into();
    }
    let payload = join.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("step panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("step panicked: {s}")
    } else {
        "step panicked".into()
    }
}
