//! The worker pool.
//!
//! W slots share one pipeline; each slot loops reserve -> load ->
//! transition -> run -> finalize. Per job there is exactly one observable
//! outcome; the broker's redelivery plus the poison-pill threshold bound
//! how often a lost job is retried.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;

use docsmith_core::{Fault, FaultKind, Job, JobStatus};
use docsmith_infra::broker::{Reservation, TaskBroker};
use docsmith_infra::job_store::{JobStore, JobStoreError, StatusFields};
use docsmith_observability::metrics;
use docsmith_pipeline::cancel::{CancelReason, CancelToken};
use docsmith_pipeline::run_state::RunState;
use docsmith_pipeline::tools::cleaner;
use docsmith_pipeline::Pipeline;

/// Runtime knobs, sliced from the process configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Worker slots (W).
    pub workers: usize,
    /// Hard per-job deadline (D).
    pub hard_deadline: Duration,
    /// Cooperative deadline; the pipeline stops at the next stage
    /// boundary once it passes.
    pub soft_deadline: Duration,
    /// Poison-pill threshold (N_max).
    pub poison_threshold: u32,
    /// Idle wait between reserve attempts.
    pub poll_interval: Duration,
    /// How often a running job re-checks that its record still exists.
    pub watch_interval: Duration,
    /// Workspace root, for hard-deadline cleanup.
    pub workspace_root: PathBuf,
}

impl RuntimeConfig {
    pub fn from_app(config: &docsmith_infra::AppConfig) -> Self {
        Self {
            workers: config.workers,
            hard_deadline: config.job_deadline_hard,
            soft_deadline: config.job_deadline_soft,
            poison_threshold: config.broker_poison_threshold,
            poll_interval: Duration::from_millis(500),
            watch_interval: Duration::from_secs(2),
            workspace_root: config.workspace_root.clone(),
        }
    }
}

/// Handle to a spawned worker pool.
pub struct RuntimeHandle {
    shutdown: watch::Sender<bool>,
    slots: Vec<JoinHandle<()>>,
}

impl RuntimeHandle {
    /// Signal shutdown and wait for every slot to drain.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for slot in self.slots {
            let _ = slot.await;
        }
    }
}

pub struct WorkerRuntime {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn TaskBroker>,
    pipeline: Arc<Pipeline>,
    config: RuntimeConfig,
}

impl WorkerRuntime {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn TaskBroker>,
        pipeline: Arc<Pipeline>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            store,
            broker,
            pipeline,
            config,
        }
    }

    /// Spawn the W worker slots.
    pub fn spawn(self: Arc<Self>) -> RuntimeHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let slots = (0..self.config.workers)
            .map(|slot| {
                let runtime = self.clone();
                let shutdown = shutdown_rx.clone();
                tokio::spawn(async move {
                    runtime.slot_loop(slot, shutdown).await;
                })
            })
            .collect();

        RuntimeHandle {
            shutdown: shutdown_tx,
            slots,
        }
    }

    async fn slot_loop(&self, slot: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(slot, "worker slot started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.broker.reserve().await {
                Ok(Some(reservation)) => {
                    self.process(slot, reservation, &shutdown).await;
                }
                Ok(None) => {
                    // Idle wait, interruptible by shutdown.
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    tracing::error!(slot, error = %e, "reserve failed");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
            }
        }

        tracing::info!(slot, "worker slot stopped");
    }

    /// Process one reserved item end to end.
    async fn process(
        &self,
        slot: usize,
        reservation: Reservation,
        shutdown: &watch::Receiver<bool>,
    ) {
        let job_id = reservation.item.job_id;
        if reservation.item.deliveries > 1 {
            metrics::redelivery();
        }

        // Poison pill: the delivery count exhausted the threshold.
        if reservation.item.deliveries > self.config.poison_threshold {
            tracing::warn!(
                slot,
                job_id = %job_id,
                deliveries = reservation.item.deliveries,
                "poison-pill threshold exhausted"
            );
            self.fail_job(job_id, &Fault::new(FaultKind::WorkerCrash)).await;
            self.ack(&reservation).await;
            return;
        }

        // Load the job; a missing or already-terminal record is an
        // idempotent drop.
        let job = match self.store.get(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::info!(slot, job_id = %job_id, "job record gone, dropping item");
                self.ack(&reservation).await;
                return;
            }
            Err(e) => {
                tracing::error!(slot, job_id = %job_id, error = %e, "job load failed");
                let _ = self.broker.nack(&reservation, true).await;
                return;
            }
        };

        match job.status {
            JobStatus::Pending => {}
            JobStatus::Processing => {
                // Crash recovery: a previous worker died holding this job.
                if reservation.item.deliveries >= self.config.poison_threshold {
                    tracing::warn!(slot, job_id = %job_id, "crash-recovered job exhausted its redeliveries");
                    self.fail_job(job_id, &Fault::new(FaultKind::WorkerCrash)).await;
                    self.ack(&reservation).await;
                } else {
                    tracing::info!(slot, job_id = %job_id, "crash-recovered job, returning to queue");
                    if let Err(e) = self.store.requeue_crashed(job_id).await {
                        tracing::error!(job_id = %job_id, error = %e, "requeue failed");
                    }
                    let _ = self.broker.nack(&reservation, true).await;
                }
                return;
            }
            JobStatus::Completed | JobStatus::Failed => {
                tracing::info!(slot, job_id = %job_id, status = %job.status, "terminal job, dropping item");
                self.ack(&reservation).await;
                return;
            }
        }

        // Claim the job. Losing the race is another idempotent drop.
        if let Err(e) = self
            .store
            .set_status(job_id, JobStatus::Processing, StatusFields::default())
            .await
        {
            tracing::info!(slot, job_id = %job_id, error = %e, "claim failed, dropping item");
            self.ack(&reservation).await;
            return;
        }
        metrics::job_status_changed("processing");

        tracing::info!(slot, job_id = %job_id, source = %job.source, variant = ?reservation.item.variant, "job started");
        let outcome = self.run_pipeline(&job, &reservation, shutdown).await;
        self.finalize(slot, reservation, outcome).await;
    }

    async fn run_pipeline(
        &self,
        job: &Job,
        reservation: &Reservation,
        shutdown: &watch::Receiver<bool>,
    ) -> Option<RunState> {
        let state = RunState::new(
            job.id,
            job.source.clone(),
            reservation.item.credential.clone(),
            reservation.item.variant,
            job.has_write_access,
        );

        let cancel = CancelToken::new(Some(Instant::now() + self.config.soft_deadline));
        let watcher = self.spawn_watcher(job.id, cancel.clone(), shutdown.clone());

        let result = tokio::time::timeout(
            self.config.hard_deadline,
            self.pipeline.run(state, &cancel),
        )
        .await;
        watcher.abort();

        match result {
            Ok(state) => Some(state),
            Err(_) => None, // hard deadline: the run future was aborted
        }
    }

    /// Watch for job deletion and worker shutdown while a run is active;
    /// both surface through the same cooperative token.
    fn spawn_watcher(
        &self,
        job_id: docsmith_core::JobId,
        cancel: CancelToken,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let interval = self.config.watch_interval;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if matches!(store.get(job_id).await, Ok(None)) {
                            cancel.cancel(CancelReason::JobDeleted);
                            return;
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            cancel.cancel(CancelReason::Shutdown);
                            return;
                        }
                    }
                }
            }
        })
    }

    async fn finalize(&self, slot: usize, reservation: Reservation, outcome: Option<RunState>) {
        let job_id = reservation.item.job_id;

        let Some(state) = outcome else {
            // Hard deadline: abort, delete the workspace, nack
            // non-retryably, fail the job.
            tracing::warn!(slot, job_id = %job_id, "hard deadline exceeded, aborting");
            let workspace = self.config.workspace_root.join("repos").join(job_id.to_string());
            cleaner::remove_workspace(&workspace).await;
            let _ = self.broker.nack(&reservation, false).await;
            self.fail_job(job_id, &Fault::new(FaultKind::DeadlineExceeded)).await;
            return;
        };

        match state.cancelled {
            Some(CancelReason::JobDeleted) => {
                // Record gone; cleanup already ran inside the pipeline.
                self.ack(&reservation).await;
                return;
            }
            Some(CancelReason::Shutdown) => {
                // Hand the item back; the redelivery path resumes it.
                let _ = self.broker.nack(&reservation, true).await;
                return;
            }
            _ => {}
        }

        match state.fault {
            None => {
                let fields = StatusFields::completed(
                    state.artifact_url.clone(),
                    state.pull_request_url.clone(),
                );
                match self.store.set_status(job_id, JobStatus::Completed, fields).await {
                    Ok(_) => {
                        metrics::job_status_changed("completed");
                        tracing::info!(slot, job_id = %job_id, artifact_url = ?state.artifact_url, "job completed");
                    }
                    Err(e) => {
                        tracing::error!(slot, job_id = %job_id, error = %e, "completion write failed")
                    }
                }
                self.ack(&reservation).await;
            }
            Some(fault) if self.should_requeue(fault.kind, reservation.item.deliveries) => {
                // Transient after the tool's own retries: hand the job
                // back to the queue for broker-level redelivery.
                tracing::warn!(slot, job_id = %job_id, error = %fault, "transient fault, requeueing");
                if let Err(e) = self.store.requeue_crashed(job_id).await {
                    tracing::error!(job_id = %job_id, error = %e, "requeue failed");
                }
                let _ = self.broker.nack(&reservation, true).await;
            }
            Some(fault) => {
                self.fail_job(job_id, &fault).await;
                self.ack(&reservation).await;
            }
        }
    }

    /// Broker-level retry budget per fault kind: network-shaped fetch
    /// failures get one redelivery, transient model kinds are bounded by
    /// the poison-pill threshold, everything else fails in place.
    fn should_requeue(&self, kind: FaultKind, deliveries: u32) -> bool {
        if !kind.broker_retryable() {
            return false;
        }
        match kind {
            FaultKind::Network | FaultKind::FetchTimeout => deliveries < 2,
            _ => deliveries < self.config.poison_threshold,
        }
    }

    /// The single place a worker writes `failed`.
    async fn fail_job(&self, job_id: docsmith_core::JobId, fault: &Fault) {
        match self
            .store
            .set_status(job_id, JobStatus::Failed, StatusFields::error(fault.to_line()))
            .await
        {
            Ok(_) => {
                metrics::job_status_changed("failed");
                tracing::warn!(job_id = %job_id, error = %fault, "job failed");
            }
            Err(JobStoreError::NotFound(_)) => {}
            Err(e) => tracing::error!(job_id = %job_id, error = %e, "failure write failed"),
        }
    }

    async fn ack(&self, reservation: &Reservation) {
        if let Err(e) = self.broker.ack(reservation).await {
            tracing::error!(job_id = %reservation.item.job_id, error = %e, "ack failed");
        }
    }
}
