//! The reaper: background recovery sweeps.
//!
//! Three duties, all idempotent: fail pending jobs that were never
//! dequeued within the enqueue grace window, return expired broker
//! reservations to the queue, and drop terminal records past the
//! retention window (artifacts are retained; only the record goes).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use docsmith_core::{Fault, FaultKind, JobStatus};
use docsmith_infra::broker::TaskBroker;
use docsmith_infra::job_store::{JobStore, StatusFields};

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// Grace window before a pending job is failed with `enqueue-timeout`.
    pub enqueue_grace: Duration,
    /// Days to keep terminal job records.
    pub retention_days: i64,
    /// Time between sweeps.
    pub sweep_interval: Duration,
}

impl ReaperConfig {
    pub fn from_app(config: &docsmith_infra::AppConfig) -> Self {
        Self {
            enqueue_grace: config.enqueue_grace,
            retention_days: config.retention_days,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

pub struct Reaper {
    store: Arc<dyn JobStore>,
    broker: Arc<dyn TaskBroker>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(
        store: Arc<dyn JobStore>,
        broker: Arc<dyn TaskBroker>,
        config: ReaperConfig,
    ) -> Self {
        Self {
            store,
            broker,
            config,
        }
    }

    /// Run sweeps until shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!("reaper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.sweep_interval) => {
                    self.sweep_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reaper stopped");
    }

    /// One full sweep. Public so tests can drive it directly.
    pub async fn sweep_once(&self) {
        match self.broker.sweep_expired().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::info!(recovered, "expired reservations returned to the queue")
            }
            Err(e) => tracing::error!(error = %e, "reservation sweep failed"),
        }

        self.fail_stale_pending().await;
        self.drop_old_terminal().await;
    }

    /// Pending past the grace window means the enqueue never landed (or
    /// the queue lost the item for good); the job is failed so the
    /// locator frees up for a resubmit.
    async fn fail_stale_pending(&self) {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.enqueue_grace).unwrap_or_default();

        let stale = match self.store.list_pending_before(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::error!(error = %e, "stale-pending listing failed");
                return;
            }
        };

        for job in stale {
            let fault = Fault::new(FaultKind::EnqueueTimeout);
            match self
                .store
                .set_status(job.id, JobStatus::Failed, StatusFields::error(fault.to_line()))
                .await
            {
                Ok(_) => tracing::warn!(job_id = %job.id, "stale pending job failed by reaper"),
                Err(e) => tracing::error!(job_id = %job.id, error = %e, "reaper failure write failed"),
            }
        }
    }

    async fn drop_old_terminal(&self) {
        let cutoff = Utc::now() - chrono::Duration::days(self.config.retention_days);
        match self.store.sweep_terminal_before(cutoff).await {
            Ok(0) => {}
            Ok(removed) => tracing::info!(removed, "old terminal jobs removed"),
            Err(e) => tracing::error!(error = %e, "terminal sweep failed"),
        }
    }
}
