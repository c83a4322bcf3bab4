//! Durable job record storage.
//!
//! The job store is the single shared mutable resource across workers.
//! All mutations flow through `set_status` (strictly forward) or the
//! worker-internal `requeue_crashed` recovery path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use docsmith_core::{DomainError, Job, JobId, JobStatus};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryJobStore;
pub use postgres::PostgresJobStore;

/// Outcome of an atomic create: either a fresh record, or the existing
/// non-failed record for the same normalized locator.
#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Job),
    Existing(Job),
}

impl CreateOutcome {
    pub fn job(&self) -> &Job {
        match self {
            CreateOutcome::Created(job) | CreateOutcome::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Fields set alongside a status transition.
#[derive(Debug, Clone, Default)]
pub struct StatusFields {
    pub error: Option<String>,
    pub artifact_url: Option<String>,
    pub pull_request_url: Option<String>,
}

impl StatusFields {
    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn completed(artifact_url: Option<String>, pull_request_url: Option<String>) -> Self {
        Self {
            error: None,
            artifact_url,
            pull_request_url,
        }
    }
}

/// Job store error.
#[derive(Debug, thiserror::Error)]
pub enum JobStoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("storage error: {0}")]
    Storage(String),
}

impl JobStoreError {
    pub fn storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Durable store for job records.
///
/// `create` is atomic with respect to the locator-uniqueness invariant:
/// concurrent submissions for the same normalized locator yield exactly
/// one `Created` and the rest `Existing`.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new pending job, or return the existing non-failed job
    /// for the same locator.
    async fn create(&self, job: Job) -> Result<CreateOutcome, JobStoreError>;

    /// Get a job by ID.
    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// List jobs newest-first. Pagination is stable against insertions
    /// at the head because ordering is by creation time.
    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Job>, JobStoreError>;

    /// Apply a forward status transition under a single-row lock.
    ///
    /// Rejects transitions outside the allowed set and any mutation of a
    /// terminal record.
    async fn set_status(
        &self,
        id: JobId,
        next: JobStatus,
        fields: StatusFields,
    ) -> Result<Job, JobStoreError>;

    /// Crash-recovery path: return a `processing` job to `pending` so the
    /// broker can redeliver it. Worker-internal; not part of the
    /// client-visible transition set.
    async fn requeue_crashed(&self, id: JobId) -> Result<Job, JobStoreError>;

    /// Remove the record. Published artifacts are retained intentionally.
    async fn delete(&self, id: JobId) -> Result<(), JobStoreError>;

    /// Pending jobs created before the cutoff (reaper input for
    /// `enqueue-timeout`).
    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError>;

    /// Delete terminal jobs last updated before the cutoff. Returns the
    /// number of records removed.
    async fn sweep_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, JobStoreError>;
}
