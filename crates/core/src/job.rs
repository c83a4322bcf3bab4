//! The durable job record and its status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{CallerId, JobId};

/// Job execution status.
///
/// Transitions only move forward along
/// `pending -> processing -> {completed, failed}` (plus the reaper's
/// `pending -> failed`). Terminal statuses are never revived; retrying a
/// failed locator means submitting a new job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Queued, waiting to be picked up.
    Pending,
    /// Dequeued by exactly one live worker.
    Processing,
    /// Finished with an artifact and/or pull-request URL.
    Completed,
    /// Finished with a one-line error.
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is in the allowed forward set.
    pub fn allows(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Processing)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Processing, JobStatus::Completed)
                | (JobStatus::Processing, JobStatus::Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(DomainError::validation(format!("unknown status: {other}"))),
        }
    }
}

/// Pipeline variant selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Variant {
    /// Documentation artifact only.
    #[serde(rename = "docs")]
    Docs,
    /// Documentation plus per-file inline comments (PR or bundle).
    #[serde(rename = "docs+comments")]
    DocsPlusComments,
}

impl Default for Variant {
    fn default() -> Self {
        Variant::Docs
    }
}

/// The durable record of a single documentation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID.
    pub id: JobId,
    /// Normalized source-repository locator; unique among non-failed jobs.
    pub source: String,
    /// Current status.
    pub status: JobStatus,
    /// One-line error, set exactly when `status == Failed`.
    pub error: Option<String>,
    /// Published documentation URL.
    pub artifact_url: Option<String>,
    /// Pull-request URL (docs+comments variant with write access).
    pub pull_request_url: Option<String>,
    /// Caller this job is associated with, when authenticated.
    pub caller_id: Option<CallerId>,
    /// Whether the caller confirmed write access to the repository.
    pub has_write_access: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new pending job for an already-normalized locator.
    pub fn new(source: impl Into<String>, caller_id: Option<CallerId>) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            source: source.into(),
            status: JobStatus::Pending,
            error: None,
            artifact_url: None,
            pull_request_url: None,
            caller_id,
            has_write_access: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_write_access(mut self, has_write_access: bool) -> Self {
        self.has_write_access = has_write_access;
        self
    }

    /// Whether this job holds the locator's uniqueness slot (invariant:
    /// at most one non-failed job per normalized locator).
    pub fn occupies_locator(&self) -> bool {
        self.status != JobStatus::Failed
    }

    /// Transition to `processing`.
    pub fn mark_processing(&mut self) -> DomainResult<()> {
        self.transition(JobStatus::Processing)?;
        Ok(())
    }

    /// Transition to `completed` with at least one result URL.
    pub fn mark_completed(
        &mut self,
        artifact_url: Option<String>,
        pull_request_url: Option<String>,
    ) -> DomainResult<()> {
        if artifact_url.is_none() && pull_request_url.is_none() {
            return Err(DomainError::validation(
                "completed job requires an artifact or pull-request URL",
            ));
        }
        self.transition(JobStatus::Completed)?;
        self.error = None;
        self.artifact_url = artifact_url;
        self.pull_request_url = pull_request_url;
        Ok(())
    }

    /// Transition to `failed` with a non-empty one-line error.
    pub fn mark_failed(&mut self, error: impl Into<String>) -> DomainResult<()> {
        let error = error.into();
        if error.trim().is_empty() {
            return Err(DomainError::validation("failed job requires an error"));
        }
        self.transition(JobStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> DomainResult<()> {
        if !self.status.allows(next) {
            return Err(DomainError::illegal_transition(format!(
                "{} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}
