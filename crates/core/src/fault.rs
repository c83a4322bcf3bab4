//! The pipeline/runtime error taxonomy.
//!
//! Every failure a job can surface is one of these kinds. The kind
//! decides two things: whether the job reaches a terminal `failed`
//! status, and whether the broker may redeliver the work item first.

use serde::{Deserialize, Serialize};

/// Failure kind, stored on the job as a one-line phrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    /// Submitter rejected the source locator.
    InvalidSource,
    /// Fetch could not find the repository.
    RepoNotFound,
    /// Fetch was refused (private repository, no/invalid credential).
    AuthDenied,
    /// Network failure during fetch or publish.
    Network,
    /// Fetch exceeded its stage timeout.
    FetchTimeout,
    /// Filesystem failure during scan or cleanup.
    IoError,
    /// Scan found no code files worth analyzing.
    NoAnalyzableFiles,
    /// Model endpoint unreachable (transient).
    ModelUnavailable,
    /// Model endpoint throttled the request (transient).
    ModelRateLimited,
    /// Model refused the request (non-transient).
    ModelRejected,
    /// Model returned no usable text.
    EmptyOutput,
    /// Artifact store upload failed.
    PublishFailed,
    /// Cooperative cancellation at the soft deadline.
    TimedOut,
    /// Hard per-job deadline elapsed.
    DeadlineExceeded,
    /// Redelivery threshold exhausted after worker loss.
    WorkerCrash,
    /// Job stayed `pending` past the enqueue grace window.
    EnqueueTimeout,
}

impl FaultKind {
    /// Kebab-case wire/storage form.
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::InvalidSource => "invalid-source",
            FaultKind::RepoNotFound => "repo-not-found",
            FaultKind::AuthDenied => "auth-denied",
            FaultKind::Network => "network",
            FaultKind::FetchTimeout => "fetch-timeout",
            FaultKind::IoError => "io-error",
            FaultKind::NoAnalyzableFiles => "no-analyzable-files",
            FaultKind::ModelUnavailable => "model-unavailable",
            FaultKind::ModelRateLimited => "model-rate-limited",
            FaultKind::ModelRejected => "model-rejected",
            FaultKind::EmptyOutput => "empty-output",
            FaultKind::PublishFailed => "publish-failed",
            FaultKind::TimedOut => "timed-out",
            FaultKind::DeadlineExceeded => "deadline-exceeded",
            FaultKind::WorkerCrash => "worker-crash",
            FaultKind::EnqueueTimeout => "enqueue-timeout",
        }
    }

    /// Whether the job must reach `failed` once this kind surfaces as a
    /// pipeline fault.
    ///
    /// Only the transient model kinds are non-terminal; they resolve
    /// through broker redelivery. `publish-failed` in the docs-only
    /// variant degrades inside the publisher and never surfaces here.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            FaultKind::ModelUnavailable | FaultKind::ModelRateLimited
        )
    }

    /// Whether the broker may redeliver the work item for this kind.
    /// Network-shaped fetch failures get one redelivery; transient model
    /// kinds are bounded by the poison-pill threshold.
    pub fn broker_retryable(&self) -> bool {
        matches!(
            self,
            FaultKind::Network
                | FaultKind::FetchTimeout
                | FaultKind::ModelUnavailable
                | FaultKind::ModelRateLimited
        )
    }
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure with optional one-line detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fault {
    pub kind: FaultKind,
    pub detail: Option<String>,
}

impl Fault {
    pub fn new(kind: FaultKind) -> Self {
        Self { kind, detail: None }
    }

    pub fn with_detail(kind: FaultKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let detail = if detail.is_empty() { None } else { Some(detail) };
        Self { kind, detail }
    }

    /// The short human-readable phrase stored on the job record.
    ///
    /// Verbose diagnostics go to the logs, never here.
    pub fn to_line(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.kind, first_line(detail)),
            None => self.kind.to_string(),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

impl std::error::Error for Fault {}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}
