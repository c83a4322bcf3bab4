//! Cooperative cancellation, observable at stage boundaries.
//!
//! All three cancellation sources (soft deadline, job deletion, worker
//! shutdown) surface through the same token; stages with network or
//! process I/O bound their own timeouts so a boundary is reached in
//! bounded time. Cleanup itself cannot be cancelled.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Why a run was asked to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The cooperative per-job deadline elapsed.
    SoftDeadline,
    /// The job record was deleted while processing.
    JobDeleted,
    /// The worker process is shutting down.
    Shutdown,
}

const NONE: u8 = 0;
const SOFT_DEADLINE: u8 = 1;
const JOB_DELETED: u8 = 2;
const SHUTDOWN: u8 = 3;

#[derive(Debug)]
struct Inner {
    reason: AtomicU8,
    soft_deadline: Option<Instant>,
}

/// Shared cancellation token for one pipeline run.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new(soft_deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                reason: AtomicU8::new(NONE),
                soft_deadline,
            }),
        }
    }

    /// Token that never fires (tests, cleanup-only paths).
    pub fn never() -> Self {
        Self::new(None)
    }

    /// Request cancellation. The first reason wins.
    pub fn cancel(&self, reason: CancelReason) {
        let code = match reason {
            CancelReason::SoftDeadline => SOFT_DEADLINE,
            CancelReason::JobDeleted => JOB_DELETED,
            CancelReason::Shutdown => SHUTDOWN,
        };
        let _ = self
            .inner
            .reason
            .compare_exchange(NONE, code, Ordering::SeqCst, Ordering::SeqCst);
    }

    /// The pending cancellation reason, if any. Checked at every stage
    /// boundary; the soft deadline is folded in here so callers have a
    /// single condition to observe.
    pub fn reason(&self) -> Option<CancelReason> {
        match self.inner.reason.load(Ordering::SeqCst) {
            SOFT_DEADLINE => return Some(CancelReason::SoftDeadline),
            JOB_DELETED => return Some(CancelReason::JobDeleted),
            SHUTDOWN => return Some(CancelReason::Shutdown),
            _ => {}
        }
        match self.inner.soft_deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::SoftDeadline),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fresh_token_is_not_cancelled() {
        assert!(!CancelToken::never().is_cancelled());
    }

    #[test]
    fn first_cancel_reason_wins() {
        let token = CancelToken::never();
        token.cancel(CancelReason::JobDeleted);
        token.cancel(CancelReason::Shutdown);
        assert_eq!(token.reason(), Some(CancelReason::JobDeleted));
    }

    #[test]
    fn soft_deadline_fires_without_an_explicit_cancel() {
        let token = CancelToken::new(Some(Instant::now() - Duration::from_millis(1)));
        assert_eq!(token.reason(), Some(CancelReason::SoftDeadline));
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::never();
        let clone = token.clone();
        token.cancel(CancelReason::Shutdown);
        assert_eq!(clone.reason(), Some(CancelReason::Shutdown));
    }
}
