//! Task broker: delivers work items from submitter to worker with
//! at-least-once semantics and a visibility timeout.
//!
//! A reserved item must be acked before the visibility timeout or it
//! becomes eligible for re-reservation; each delivery increments the
//! item's delivery count, and the worker enforces the poison-pill
//! threshold by observing it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use docsmith_core::{JobId, Variant};

pub mod memory;
pub mod redis;

pub use memory::InMemoryBroker;
pub use redis::RedisBroker;

/// The broker payload: job id plus everything the worker needs that is
/// not on the job record. Ephemeral; exists only between enqueue and ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub job_id: JobId,
    /// Opaque repository access credential, when the caller provided one.
    pub credential: Option<String>,
    pub variant: Variant,
    /// Times this item has been delivered to a worker (set by `reserve`).
    #[serde(default)]
    pub deliveries: u32,
}

impl WorkItem {
    pub fn new(job_id: JobId, credential: Option<String>, variant: Variant) -> Self {
        Self {
            job_id,
            credential,
            variant,
            deliveries: 0,
        }
    }
}

/// Handle for a reserved item; required for ack/nack.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub item: WorkItem,
    /// Opaque broker token identifying this delivery.
    pub token: String,
}

/// Broker error.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(String),
    #[error("broker command error: {0}")]
    Command(String),
    #[error("broker payload error: {0}")]
    Payload(String),
}

/// Durable work queue with at-least-once delivery.
#[async_trait]
pub trait TaskBroker: Send + Sync {
    /// Append a work item to the queue.
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError>;

    /// Reserve the next item, or `None` when the queue is empty. The
    /// returned item's delivery count includes this delivery.
    async fn reserve(&self) -> Result<Option<Reservation>, BrokerError>;

    /// Acknowledge a reservation, removing the item permanently.
    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError>;

    /// Negative-acknowledge: requeue when `retryable`, drop otherwise.
    async fn nack(&self, reservation: &Reservation, retryable: bool) -> Result<(), BrokerError>;

    /// Return items whose reservation expired to the queue. Returns how
    /// many items were recovered.
    async fn sweep_expired(&self) -> Result<u32, BrokerError>;
}
