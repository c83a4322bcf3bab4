//! Redis-backed broker.
//!
//! List semantics per the wire protocol: `RPUSH` onto the queue,
//! reserve moves the item onto a processing list (`LMOVE`) and writes a
//! per-item reservation key expiring at the visibility timeout, `ack`
//! deletes both, `nack` restores the item with its incremented delivery
//! count. The sweep re-queues processing entries whose reservation key
//! has expired.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;

use super::{BrokerError, Reservation, TaskBroker, WorkItem};

const QUEUE_KEY: &str = "docsmith:queue";
const PROCESSING_KEY: &str = "docsmith:processing";
const RESERVED_PREFIX: &str = "docsmith:reserved:";

pub struct RedisBroker {
    client: redis::Client,
    visibility_timeout: Duration,
}

impl RedisBroker {
    /// Open a client against the given URL. Connections are established
    /// lazily per command batch.
    pub fn new(redis_url: &str, visibility_timeout: Duration) -> Result<Self, BrokerError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(Self {
            client,
            visibility_timeout,
        })
    }

    /// Round-trip a PING; used at worker startup to distinguish a broker
    /// outage from an empty queue.
    pub async fn check_connection(&self) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn connection(&self) -> Result<MultiplexedConnection, BrokerError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))
    }

    fn reserved_key(item: &WorkItem) -> String {
        format!("{RESERVED_PREFIX}{}", item.job_id)
    }

    fn encode(item: &WorkItem) -> Result<String, BrokerError> {
        serde_json::to_string(item).map_err(|e| BrokerError::Payload(e.to_string()))
    }

    fn decode(payload: &str) -> Result<WorkItem, BrokerError> {
        serde_json::from_str(payload).map_err(|e| BrokerError::Payload(e.to_string()))
    }
}

#[async_trait]
impl TaskBroker for RedisBroker {
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        redis::cmd("RPUSH")
            .arg(QUEUE_KEY)
            .arg(Self::encode(&item)?)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("RPUSH failed: {e}")))?;
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<Reservation>, BrokerError> {
        let mut conn = self.connection().await?;

        let moved: Option<String> = redis::cmd("LMOVE")
            .arg(QUEUE_KEY)
            .arg(PROCESSING_KEY)
            .arg("LEFT")
            .arg("RIGHT")
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("LMOVE failed: {e}")))?;

        let Some(original) = moved else {
            return Ok(None);
        };

        let mut item = Self::decode(&original)?;
        item.deliveries += 1;
        let updated = Self::encode(&item)?;

        // Rewrite the processing entry so the stored delivery count
        // includes this delivery, then stamp the reservation key.
        redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(&original)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("LREM failed: {e}")))?;
        redis::cmd("RPUSH")
            .arg(PROCESSING_KEY)
            .arg(&updated)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("RPUSH failed: {e}")))?;
        redis::cmd("SET")
            .arg(Self::reserved_key(&item))
            .arg(&updated)
            .arg("EX")
            .arg(self.visibility_timeout.as_secs().max(1))
            .query_async::<String>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("SET failed: {e}")))?;

        Ok(Some(Reservation {
            item,
            token: updated,
        }))
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(&reservation.token)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("LREM failed: {e}")))?;
        redis::cmd("DEL")
            .arg(Self::reserved_key(&reservation.item))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("DEL failed: {e}")))?;
        Ok(())
    }

    async fn nack(&self, reservation: &Reservation, retryable: bool) -> Result<(), BrokerError> {
        let mut conn = self.connection().await?;
        redis::cmd("LREM")
            .arg(PROCESSING_KEY)
            .arg(1)
            .arg(&reservation.token)
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("LREM failed: {e}")))?;
        redis::cmd("DEL")
            .arg(Self::reserved_key(&reservation.item))
            .query_async::<i64>(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("DEL failed: {e}")))?;

        if retryable {
            redis::cmd("RPUSH")
                .arg(QUEUE_KEY)
                .arg(&reservation.token)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("RPUSH failed: {e}")))?;
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u32, BrokerError> {
        let mut conn = self.connection().await?;

        let processing: Vec<String> = redis::cmd("LRANGE")
            .arg(PROCESSING_KEY)
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::Command(format!("LRANGE failed: {e}")))?;

        let mut recovered = 0;
        for payload in processing {
            let item = match Self::decode(&payload) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable processing entry");
                    let _: Result<i64, _> = redis::cmd("LREM")
                        .arg(PROCESSING_KEY)
                        .arg(1)
                        .arg(&payload)
                        .query_async(&mut conn)
                        .await;
                    continue;
                }
            };

            let alive: i64 = redis::cmd("EXISTS")
                .arg(Self::reserved_key(&item))
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("EXISTS failed: {e}")))?;
            if alive != 0 {
                continue;
            }

            // Reservation expired: the owning worker is presumed lost.
            let removed: i64 = redis::cmd("LREM")
                .arg(PROCESSING_KEY)
                .arg(1)
                .arg(&payload)
                .query_async(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("LREM failed: {e}")))?;
            if removed == 0 {
                continue; // another sweeper won the race
            }
            redis::cmd("RPUSH")
                .arg(QUEUE_KEY)
                .arg(&payload)
                .query_async::<i64>(&mut conn)
                .await
                .map_err(|e| BrokerError::Command(format!("RPUSH failed: {e}")))?;
            recovered += 1;
        }

        Ok(recovered)
    }
}
