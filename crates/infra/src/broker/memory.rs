//! In-memory broker with full reservation semantics, for tests and
//! single-process deployments.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::{BrokerError, Reservation, TaskBroker, WorkItem};

#[derive(Debug)]
struct InFlight {
    item: WorkItem,
    expires_at: Instant,
}

#[derive(Debug)]
pub struct InMemoryBroker {
    visibility_timeout: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    queue: VecDeque<WorkItem>,
    in_flight: HashMap<String, InFlight>,
    next_token: u64,
}

impl InMemoryBroker {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(State::default()),
        }
    }

    /// Items currently waiting in the queue (test helper).
    pub fn queued_len(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Items currently reserved (test helper).
    pub fn in_flight_len(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }
}

#[async_trait]
impl TaskBroker for InMemoryBroker {
    async fn enqueue(&self, item: WorkItem) -> Result<(), BrokerError> {
        self.state.lock().unwrap().queue.push_back(item);
        Ok(())
    }

    async fn reserve(&self) -> Result<Option<Reservation>, BrokerError> {
        let mut state = self.state.lock().unwrap();
        let Some(mut item) = state.queue.pop_front() else {
            return Ok(None);
        };

        item.deliveries += 1;
        state.next_token += 1;
        let token = state.next_token.to_string();
        state.in_flight.insert(
            token.clone(),
            InFlight {
                item: item.clone(),
                expires_at: Instant::now() + self.visibility_timeout,
            },
        );

        Ok(Some(Reservation { item, token }))
    }

    async fn ack(&self, reservation: &Reservation) -> Result<(), BrokerError> {
        self.state
            .lock()
            .unwrap()
            .in_flight
            .remove(&reservation.token);
        Ok(())
    }

    async fn nack(&self, reservation: &Reservation, retryable: bool) -> Result<(), BrokerError> {
        let mut state = self.state.lock().unwrap();
        if let Some(in_flight) = state.in_flight.remove(&reservation.token) {
            if retryable {
                state.queue.push_back(in_flight.item);
            }
        }
        Ok(())
    }

    async fn sweep_expired(&self) -> Result<u32, BrokerError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, f)| f.expires_at <= now)
            .map(|(token, _)| token.clone())
            .collect();

        let mut recovered = 0;
        for token in expired {
            if let Some(in_flight) = state.in_flight.remove(&token) {
                state.queue.push_back(in_flight.item);
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_core::{JobId, Variant};

    fn item() -> WorkItem {
        WorkItem::new(JobId::new(), None, Variant::Docs)
    }

    #[tokio::test]
    async fn reserve_is_fifo_and_counts_deliveries() {
        let broker = InMemoryBroker::new(Duration::from_secs(60));
        let first = item();
        let second = item();
        broker.enqueue(first.clone()).await.unwrap();
        broker.enqueue(second.clone()).await.unwrap();

        let r1 = broker.reserve().await.unwrap().unwrap();
        assert_eq!(r1.item.job_id, first.job_id);
        assert_eq!(r1.item.deliveries, 1);

        let r2 = broker.reserve().await.unwrap().unwrap();
        assert_eq!(r2.item.job_id, second.job_id);

        assert!(broker.reserve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn ack_removes_permanently() {
        let broker = InMemoryBroker::new(Duration::from_secs(60));
        broker.enqueue(item()).await.unwrap();

        let reservation = broker.reserve().await.unwrap().unwrap();
        broker.ack(&reservation).await.unwrap();

        assert_eq!(broker.queued_len(), 0);
        assert_eq!(broker.in_flight_len(), 0);
        assert_eq!(broker.sweep_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nack_retryable_requeues_with_delivery_count() {
        let broker = InMemoryBroker::new(Duration::from_secs(60));
        broker.enqueue(item()).await.unwrap();

        let reservation = broker.reserve().await.unwrap().unwrap();
        broker.nack(&reservation, true).await.unwrap();

        let redelivered = broker.reserve().await.unwrap().unwrap();
        assert_eq!(redelivered.item.deliveries, 2);
    }

    #[tokio::test]
    async fn nack_non_retryable_drops() {
        let broker = InMemoryBroker::new(Duration::from_secs(60));
        broker.enqueue(item()).await.unwrap();

        let reservation = broker.reserve().await.unwrap().unwrap();
        broker.nack(&reservation, false).await.unwrap();

        assert!(broker.reserve().await.unwrap().is_none());
        assert_eq!(broker.in_flight_len(), 0);
    }

    #[tokio::test]
    async fn expired_reservations_are_swept_back() {
        let broker = InMemoryBroker::new(Duration::from_millis(5));
        broker.enqueue(item()).await.unwrap();

        let _reservation = broker.reserve().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(broker.sweep_expired().await.unwrap(), 1);
        let redelivered = broker.reserve().await.unwrap().unwrap();
        assert_eq!(redelivered.item.deliveries, 2);
    }

    #[tokio::test]
    async fn unexpired_reservations_stay_hidden() {
        let broker = InMemoryBroker::new(Duration::from_secs(60));
        broker.enqueue(item()).await.unwrap();

        let _reservation = broker.reserve().await.unwrap().unwrap();
        assert_eq!(broker.sweep_expired().await.unwrap(), 0);
        assert!(broker.reserve().await.unwrap().is_none());
    }
}
