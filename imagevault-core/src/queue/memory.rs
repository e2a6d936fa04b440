//! In-process `WorkQueue` used for tests and single-process deployments.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

use super::{DeadLetter, Delivery, DeliveryTag, WorkMessage, WorkQueue};

struct InFlight {
    queue: String,
    message: WorkMessage,
}

#[derive(Default)]
struct QueueState {
    items: Mutex<VecDeque<WorkMessage>>,
    notify: Notify,
}

/// `tokio::sync::mpsc` + `dashmap` backed queue. Each named queue is a
/// `VecDeque` behind a `parking_lot::Mutex`; `consume` spawns a pump task
/// that pulls ready items and forwards them to the caller's channel. The
/// in-flight map (shared via `Arc<DashMap>` so the pump task can own a
/// handle independent of `&self`'s lifetime) tracks undelivered tags for
/// `ack`/`nack`.
#[derive(Default)]
pub struct InMemoryQueue {
    queues: DashMap<String, Arc<QueueState>>,
    in_flight: Arc<DashMap<DeliveryTag, InFlight>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn queue_state(&self, name: &str) -> Arc<QueueState> {
        self.queues
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(QueueState::default()))
            .clone()
    }
}

#[async_trait]
impl WorkQueue for InMemoryQueue {
    async fn publish(&self, routing_key: &str, message: WorkMessage) -> Result<()> {
        let state = self.queue_state(routing_key);
        state.items.lock().push_back(message);
        state.notify.notify_one();
        Ok(())
    }

    async fn consume(&self, queue: &str, prefetch: usize) -> Result<mpsc::Receiver<Delivery>> {
        let state = self.queue_state(queue);
        let (tx, rx) = mpsc::channel(prefetch.max(1));
        let queue_name = queue.to_string();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            loop {
                let next = state.items.lock().pop_front();
                let message = match next {
                    Some(message) => message,
                    None => {
                        state.notify.notified().await;
                        continue;
                    }
                };

                let tag = DeliveryTag(Uuid::new_v4().to_string());
                in_flight.insert(
                    tag.clone(),
                    InFlight {
                        queue: queue_name.clone(),
                        message: message.clone(),
                    },
                );

                if tx.send(Delivery { message, tag }).await.is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn ack(&self, tag: &DeliveryTag) -> Result<()> {
        self.in_flight.remove(tag);
        Ok(())
    }

    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()> {
        let Some((_, in_flight)) = self.in_flight.remove(tag) else {
            return Ok(());
        };

        if requeue {
            let state = self.queue_state(&in_flight.queue);
            let mut message = in_flight.message;
            message.attempt += 1;
            state.items.lock().push_back(message);
            state.notify.notify_one();
        } else {
            warn!(queue = %in_flight.queue, "message nacked without requeue, moving to dead letter");
            self.dead_letters.lock().push(DeadLetter {
                message: in_flight.message,
                failure_reason: None,
            });
        }
        Ok(())
    }

    async fn drain_dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(std::mem::take(&mut *self.dead_letters.lock()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;

    fn sample_message(attempt: u32) -> WorkMessage {
        WorkMessage {
            job_id: JobId::new(),
            stage: "scan".to_string(),
            collection_id: None,
            image_ref: None,
            parameters: serde_json::Value::Null,
            attempt,
            message_kind: "CollectionScan".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_then_consume_round_trips_a_message() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.publish("scan", sample_message(0)).await.unwrap();

        let mut rx = queue.consume("scan", 4).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        assert_eq!(delivery.message.stage, "scan");
        queue.ack(&delivery.tag).await.unwrap();
    }

    #[tokio::test]
    async fn nack_with_requeue_redelivers_with_incremented_attempt() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.publish("scan", sample_message(0)).await.unwrap();

        let mut rx = queue.consume("scan", 4).await.unwrap();
        let first = rx.recv().await.unwrap();
        queue.nack(&first.tag, true).await.unwrap();

        let second = rx.recv().await.unwrap();
        assert_eq!(second.message.attempt, 1);
    }

    #[tokio::test]
    async fn nack_without_requeue_lands_in_dead_letters() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.publish("scan", sample_message(0)).await.unwrap();

        let mut rx = queue.consume("scan", 4).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        queue.nack(&delivery.tag, false).await.unwrap();

        let drained = queue.drain_dead_letters().await.unwrap();
        assert_eq!(drained.len(), 1);

        let drained_again = queue.drain_dead_letters().await.unwrap();
        assert!(drained_again.is_empty());
    }
}
