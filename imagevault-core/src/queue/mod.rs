//! Work Queue (C8): at-least-once, broker-agnostic handoff between
//! discovery, scan, thumbnail, and cache stages.
//!
//! Two real implementations are provided, chosen by deployment shape:
//! [`InMemoryQueue`] for tests and single-process deployments, and
//! [`redis_stream::RedisStreamQueue`] for durable multi-process ones.
//! Both satisfy the same [`WorkQueue`] trait so the job manager never
//! branches on transport.

pub mod memory;
#[cfg(feature = "redis-queue")]
pub mod redis_stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{CollectionId, JobId};
use crate::error::Result;

pub use memory::InMemoryQueue;
#[cfg(feature = "redis-queue")]
pub use redis_stream::RedisStreamQueue;

/// The conceptual job input message, carried generically so the queue
/// layer never depends on the concrete message payloads the job manager
/// defines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkMessage {
    pub job_id: JobId,
    pub stage: String,
    pub collection_id: Option<CollectionId>,
    /// `image_id` or a `VirtualPath` string, depending on the stage.
    pub image_ref: Option<String>,
    pub parameters: serde_json::Value,
    pub attempt: u32,
    /// Carried on every message so DLQ recovery can resolve a routing key.
    pub message_kind: String,
}

impl WorkMessage {
    /// Handler idempotency key: `{job_id, stage, collection_id |
    /// image_ref}`. Shared between the job manager and test harnesses so
    /// both derive the same key.
    pub fn idempotency_key(&self) -> String {
        let discriminator = self
            .image_ref
            .clone()
            .or_else(|| self.collection_id.map(|id| id.to_string()))
            .unwrap_or_default();
        format!("{}:{}:{}", self.job_id, self.stage, discriminator)
    }
}

/// Opaque handle identifying one in-flight delivery to the transport that
/// produced it. Never parsed by callers.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct DeliveryTag(pub String);

/// One delivered message plus the tag needed to ack/nack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: WorkMessage,
    pub tag: DeliveryTag,
}

/// A message that exhausted retries (or was nacked without requeue) and
/// landed on the dead-letter endpoint.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub message: WorkMessage,
    pub failure_reason: Option<String>,
}

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Durable, at-least-once publish to `routing_key`.
    async fn publish(&self, routing_key: &str, message: WorkMessage) -> Result<()>;

    /// Begin consuming `queue` with at most `prefetch` deliveries
    /// in-flight at once. The returned receiver is dropped to stop
    /// consuming; outstanding deliveries remain unacked.
    async fn consume(&self, queue: &str, prefetch: usize) -> Result<mpsc::Receiver<Delivery>>;

    /// Acknowledge successful handling; removes the message.
    async fn ack(&self, tag: &DeliveryTag) -> Result<()>;

    /// `requeue = true` retries the message; `requeue = false` sends it
    /// to the dead-letter endpoint.
    async fn nack(&self, tag: &DeliveryTag, requeue: bool) -> Result<()>;

    /// Drains the dead-letter endpoint for recovery. Draining removes the
    /// entries from the DLQ.
    async fn drain_dead_letters(&self) -> Result<Vec<DeadLetter>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idempotency_key_prefers_image_ref_over_collection_id() {
        let msg = WorkMessage {
            job_id: JobId::new(),
            stage: "cache".to_string(),
            collection_id: Some(CollectionId::new()),
            image_ref: Some("archive.cbz#page-01.jpg".to_string()),
            parameters: serde_json::Value::Null,
            attempt: 1,
            message_kind: "CacheGeneration".to_string(),
        };
        assert!(msg.idempotency_key().contains("archive.cbz#page-01.jpg"));
    }
}
