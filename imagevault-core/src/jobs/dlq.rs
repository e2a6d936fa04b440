//! Dead-letter recovery: on startup, drain the dead-letter
//! endpoint, resolve each message's canonical routing key from its
//! `message_kind` header via a static map, strip prior failure
//! annotations, and republish. Logs a per-kind summary.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::error::Result;
use crate::queue::WorkQueue;

/// `message_kind -> routing_key`, built once. The teacher's own pattern
/// for process-wide static lookup tables (`once_cell::sync::Lazy` used
/// across `ferrex-core`).
static ROUTING_MAP: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("Discovery", "discover"),
        ("BulkAdd", "discover"),
        ("CollectionScan", "scan"),
        ("ThumbnailGeneration", "thumbnail"),
        ("CacheGeneration", "cache"),
        ("Composite", "scan"),
    ])
});

#[derive(Debug, Default, Clone)]
pub struct DlqRecoverySummary {
    pub republished_by_kind: HashMap<String, u64>,
    pub unresolved: u64,
}

/// Drains `queue`'s dead-letter endpoint and republishes every recovered
/// message to the routing key its `message_kind` resolves to. A message
/// whose kind has no entry in [`ROUTING_MAP`] is counted as `unresolved`
/// and left undelivered rather than guessed at.
pub async fn recover(queue: &dyn WorkQueue) -> Result<DlqRecoverySummary> {
    let dead_letters = queue.drain_dead_letters().await?;
    let mut summary = DlqRecoverySummary::default();

    for dead in dead_letters {
        let mut message = dead.message;
        // Strip prior failure annotations so the message doesn't walk
        // straight back into the DLQ on a second, identical failure.
        message.attempt = 0;

        let Some(routing_key) = ROUTING_MAP.get(message.message_kind.as_str()) else {
            warn!(message_kind = %message.message_kind, "dead letter has unrecognized message_kind, leaving unresolved");
            summary.unresolved += 1;
            continue;
        };

        queue.publish(routing_key, message.clone()).await?;
        *summary
            .republished_by_kind
            .entry(message.message_kind.clone())
            .or_insert(0) += 1;
    }

    if !summary.republished_by_kind.is_empty() || summary.unresolved > 0 {
        info!(?summary.republished_by_kind, unresolved = summary.unresolved, "dead-letter recovery complete");
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobId;
    use crate::queue::{InMemoryQueue, WorkMessage};
    use std::sync::Arc;

    #[tokio::test]
    async fn recover_republishes_known_kinds_and_strips_attempt() {
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .publish(
                "cache",
                WorkMessage {
                    job_id: JobId::new(),
                    stage: "cache".to_string(),
                    collection_id: None,
                    image_ref: None,
                    parameters: serde_json::Value::Null,
                    attempt: 4,
                    message_kind: "CacheGeneration".to_string(),
                },
            )
            .await
            .unwrap();

        let mut rx = queue.consume("cache", 1).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        queue.nack(&delivery.tag, false).await.unwrap();

        let summary = recover(queue.as_ref()).await.unwrap();
        assert_eq!(summary.republished_by_kind.get("CacheGeneration"), Some(&1));
        assert_eq!(summary.unresolved, 0);

        let mut rx = queue.consume("cache", 1).await.unwrap();
        let redelivered = rx.recv().await.unwrap();
        assert_eq!(redelivered.message.attempt, 0);
    }

    #[tokio::test]
    async fn recover_counts_unrecognized_kinds_as_unresolved() {
        let queue = Arc::new(InMemoryQueue::new());
        queue
            .publish(
                "mystery",
                WorkMessage {
                    job_id: JobId::new(),
                    stage: "mystery".to_string(),
                    collection_id: None,
                    image_ref: None,
                    parameters: serde_json::Value::Null,
                    attempt: 1,
                    message_kind: "Unknown".to_string(),
                },
            )
            .await
            .unwrap();

        let mut rx = queue.consume("mystery", 1).await.unwrap();
        let delivery = rx.recv().await.unwrap();
        queue.nack(&delivery.tag, false).await.unwrap();

        let summary = recover(queue.as_ref()).await.unwrap();
        assert_eq!(summary.unresolved, 1);
    }
}
