//! Queue consumer loops: one per stage queue (`discover`, `scan`,
//! `thumbnail`, `cache`), each dispatching deliveries to its stage handler
//! and ack/nack-ing per spec.md §4.8's handler-outcome policy.

pub mod messages;
mod stage_cache;
mod stage_discover;
mod stage_scan;
mod stage_thumbnail;

use std::sync::Arc;

use imagevault_core::queue::Delivery;
use imagevault_core::CoreError;
use tracing::{error, info, warn};

use crate::state::CoreServices;

/// Spawns one consumer task per stage queue. Returns immediately; the
/// tasks run for the lifetime of the process (intended to be started once
/// from `main` alongside the retention sweeper and DLQ recovery).
pub fn spawn_all(services: Arc<CoreServices>) {
    for stage in ["discover", "scan", "thumbnail", "cache"] {
        let services = services.clone();
        tokio::spawn(async move {
            run_consumer(services, stage).await;
        });
    }
}

/// Per-job internal parallelism (spec.md §5.1): the `thumbnail`/`cache`
/// stages place all of one collection's derivatives under the single
/// cache folder that collection is bound to, so "one worker per distinct
/// cache folder touched" collapses to strictly sequential *within* a
/// single collection's stage message regardless of this setting — the
/// per-image loop in `stage_cache`/`stage_thumbnail` never parallelizes.
/// What `enable_parallel_cache_processing` controls is how many
/// *different* collections' derivative-stage messages (each bound to its
/// own, potentially distinct, cache folder) this consumer processes
/// concurrently: disabled, exactly one in flight; enabled, up to
/// `max_concurrent_processes`. `discover`/`scan` never touch cache
/// folders, so they always use the configured cap directly.
fn prefetch_for(stage: &str, config: &imagevault_core::CoreConfig) -> usize {
    match stage {
        "thumbnail" | "cache" if !config.enable_parallel_cache_processing => 1,
        _ => config.max_concurrent_processes.max(1),
    }
}

async fn run_consumer(services: Arc<CoreServices>, stage: &'static str) {
    let prefetch = prefetch_for(stage, &services.config);
    let mut receiver = match services.queue.consume(stage, prefetch).await {
        Ok(receiver) => receiver,
        Err(err) => {
            error!(%err, stage, "failed to start queue consumer");
            return;
        }
    };

    info!(stage, prefetch, "stage consumer started");

    while let Some(delivery) = receiver.recv().await {
        let services = services.clone();
        tokio::spawn(async move {
            handle_delivery(&services, stage, delivery).await;
        });
    }

    warn!(stage, "stage consumer channel closed");
}

async fn handle_delivery(services: &Arc<CoreServices>, stage: &'static str, delivery: Delivery) {
    let Delivery { message, tag } = delivery;

    let outcome = match stage {
        "discover" => stage_discover::handle(services, &message).await,
        "scan" => stage_scan::handle(services, &message).await,
        "thumbnail" => stage_thumbnail::handle(services, &message).await,
        "cache" => stage_cache::handle(services, &message).await,
        other => Err(CoreError::Internal(format!("no handler registered for stage {other}"))),
    };

    match outcome {
        Ok(()) => {
            if let Err(err) = services.queue.ack(&tag).await {
                warn!(%err, stage, job_id = %message.job_id, "ack failed");
            }
        }
        Err(err) if err.is_per_item() => {
            // Per-item faults already landed in the job's error_log inside
            // the handler; the message itself still completed its unit of
            // work, so it is acked rather than redelivered.
            warn!(%err, stage, job_id = %message.job_id, "stage completed with per-item faults");
            if let Err(ack_err) = services.queue.ack(&tag).await {
                warn!(%ack_err, stage, job_id = %message.job_id, "ack failed after per-item faults");
            }
        }
        Err(err) => {
            let max_attempts = services.config.retry_max_attempts;
            let requeue = message.attempt + 1 < max_attempts;
            error!(%err, stage, job_id = %message.job_id, attempt = message.attempt, requeue, "stage handler failed");
            if let Err(nack_err) = services.queue.nack(&tag, requeue).await {
                error!(%nack_err, stage, job_id = %message.job_id, "nack failed");
            }
            if !requeue {
                let _ = services
                    .jobs
                    .record_item_error(message.job_id, format!("{stage}:dead-letter"), &err)
                    .await;
            }
        }
    }
}
