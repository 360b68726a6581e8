// src/workers/mod.rs
//
// Queue consumers that drain Redis lists into PostgreSQL. All four workers
// share one batched template: buffer until size or timeout, try one bulk
// write, fall back to row-by-row, requeue rows that still fail. Failures
// never sit in memory; they land back on the same Redis list, so a DB
// outage accumulates as queue length instead of data loss.

pub mod autosave;
pub mod cheat;
pub mod question_order;
pub mod scoring;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub const BATCH_SIZE: usize = 50;
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(2);
/// BLPOP wait. Also bounds how quickly a worker notices shutdown.
pub const POLL_TIMEOUT_SECS: f64 = 1.0;
/// Allowed time for the final flush when shutting down.
pub const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// How a failed single-row write should be handled.
#[derive(Debug)]
pub enum PersistError {
    /// The payload can never succeed (bad UUID, bad timestamp). Log and drop.
    Drop(String),
    /// Transient failure (DB down). Requeue and retry later.
    Retry(String),
}

/// One queue consumer. Implementations provide the bulk write, the
/// row-by-row fallback, and optionally a post-flush hook.
#[allow(async_fn_in_trait)]
pub trait QueueWorker {
    type Payload: Serialize + DeserializeOwned + Send + Sync + 'static;

    const NAME: &'static str;
    const QUEUE: &'static str;

    /// One bulk write for the whole batch. Any error sends the batch to the
    /// row-by-row fallback.
    async fn flush_bulk(&self, batch: &[Self::Payload]) -> Result<(), sqlx::Error>;

    /// Persist one row. Decides drop-vs-requeue per item.
    async fn persist_single(&self, item: &Self::Payload) -> Result<(), PersistError>;

    /// Runs after a successful bulk flush (e.g. releasing answer buffers).
    async fn after_flush(&self, _redis: &mut ConnectionManager, _batch: &[Self::Payload]) {}
}

/// The shared consumer loop. Each worker runs this on its own task with its
/// own Redis connection: BLPOP blocks the connection it runs on, so the
/// request-path connection is never shared with workers.
pub async fn run<W: QueueWorker>(
    worker: W,
    mut redis: ConnectionManager,
    shutdown: watch::Receiver<bool>,
) {
    tracing::info!(worker = W::NAME, queue = W::QUEUE, "Worker started");

    let mut buffer: Vec<W::Payload> = Vec::with_capacity(BATCH_SIZE);
    let mut last_flush = Instant::now();

    loop {
        if !buffer.is_empty()
            && (buffer.len() >= BATCH_SIZE || last_flush.elapsed() >= BATCH_TIMEOUT)
        {
            flush_safe(&worker, &mut redis, &buffer).await;
            buffer.clear();
            last_flush = Instant::now();
        }

        if *shutdown.borrow() {
            tracing::info!(worker = W::NAME, "Shutdown requested, flushing remaining buffer");
            if !buffer.is_empty() {
                let flush = flush_safe(&worker, &mut redis, &buffer);
                if tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, flush).await.is_err() {
                    tracing::error!(worker = W::NAME, "Final flush timed out");
                }
            }
            return;
        }

        let popped: Result<Option<(String, String)>, redis::RedisError> =
            redis.blpop(W::QUEUE, POLL_TIMEOUT_SECS).await;

        let raw = match popped {
            Ok(Some((_queue, raw))) => raw,
            Ok(None) => continue, // timeout, loop back to the flush timer
            Err(e) => {
                tracing::error!(worker = W::NAME, error = %e, "Redis error, backing off");
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        match serde_json::from_str::<W::Payload>(&raw) {
            Ok(payload) => buffer.push(payload),
            Err(e) => {
                // Malformed JSON can never succeed on retry.
                tracing::error!(worker = W::NAME, error = %e, data = %raw, "Discarding malformed payload");
            }
        }
    }
}

/// Bulk first; on failure every row individually; rows that still fail go
/// back on the queue.
async fn flush_safe<W: QueueWorker>(
    worker: &W,
    redis: &mut ConnectionManager,
    batch: &[W::Payload],
) {
    if batch.is_empty() {
        return;
    }

    match worker.flush_bulk(batch).await {
        Ok(()) => {
            worker.after_flush(redis, batch).await;
        }
        Err(e) => {
            tracing::warn!(
                worker = W::NAME,
                count = batch.len(),
                error = %e,
                "Bulk write failed, attempting row-by-row recovery"
            );

            let mut requeue: Vec<&W::Payload> = Vec::new();
            for item in batch {
                match worker.persist_single(item).await {
                    Ok(()) => {}
                    Err(PersistError::Drop(reason)) => {
                        tracing::error!(worker = W::NAME, reason = %reason, "Dropping unprocessable payload");
                    }
                    Err(PersistError::Retry(reason)) => {
                        tracing::error!(worker = W::NAME, reason = %reason, "Single persist failed, requeueing");
                        requeue.push(item);
                    }
                }
            }

            if !requeue.is_empty() {
                requeue_items::<W>(redis, &requeue).await;
            }
        }
    }
}

async fn requeue_items<W: QueueWorker>(redis: &mut ConnectionManager, items: &[&W::Payload]) {
    let mut pipe = redis::pipe();
    for item in items {
        match serde_json::to_string(item) {
            Ok(raw) => {
                pipe.rpush(W::QUEUE, raw).ignore();
            }
            Err(e) => {
                tracing::error!(worker = W::NAME, error = %e, "Failed to re-encode payload");
            }
        }
    }

    match pipe.query_async::<()>(redis).await {
        Ok(()) => {
            tracing::info!(worker = W::NAME, count = items.len(), "Requeued failed items");
            // Avoid thrashing a database that is down hard.
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(e) => {
            tracing::error!(worker = W::NAME, error = %e, "CRITICAL: requeue failed, data lost");
        }
    }
}
