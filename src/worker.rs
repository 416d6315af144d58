use crate::processor::{ProcessOutcome, Processor};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle for enqueueing leads for background processing.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::Sender<i64>,
}

impl WorkQueue {
    /// Queues a lead for processing. Applies backpressure when the channel
    /// is full; fails only once the worker has shut down.
    pub async fn enqueue(&self, lead_id: i64) -> anyhow::Result<()> {
        self.tx
            .send(lead_id)
            .await
            .map_err(|_| anyhow::anyhow!("worker queue closed"))
    }
}

/// Spawns the background delivery worker and returns its queue handle.
///
/// The worker drains the channel one lead at a time. A `Retry` outcome
/// re-enqueues the lead from a detached timer task, so a sleeping lead
/// never blocks the queue. Processing errors are logged and dropped; the
/// lead stays in its persisted status and can be re-enqueued later.
pub fn spawn_worker(processor: Arc<Processor>, capacity: usize) -> WorkQueue {
    let (tx, mut rx) = mpsc::channel::<i64>(capacity);
    let queue = WorkQueue { tx: tx.clone() };

    tokio::spawn(async move {
        tracing::info!("delivery worker started");
        while let Some(lead_id) = rx.recv().await {
            match processor.process(lead_id).await {
                Ok(ProcessOutcome::Retry { after }) => {
                    let tx = tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        if tx.send(lead_id).await.is_err() {
                            tracing::warn!(lead_id, "worker queue closed, dropping retry");
                        }
                    });
                }
                Ok(outcome) => {
                    tracing::debug!(lead_id, ?outcome, "lead processed");
                }
                Err(e) => {
                    tracing::error!(lead_id, error = %e, "lead processing failed");
                }
            }
        }
        tracing::info!("delivery worker stopped");
    });

    queue
}
