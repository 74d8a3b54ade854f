//! Sink writer workers: drain the record queue into a [`Writer`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;

use crate::config::RetryPolicy;
use crate::error::SinkError;
use crate::log_throttle::RateLimitedLogger;
use crate::metrics::{CountedEvent, EventSender};
use crate::record::Record;
use crate::writer::Writer;

/// One sink writer worker.
///
/// A failed write is retried under `retry`, then reported and dropped; the
/// worker always moves on to the next record.
pub struct SinkWorker {
    pub id: usize,
    pub writer: Arc<dyn Writer>,
    pub retry: RetryPolicy,
    pub batch_size: usize,
    pub events: EventSender,
    /// Shared by all workers so a dead sink logs once per interval in total
    pub failures: Arc<RateLimitedLogger>,
}

impl SinkWorker {
    /// Run until the record queue is closed and empty.
    pub async fn run(self, records: flume::Receiver<Record>) {
        let batch_size = self.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);

        while let Ok(first) = records.recv_async().await {
            batch.push(first);
            // Top up with whatever is already queued, without waiting
            while batch.len() < batch_size {
                match records.try_recv() {
                    Ok(record) => batch.push(record),
                    Err(_) => break,
                }
            }

            let started = Instant::now();
            match self.write_with_retry(&batch).await {
                Ok(()) => {
                    self.events
                        .emit(CountedEvent::SinkWritten {
                            records: batch.len(),
                            latency: started.elapsed(),
                        })
                        .await;
                }
                Err(err) => {
                    self.failures.error("dropping batch after failed sink write", &err);
                    self.events
                        .emit(CountedEvent::SinkFailed {
                            records: batch.len(),
                        })
                        .await;
                }
            }
            batch.clear();
        }

        debug!(worker = self.id, "record queue drained, sink writer stopping");
    }

    async fn write_with_retry(&self, batch: &[Record]) -> Result<(), SinkError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(jittered(self.retry.delay_for(attempt - 1))).await;
            }

            match self.writer.write(batch).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    // Reported once per batch by the rate-limited logger
                    debug!(
                        worker = self.id,
                        attempt,
                        max_attempts = attempts,
                        records = batch.len(),
                        error = %e,
                        "sink write attempt failed"
                    );
                    last_error = e.to_string();
                }
            }
        }

        Err(SinkError::RetriesExhausted {
            attempts,
            last_error,
        })
    }
}

/// Add up to 50% random jitter so workers do not retry in lockstep.
fn jittered(delay: Duration) -> Duration {
    let max_jitter = delay.as_millis() as u64 / 2;
    if max_jitter == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}
