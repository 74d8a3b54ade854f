use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::extractor::{self, Extractor};
use crate::log_throttle::RateLimitedLogger;
use crate::metrics::{EventSender, QueueProbe, StatsAggregator, StatsHandle, SystemStatus};
use crate::reader::Reader;
use crate::sink::SinkWorker;
use crate::writer::Writer;

// ─── Public entry point ──────────────────────────────────────────

/// Handles to every task of a running pipeline.
pub struct Pipeline {
    reader: JoinHandle<Result<(), PipelineError>>,
    workers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<SystemStatus>,
    stats: StatsHandle,
}

/// Spawn the tailer, `extractors` extractor tasks, `writers` sink writer
/// tasks and the stats aggregator, connected by three bounded queues.
///
/// Cancelling `shutdown` stops the reader; closure then flows down the
/// queues and every other task exits once its input is drained. A fatal
/// reader error cancels `shutdown` itself.
pub fn spawn(
    config: &PipelineConfig,
    mut reader: Box<dyn Reader>,
    writer: Arc<dyn Writer>,
    shutdown: CancellationToken,
) -> Pipeline {
    let capacity = config.queue_capacity.max(1);
    let (line_tx, line_rx) = flume::bounded(capacity);
    let (record_tx, record_rx) = flume::bounded(capacity);
    let (event_tx, event_rx) = flume::bounded(capacity);
    let events = EventSender::new(event_tx);

    // ── Stats ───────────────────────────────────────────────────
    let probe = QueueProbe::new(line_rx.clone(), record_rx.clone());
    let (aggregator, stats) = StatsAggregator::new(event_rx, probe, config.tick_interval);
    let aggregator = tokio::spawn(aggregator.run(shutdown.clone()));

    // ── Reader ──────────────────────────────────────────────────
    let reader = {
        let events = events.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = reader.run(line_tx, events, shutdown.clone()).await;
            if let Err(err) = &result {
                error!(error = %err, "reader failed, shutting pipeline down");
                shutdown.cancel();
            }
            result
        })
    };

    let mut workers = Vec::with_capacity(config.extractors + config.writers);

    // ── Extractors ──────────────────────────────────────────────
    let extractor = Arc::new(Extractor::new(config.time_zone));
    for id in 0..config.extractors.max(1) {
        workers.push(tokio::spawn(extractor::run_worker(
            id,
            extractor.clone(),
            line_rx.clone(),
            record_tx.clone(),
            events.clone(),
        )));
    }

    // ── Sink writers ────────────────────────────────────────────
    let failures = Arc::new(RateLimitedLogger::default());
    for id in 0..config.writers.max(1) {
        let worker = SinkWorker {
            id,
            writer: writer.clone(),
            retry: config.retry,
            batch_size: config.batch_size,
            events: events.clone(),
            failures: failures.clone(),
        };
        workers.push(tokio::spawn(worker.run(record_rx.clone())));
    }

    info!(
        extractors = config.extractors.max(1),
        writers = config.writers.max(1),
        queue_capacity = capacity,
        "pipeline started"
    );

    Pipeline {
        reader,
        workers,
        aggregator,
        stats,
    }
}

impl Pipeline {
    /// Handle for status queries; stays valid until the aggregator exits.
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Wait for every task to finish and return the final status.
    ///
    /// Only returns once the reader has stopped, so cancel the shutdown
    /// token first.
    pub async fn join(self) -> Result<SystemStatus, PipelineError> {
        let read_result = match self.reader.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Task(e.to_string())),
        };

        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "pipeline worker panicked");
            }
        }

        let status = self
            .aggregator
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?;

        read_result.map(|()| status)
    }
}
