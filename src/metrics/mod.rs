pub mod collector;
pub mod percentiles;
pub mod stream;

use std::time::Duration;

pub use collector::{StatsAggregator, StatsHandle, SystemStatus, ThroughputSample};

/// Something a pipeline stage wants counted.
/// This is the "write" side — stages create these and push them in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedEvent {
    /// The tailer read one complete line
    LineHandled,
    /// An extractor rejected a line
    ParseError,
    /// A sink write for `records` records succeeded
    SinkWritten { records: usize, latency: Duration },
    /// A sink write for `records` records was given up
    SinkFailed { records: usize },
}

/// Explicit handle to the event queue, cloned into every stage that counts
/// something.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: flume::Sender<CountedEvent>,
}

impl EventSender {
    pub fn new(tx: flume::Sender<CountedEvent>) -> Self {
        Self { tx }
    }

    /// Queue an event, waiting while the event queue is full.
    ///
    /// Events sent after the aggregator has stopped are dropped.
    pub async fn emit(&self, event: CountedEvent) {
        if self.tx.send_async(event).await.is_err() {
            tracing::debug!(?event, "stats aggregator gone, event dropped");
        }
    }
}

/// Read-only view of the two pipeline queues, used for backlog depth.
///
/// Holds receiver clones only and never takes items.
#[derive(Debug, Clone)]
pub struct QueueProbe {
    lines: flume::Receiver<crate::record::RawLine>,
    records: flume::Receiver<crate::record::Record>,
}

impl QueueProbe {
    pub fn new(
        lines: flume::Receiver<crate::record::RawLine>,
        records: flume::Receiver<crate::record::Record>,
    ) -> Self {
        Self { lines, records }
    }

    /// Items waiting in the raw-line queue.
    pub fn read_len(&self) -> usize {
        self.lines.len()
    }

    /// Items waiting in the record queue.
    pub fn write_len(&self) -> usize {
        self.records.len()
    }
}
