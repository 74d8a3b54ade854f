use std::collections::VecDeque;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::percentiles::LatencySummary;
use super::{CountedEvent, QueueProbe};

// ─── Configuration ───────────────────────────────────────────────

/// Number of `handled_line` totals kept for the rate computation
const THROUGHPUT_WINDOW: usize = 2;

/// Pending status queries before callers start waiting
const QUERY_BUFFER: usize = 16;

/// HdrHistogram range: 1 μs → 60 s, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 60_000_000;
const HIST_SIGFIG: u8 = 3;

// ─── Public types ────────────────────────────────────────────────

/// Point-in-time pipeline health, computed fresh for every query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStatus {
    pub handle_line: u64,
    pub tps: f64,
    #[serde(rename = "readChanLen")]
    pub read_queue_len: usize,
    #[serde(rename = "writeChanLen")]
    pub write_queue_len: usize,
    #[serde(rename = "runTime")]
    pub run_time: String,
    #[serde(rename = "errNum")]
    pub err_num: u64,
    #[serde(rename = "sinkWritten")]
    pub sink_written: u64,
    #[serde(rename = "sinkErrNum")]
    pub sink_err_num: u64,
    #[serde(rename = "sinkLatency")]
    pub sink_latency: LatencySummary,
}

/// Fixed-capacity history of `handled_line` totals, oldest first.
#[derive(Debug, Clone, Default)]
pub struct ThroughputSample {
    totals: VecDeque<u64>,
}

impl ThroughputSample {
    pub fn new() -> Self {
        Self {
            totals: VecDeque::with_capacity(THROUGHPUT_WINDOW + 1),
        }
    }

    /// Append a total, evicting the oldest once the window is full.
    pub fn push(&mut self, total: u64) {
        self.totals.push_back(total);
        while self.totals.len() > THROUGHPUT_WINDOW {
            self.totals.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.totals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.totals.is_empty()
    }

    /// Lines per second between the two samples, or 0 until both exist.
    pub fn rate(&self, interval: Duration) -> f64 {
        let secs = interval.as_secs_f64();
        match (self.totals.front(), self.totals.back()) {
            (Some(oldest), Some(newest))
                if self.totals.len() >= THROUGHPUT_WINDOW && secs > 0.0 =>
            {
                newest.saturating_sub(*oldest) as f64 / secs
            }
            _ => 0.0,
        }
    }
}

/// Cloneable handle used by the status server to ask for a snapshot.
#[derive(Debug, Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<oneshot::Sender<SystemStatus>>,
}

impl StatsHandle {
    /// Ask the aggregator for a fresh snapshot.
    ///
    /// `None` once the aggregator has shut down.
    pub async fn snapshot(&self) -> Option<SystemStatus> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(reply_tx).await.ok()?;
        reply_rx.await.ok()
    }
}

/// Sole owner of the pipeline counters.
///
/// Runs as a single task: it drains the event queue, samples throughput on
/// every tick and answers snapshot queries, so none of its state is shared.
pub struct StatsAggregator {
    events: flume::Receiver<CountedEvent>,
    queries: mpsc::Receiver<oneshot::Sender<SystemStatus>>,
    probe: QueueProbe,
    tick_interval: Duration,
    state: Inner,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    handled_line: u64,
    err_num: u64,
    sink_written: u64,
    sink_err_num: u64,
}

struct Inner {
    counters: Counters,
    samples: ThroughputSample,
    sink_latency: Histogram<u64>,
    started: Instant,
}

// ─── StatsAggregator impl ────────────────────────────────────────

impl StatsAggregator {
    pub fn new(
        events: flume::Receiver<CountedEvent>,
        probe: QueueProbe,
        tick_interval: Duration,
    ) -> (Self, StatsHandle) {
        let (tx, queries) = mpsc::channel(QUERY_BUFFER);
        let aggregator = Self {
            events,
            queries,
            probe,
            tick_interval,
            state: Inner::new(),
        };
        (aggregator, StatsHandle { tx })
    }

    /// Run until every event sender is gone, then return the final snapshot.
    ///
    /// Cancelling `shutdown` only stops the throughput ticker; remaining
    /// events are still drained so the last snapshot is complete.
    pub async fn run(mut self, shutdown: CancellationToken) -> SystemStatus {
        let start = tokio::time::Instant::now() + self.tick_interval;
        let mut ticker = tokio::time::interval_at(start, self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut ticking = true;

        loop {
            tokio::select! {
                event = self.events.recv_async() => match event {
                    Ok(event) => self.state.apply(event),
                    Err(_) => break,
                },
                _ = ticker.tick(), if ticking => {
                    let total = self.state.counters.handled_line;
                    self.state.samples.push(total);
                    debug!(handled_line = total, "throughput sample taken");
                }
                Some(reply) = self.queries.recv() => {
                    let _ = reply.send(self.snapshot());
                }
                _ = shutdown.cancelled(), if ticking => {
                    debug!("stats ticker stopped, draining remaining events");
                    ticking = false;
                }
            }
        }

        let last = self.snapshot();
        info!(
            handle_line = last.handle_line,
            err_num = last.err_num,
            sink_written = last.sink_written,
            sink_err_num = last.sink_err_num,
            run_time = %last.run_time,
            "final pipeline status"
        );
        last
    }

    /// Snapshot of the current state; never mutates it.
    pub fn snapshot(&self) -> SystemStatus {
        self.state.snapshot(&self.probe, self.tick_interval)
    }
}

// ─── Inner impl ──────────────────────────────────────────────────

impl Inner {
    fn new() -> Self {
        Self {
            counters: Counters::default(),
            samples: ThroughputSample::new(),
            sink_latency: Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
                .expect("histogram creation"),
            started: Instant::now(),
        }
    }

    fn apply(&mut self, event: CountedEvent) {
        let counters = &mut self.counters;
        match event {
            CountedEvent::LineHandled => counters.handled_line += 1,
            CountedEvent::ParseError => counters.err_num += 1,
            CountedEvent::SinkWritten { records, latency } => {
                counters.sink_written += records as u64;
                // Clamp to the histogram range
                let us = (latency.as_micros() as u64).clamp(HIST_LOW, HIST_HIGH);
                let _ = self.sink_latency.record(us);
            }
            CountedEvent::SinkFailed { records } => counters.sink_err_num += records as u64,
        }
    }

    fn snapshot(&self, probe: &QueueProbe, tick_interval: Duration) -> SystemStatus {
        SystemStatus {
            handle_line: self.counters.handled_line,
            tps: self.samples.rate(tick_interval),
            read_queue_len: probe.read_len(),
            write_queue_len: probe.write_len(),
            run_time: format_run_time(self.started.elapsed()),
            err_num: self.counters.err_num,
            sink_written: self.counters.sink_written,
            sink_err_num: self.counters.sink_err_num,
            sink_latency: LatencySummary::from_histogram(&self.sink_latency),
        }
    }
}

/// Render an elapsed time as `1h2m3.5s`, `4m0s`, `2.25s` or `350ms`.
pub fn format_run_time(elapsed: Duration) -> String {
    if elapsed < Duration::from_secs(1) {
        return format!("{}ms", elapsed.as_millis());
    }

    let total_secs = elapsed.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let millis = elapsed.subsec_millis();

    let mut seconds = (total_secs % 60).to_string();
    if millis > 0 {
        let fraction = format!("{millis:03}");
        seconds.push('.');
        seconds.push_str(fraction.trim_end_matches('0'));
    }

    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, m) => format!("{m}m{seconds}s"),
        (h, m) => format!("{h}h{m}m{seconds}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(capacity: usize) -> (QueueProbe, flume::Sender<Vec<u8>>, flume::Sender<crate::record::Record>) {
        let (line_tx, line_rx) = flume::bounded(capacity);
        let (record_tx, record_rx) = flume::bounded(capacity);
        (QueueProbe::new(line_rx, record_rx), line_tx, record_tx)
    }

    #[test]
    fn tps_is_zero_until_two_samples_exist() {
        let mut samples = ThroughputSample::new();
        assert_eq!(samples.rate(Duration::from_secs(5)), 0.0);

        samples.push(10);
        assert_eq!(samples.rate(Duration::from_secs(5)), 0.0);

        samples.push(60);
        assert_eq!(samples.rate(Duration::from_secs(5)), 10.0);
    }

    #[test]
    fn throughput_window_evicts_oldest() {
        let mut samples = ThroughputSample::new();
        for total in [5, 20, 45] {
            samples.push(total);
        }
        assert_eq!(samples.len(), 2);
        assert_eq!(samples.rate(Duration::from_secs(5)), 5.0);
    }

    #[test]
    fn events_update_counters() {
        let mut inner = Inner::new();
        inner.apply(CountedEvent::LineHandled);
        inner.apply(CountedEvent::LineHandled);
        inner.apply(CountedEvent::ParseError);
        inner.apply(CountedEvent::SinkWritten {
            records: 3,
            latency: Duration::from_micros(250),
        });
        inner.apply(CountedEvent::SinkFailed { records: 1 });

        assert_eq!(
            inner.counters,
            Counters {
                handled_line: 2,
                err_num: 1,
                sink_written: 3,
                sink_err_num: 1,
            }
        );
        assert_eq!(inner.sink_latency.len(), 1);
    }

    #[test]
    fn snapshot_reports_queue_depths() {
        let (probe, line_tx, _record_tx) = probe(4);
        for _ in 0..3 {
            line_tx.try_send(b"line".to_vec()).unwrap();
        }

        let status = Inner::new().snapshot(&probe, Duration::from_secs(5));
        assert_eq!(status.read_queue_len, 3);
        assert_eq!(status.write_queue_len, 0);
        assert_eq!(status.tps, 0.0);
    }

    #[test]
    fn status_serializes_with_wire_field_names() {
        let (probe, _line_tx, _record_tx) = probe(1);
        let status = Inner::new().snapshot(&probe, Duration::from_secs(5));
        let json = serde_json::to_value(&status).unwrap();

        for field in ["handle_line", "tps", "readChanLen", "writeChanLen", "runTime", "errNum"] {
            assert!(json.get(field).is_some(), "missing {field}");
        }
    }

    #[test]
    fn run_time_formatting() {
        assert_eq!(format_run_time(Duration::from_millis(350)), "350ms");
        assert_eq!(format_run_time(Duration::from_millis(2_250)), "2.25s");
        assert_eq!(format_run_time(Duration::from_secs(240)), "4m0s");
        assert_eq!(format_run_time(Duration::from_millis(3_723_500)), "1h2m3.5s");
    }

    #[tokio::test]
    async fn aggregator_answers_queries_and_flushes_on_close() {
        let (events_tx, events_rx) = flume::bounded(16);
        let (probe, _line_tx, _record_tx) = probe(4);
        let (aggregator, handle) = StatsAggregator::new(events_rx, probe, Duration::from_secs(5));
        let task = tokio::spawn(aggregator.run(CancellationToken::new()));

        for _ in 0..5 {
            events_tx.send_async(CountedEvent::LineHandled).await.unwrap();
        }
        events_tx.send_async(CountedEvent::ParseError).await.unwrap();

        // Queries and events race; poll until the events are applied.
        let mut status = handle.snapshot().await.unwrap();
        for _ in 0..50 {
            if status.handle_line == 5 && status.err_num == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            status = handle.snapshot().await.unwrap();
        }
        assert_eq!(status.handle_line, 5);
        assert_eq!(status.err_num, 1);

        drop(events_tx);
        let last = task.await.unwrap();
        assert_eq!(last.handle_line, 5);
        assert!(handle.snapshot().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_samples_handled_lines() {
        let (events_tx, events_rx) = flume::bounded(64);
        let (probe, _line_tx, _record_tx) = probe(4);
        let (aggregator, handle) = StatsAggregator::new(events_rx, probe, Duration::from_secs(5));
        tokio::spawn(aggregator.run(CancellationToken::new()));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        for _ in 0..50 {
            events_tx.send_async(CountedEvent::LineHandled).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(5)).await;

        let status = handle.snapshot().await.unwrap();
        assert_eq!(status.handle_line, 50);
        assert_eq!(status.tps, 10.0);
    }
}
