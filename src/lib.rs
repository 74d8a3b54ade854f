//! Streaming access-log shipper.
//!
//! ```text
//! file ─▶ Tailer ─▶ raw-line queue ─▶ Extractor ×N ─▶ record queue ─▶ SinkWriter ×M ─▶ store
//!            └──────────────┬──────────────┘                               │
//!                           ▼                                              │
//!                      event queue ◀───────────────────────────────────────┘
//!                           │
//!                           ▼
//!                    StatsAggregator ◀── GET /monitor
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod log_throttle;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod reader;
pub mod record;
pub mod server;
pub mod sink;
pub mod writer;

/// Shared state available to every status handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Query side of the stats aggregator.
    pub stats: metrics::StatsHandle,
}
