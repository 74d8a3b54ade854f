use std::io;
use std::path::PathBuf;

use thiserror::Error;

// ─── Fatal pipeline errors ───────────────────────────────────────

/// Conditions that stop the whole process.
///
/// Everything else (bad lines, failed sink writes) is counted and logged
/// by the stage that hit it and never reaches this type.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to seek to end of {}: {source}", path.display())]
    Seek {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("read error on {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid sink descriptor: {0}")]
    InvalidDsn(String),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("failed to bind status listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("status server failed: {0}")]
    Serve(#[source] io::Error),

    #[error("pipeline task failed: {0}")]
    Task(String),
}

// ─── Per-line extraction errors ──────────────────────────────────

/// Why a single raw line was rejected by the extractor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("line is not valid UTF-8")]
    InvalidUtf8,

    #[error("line does not match the access log grammar")]
    NoMatch,

    #[error("invalid timestamp {value:?}: {reason}")]
    Timestamp { value: String, reason: String },

    #[error("invalid bytes_sent {0:?}")]
    BytesSent(String),

    #[error("request line {0:?} is not `method target protocol`")]
    RequestLine(String),

    #[error("invalid request target {value:?}: {reason}")]
    Target { value: String, reason: String },

    #[error("invalid {field} {value:?}")]
    Duration { field: &'static str, value: String },
}

// ─── Sink errors ─────────────────────────────────────────────────

/// Failures of the time-series sink. Reported per write, never fatal
/// once the pipeline is running.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to initialize sink: {0}")]
    Init(String),

    #[error("sink request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("sink rejected write with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("all {attempts} write attempts failed: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// The store could not be reached or refused the data.
    #[error("{0}")]
    Unavailable(String),
}
