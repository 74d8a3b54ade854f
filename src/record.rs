use chrono::{DateTime, FixedOffset};
use serde::Serialize;

/// One log line as read from the file, terminator stripped.
pub type RawLine = Vec<u8>;

/// Request metrics extracted from one access log line.
///
/// Built once by an extractor worker and moved through the record queue to
/// exactly one sink writer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Request time, wall clock read in the configured reference zone
    pub timestamp: DateTime<FixedOffset>,
    pub bytes_sent: i64,
    /// Path component of the request target, percent-decoded
    pub path: String,
    pub method: String,
    /// `http` / `https`
    pub scheme: String,
    /// Three-digit status code, kept as text for tagging
    pub status: String,
    /// Seconds spent waiting on the upstream
    pub upstream_time: f64,
    /// Total request seconds
    pub request_time: f64,
}
