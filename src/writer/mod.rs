//! Record destinations.

mod influx;

use std::fmt::Write as _;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::config::Precision;
use crate::error::SinkError;
use crate::record::Record;

pub use influx::InfluxWriter;

/// Measurement every access log point is written under.
pub const MEASUREMENT: &str = "nginx_log";

/// Persists batches of records. One instance is shared by every sink
/// writer worker, so implementations must tolerate concurrent calls.
#[async_trait]
pub trait Writer: Send + Sync {
    async fn write(&self, batch: &[Record]) -> Result<(), SinkError>;
}

// ─── Points ──────────────────────────────────────────────────────

/// A numeric field value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Integer(i64),
}

/// One time-series point as it will be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    pub measurement: &'static str,
    /// Sorted by key, as the store prefers
    pub tags: Vec<(&'static str, String)>,
    pub fields: Vec<(&'static str, FieldValue)>,
    pub timestamp: DateTime<FixedOffset>,
}

impl Point {
    /// Tags `{Path, Method, Scheme, Status}`, fields
    /// `{UpstreamTime, RequestTime, BytesSent}`, stamped with the request time.
    pub fn from_record(record: &Record) -> Self {
        Self {
            measurement: MEASUREMENT,
            tags: vec![
                ("Method", record.method.clone()),
                ("Path", record.path.clone()),
                ("Scheme", record.scheme.clone()),
                ("Status", record.status.clone()),
            ],
            fields: vec![
                ("BytesSent", FieldValue::Integer(record.bytes_sent)),
                ("RequestTime", FieldValue::Float(record.request_time)),
                ("UpstreamTime", FieldValue::Float(record.upstream_time)),
            ],
            timestamp: record.timestamp,
        }
    }

    /// Append this point in line protocol, without a trailing newline.
    pub fn write_line_protocol(&self, precision: Precision, out: &mut String) {
        escape_into(out, self.measurement, &[',', ' ']);
        for (key, value) in &self.tags {
            // Empty tag values are not allowed by the store
            if value.is_empty() {
                continue;
            }
            out.push(',');
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            escape_into(out, value, &[',', '=', ' ']);
        }

        for (i, (key, value)) in self.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { ',' });
            escape_into(out, key, &[',', '=', ' ']);
            out.push('=');
            let _ = match value {
                FieldValue::Float(v) => write!(out, "{v}"),
                FieldValue::Integer(v) => write!(out, "{v}i"),
            };
        }

        let _ = write!(out, " {}", precision.timestamp(&self.timestamp));
    }
}

/// Encode a batch as a line-protocol request body.
pub fn line_protocol(batch: &[Record], precision: Precision) -> String {
    let mut body = String::with_capacity(batch.len() * 160);
    for (i, record) in batch.iter().enumerate() {
        if i > 0 {
            body.push('\n');
        }
        Point::from_record(record).write_line_protocol(precision, &mut body);
    }
    body
}

fn escape_into(out: &mut String, value: &str, special: &[char]) {
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
