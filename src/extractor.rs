//! Turns raw access log lines into [`Record`]s.
//!
//! Expected line shape (nginx-style, scheme after the time, upstream and
//! request times at the end):
//!
//! ```text
//! 172.0.0.12 - - [04/Mar/2018:13:49:52 +0000] http "GET /foo?query=t HTTP/1.0" 200 2133 "-" "KeepAliveClient" "-" 1.005 1.854
//! ```

use std::sync::Arc;

use chrono::{FixedOffset, NaiveDateTime, TimeZone};
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::error::ExtractError;
use crate::metrics::{CountedEvent, EventSender};
use crate::record::{RawLine, Record};

// ─── Grammar ─────────────────────────────────────────────────────

/// Capture groups: client address, ident, user, timestamp, scheme, request
/// line, status, bytes sent, referrer, user agent, forwarded-for, upstream
/// time, request time.
const ACCESS_LOG_PATTERN: &str = r#"([\d\.]+)\s+([^ \[]+)\s+([^ \[]+)\s+\[([^\]]+)\]\s+([a-z]+)\s+"([^"]+)"\s+(\d{3})\s+(\d+)\s+"([^"]+)"\s+"(.*?)"\s+"([\d\.-]+)"\s+([\d\.-]+)\s+([\d\.-]+)"#;

const GROUP_COUNT: usize = 13;

const TIMESTAMP_LAYOUT: &str = "%d/%b/%Y:%H:%M:%S";

/// The only zone offset the log format carries. The wall clock is read in
/// the configured zone, so any other offset would be silently misread.
const LOG_ZONE_OFFSET: &str = "+0000";

/// What the server writes when a timing does not apply.
const ABSENT_TIMING: &str = "-";

// Group indexes, 1-based like the pattern.
const TIMESTAMP: usize = 4;
const SCHEME: usize = 5;
const REQUEST_LINE: usize = 6;
const STATUS: usize = 7;
const BYTES_SENT: usize = 8;
const UPSTREAM_TIME: usize = 12;
const REQUEST_TIME: usize = 13;

// ─── Extractor ───────────────────────────────────────────────────

/// Compiled grammar plus the zone timestamps are read in. Shared by all
/// extractor workers.
#[derive(Debug, Clone)]
pub struct Extractor {
    pattern: Regex,
    time_zone: FixedOffset,
}

impl Extractor {
    pub fn new(time_zone: FixedOffset) -> Self {
        Self {
            pattern: Regex::new(ACCESS_LOG_PATTERN).expect("access log pattern compiles"),
            time_zone,
        }
    }

    /// Extract one record. Any failing field rejects the whole line.
    pub fn extract(&self, line: &[u8]) -> Result<Record, ExtractError> {
        let line = std::str::from_utf8(line).map_err(|_| ExtractError::InvalidUtf8)?;
        let caps = self.pattern.captures(line).ok_or(ExtractError::NoMatch)?;

        let groups: Vec<&str> = caps
            .iter()
            .skip(1)
            .map_while(|group| group.map(|m| m.as_str()))
            .collect();
        if groups.len() != GROUP_COUNT {
            return Err(ExtractError::NoMatch);
        }
        let group = |index: usize| groups[index - 1];

        let timestamp = self.parse_timestamp(group(TIMESTAMP))?;

        let bytes_sent = group(BYTES_SENT)
            .parse::<i64>()
            .map_err(|_| ExtractError::BytesSent(group(BYTES_SENT).to_string()))?;

        let request_line = group(REQUEST_LINE);
        let [method, target, _protocol] = split_request_line(request_line)
            .ok_or_else(|| ExtractError::RequestLine(request_line.to_string()))?;
        let path = parse_path(target)?;

        Ok(Record {
            timestamp,
            bytes_sent,
            path,
            method: method.to_string(),
            scheme: group(SCHEME).to_string(),
            status: group(STATUS).to_string(),
            upstream_time: parse_timing("upstream_time", group(UPSTREAM_TIME))?,
            request_time: parse_timing("request_time", group(REQUEST_TIME))?,
        })
    }

    /// `04/Mar/2018:13:49:52 +0000`: the wall clock is read in the
    /// configured zone. The offset must be exactly `+0000`.
    fn parse_timestamp(&self, value: &str) -> Result<chrono::DateTime<FixedOffset>, ExtractError> {
        let invalid = |reason: &str| ExtractError::Timestamp {
            value: value.to_string(),
            reason: reason.to_string(),
        };

        let (wall_clock, offset) = value
            .rsplit_once(' ')
            .ok_or_else(|| invalid("missing zone offset"))?;
        if offset != LOG_ZONE_OFFSET {
            return Err(invalid("unsupported zone offset"));
        }

        let naive = NaiveDateTime::parse_from_str(wall_clock, TIMESTAMP_LAYOUT)
            .map_err(|e| invalid(&e.to_string()))?;
        self.time_zone
            .from_local_datetime(&naive)
            .single()
            .ok_or_else(|| invalid("not representable in the reference zone"))
    }
}

fn split_request_line(request_line: &str) -> Option<[&str; 3]> {
    let mut tokens = request_line.split_whitespace();
    let parts = [tokens.next()?, tokens.next()?, tokens.next()?];
    tokens.next().is_none().then_some(parts)
}

/// Path of a request target, percent-decoded.
///
/// Origin-form targets (`/a/b?x=1`) are taken verbatim up to the query or
/// fragment, so dot segments survive. Absolute targets are validated as
/// urls but their path is also taken from the raw text.
fn parse_path(target: &str) -> Result<String, ExtractError> {
    let invalid = |reason: String| ExtractError::Target {
        value: target.to_string(),
        reason,
    };

    if target.chars().any(|c| c.is_ascii_control()) {
        return Err(invalid("control character in target".into()));
    }

    let raw_path: String = if target.starts_with('/') {
        strip_query(target).to_owned()
    } else {
        match Url::parse(target) {
            Ok(url) if url.cannot_be_a_base() => strip_query(url.path()).to_owned(),
            Ok(_) => authority_path(target).to_owned(),
            // `*` and other non-url targets are kept as-is
            Err(url::ParseError::RelativeUrlWithoutBase) => strip_query(target).to_owned(),
            Err(e) => return Err(invalid(e.to_string())),
        }
    };

    if !has_valid_escapes(&raw_path) {
        return Err(invalid("malformed percent escape".into()));
    }
    percent_decode_str(&raw_path)
        .decode_utf8()
        .map(|path| path.into_owned())
        .map_err(|e| invalid(e.to_string()))
}

fn strip_query(target: &str) -> &str {
    target.find(['?', '#']).map_or(target, |end| &target[..end])
}

/// Raw path of `scheme://authority/path?query`.
fn authority_path(target: &str) -> &str {
    let Some((_, rest)) = target.split_once("://") else {
        return "";
    };
    match rest.find(['/', '?', '#']) {
        Some(start) if rest[start..].starts_with('/') => strip_query(&rest[start..]),
        _ => "",
    }
}

/// Every `%` must start a two-digit hex escape.
fn has_valid_escapes(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes
        .iter()
        .enumerate()
        .filter(|(_, b)| **b == b'%')
        .all(|(i, _)| {
            bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
        })
}

fn parse_timing(field: &'static str, value: &str) -> Result<f64, ExtractError> {
    if value == ABSENT_TIMING {
        return Ok(0.0);
    }
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite() && *v >= 0.0)
        .ok_or_else(|| ExtractError::Duration {
            field,
            value: value.to_string(),
        })
}

// ─── Worker loop ─────────────────────────────────────────────────

/// Pull lines until the raw-line queue closes, pushing records downstream.
///
/// Rejected lines are counted and logged; they never stop the worker.
pub async fn run_worker(
    id: usize,
    extractor: Arc<Extractor>,
    lines: flume::Receiver<RawLine>,
    records: flume::Sender<Record>,
    events: EventSender,
) {
    while let Ok(line) = lines.recv_async().await {
        match extractor.extract(&line) {
            Ok(record) => {
                if records.send_async(record).await.is_err() {
                    debug!(worker = id, "record queue closed, extractor stopping");
                    return;
                }
            }
            Err(err) => {
                events.emit(CountedEvent::ParseError).await;
                warn!(
                    worker = id,
                    error = %err,
                    line = %String::from_utf8_lossy(&line),
                    "rejected log line"
                );
            }
        }
    }

    debug!(worker = id, "raw-line queue drained, extractor stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::shanghai;

    const SAMPLE: &str = r#"172.0.0.12 - - [04/Mar/2018:13:49:52 +0000] http "GET /foo?query=t HTTP/1.0" 200 2133 "-" "KeepAliveClient" "-" 1.005 1.854"#;

    fn extractor() -> Extractor {
        Extractor::new(shanghai())
    }

    #[test]
    fn extracts_sample_line() {
        let record = extractor().extract(SAMPLE.as_bytes()).unwrap();

        assert_eq!(record.timestamp.to_rfc3339(), "2018-03-04T13:49:52+08:00");
        assert_eq!(record.bytes_sent, 2133);
        assert_eq!(record.path, "/foo");
        assert_eq!(record.method, "GET");
        assert_eq!(record.scheme, "http");
        assert_eq!(record.status, "200");
        assert_eq!(record.upstream_time, 1.005);
        assert_eq!(record.request_time, 1.854);
    }

    #[test]
    fn missing_trailing_timings_do_not_match() {
        let line = r#"172.0.0.12 - - [04/Mar/2018:13:49:52 +0000] http "GET /foo?query=t HTTP/1.0" 200 2133 "-" "KeepAliveClient" "-""#;
        assert_eq!(extractor().extract(line.as_bytes()), Err(ExtractError::NoMatch));
    }

    #[test]
    fn non_utf8_line_is_rejected() {
        let mut line = SAMPLE.as_bytes().to_vec();
        line[3] = 0xff;
        assert_eq!(extractor().extract(&line), Err(ExtractError::InvalidUtf8));
    }

    #[test]
    fn bad_month_is_a_timestamp_error() {
        let line = SAMPLE.replace("04/Mar/2018", "04/Foo/2018");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::Timestamp { .. })
        ));
    }

    #[test]
    fn malformed_zone_offset_is_a_timestamp_error() {
        let line = SAMPLE.replace("+0000", "+00");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::Timestamp { .. })
        ));
    }

    #[test]
    fn non_utc_zone_offset_is_a_timestamp_error() {
        let line = SAMPLE.replace("+0000", "+0530");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::Timestamp { .. })
        ));
    }

    #[test]
    fn request_line_needs_three_tokens() {
        let line = SAMPLE.replace("GET /foo?query=t HTTP/1.0", "GET /foo?query=t");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::RequestLine(_))
        ));
    }

    #[test]
    fn malformed_target_is_rejected() {
        let line = SAMPLE.replace("/foo?query=t", "http://[::1/foo");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::Target { .. })
        ));
    }

    #[test]
    fn absolute_target_keeps_only_the_path() {
        let line = SAMPLE.replace("/foo?query=t", "http://example.com/a%20b?x=1");
        let record = extractor().extract(line.as_bytes()).unwrap();
        assert_eq!(record.path, "/a b");
    }

    #[test]
    fn bad_percent_escape_is_rejected() {
        for target in ["/foo%zz", "/foo%4", "http://example.com/a%g0"] {
            let line = SAMPLE.replace("/foo?query=t", target);
            assert!(
                matches!(
                    extractor().extract(line.as_bytes()),
                    Err(ExtractError::Target { .. })
                ),
                "{target}"
            );
        }
    }

    #[test]
    fn escapes_in_the_query_are_not_checked() {
        let line = SAMPLE.replace("/foo?query=t", "/foo?query=%zz");
        assert_eq!(extractor().extract(line.as_bytes()).unwrap().path, "/foo");
    }

    #[test]
    fn dot_segments_are_kept() {
        let line = SAMPLE.replace("/foo?query=t", "/a/../b/./c?x=1");
        assert_eq!(extractor().extract(line.as_bytes()).unwrap().path, "/a/../b/./c");

        let line = SAMPLE.replace("/foo?query=t", "https://example.com/a/../b");
        assert_eq!(extractor().extract(line.as_bytes()).unwrap().path, "/a/../b");
    }

    #[test]
    fn bytes_sent_beyond_i64_is_rejected() {
        let line = SAMPLE.replace(" 2133 ", " 9223372036854775808 ");
        assert_eq!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::BytesSent("9223372036854775808".into()))
        );
    }

    #[test]
    fn oversized_bytes_sent_is_rejected() {
        let line = SAMPLE.replace(" 2133 ", " 99999999999999999999999 ");
        assert!(matches!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::BytesSent(_))
        ));
    }

    #[test]
    fn malformed_timing_is_rejected() {
        let line = SAMPLE.replace("1.005 1.854", "1.0.05 1.854");
        assert_eq!(
            extractor().extract(line.as_bytes()),
            Err(ExtractError::Duration {
                field: "upstream_time",
                value: "1.0.05".into()
            })
        );
    }

    #[test]
    fn dash_timing_means_absent() {
        let line = SAMPLE.replace("1.005 1.854", "- 0.002");
        let record = extractor().extract(line.as_bytes()).unwrap();
        assert_eq!(record.upstream_time, 0.0);
        assert_eq!(record.request_time, 0.002);
    }

    #[tokio::test]
    async fn worker_forwards_records_and_counts_rejects() {
        let (line_tx, line_rx) = flume::bounded(8);
        let (record_tx, record_rx) = flume::bounded(8);
        let (event_tx, event_rx) = flume::unbounded();

        line_tx.send_async(SAMPLE.as_bytes().to_vec()).await.unwrap();
        line_tx.send_async(b"garbage".to_vec()).await.unwrap();
        line_tx.send_async(SAMPLE.as_bytes().to_vec()).await.unwrap();
        drop(line_tx);

        run_worker(0, Arc::new(extractor()), line_rx, record_tx, EventSender::new(event_tx)).await;

        assert_eq!(record_rx.drain().count(), 2);
        assert_eq!(event_rx.drain().collect::<Vec<_>>(), vec![CountedEvent::ParseError]);
    }
}
