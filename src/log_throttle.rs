//! Rate-limited error logging.
//!
//! A sink that is down fails every write; logging each one would bury the
//! rest of the log. This logs at most once per interval and reports how many
//! errors were folded into that line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Default interval between two logged errors
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(10);

pub struct RateLimitedLogger {
    min_interval: Duration,
    last_log_time: Mutex<Option<Instant>>,
    /// Errors since the last logged one
    suppressed: AtomicU64,
    total_errors: AtomicU64,
}

impl RateLimitedLogger {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_log_time: Mutex::new(None),
            suppressed: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        }
    }

    /// Record an error, logging it if the interval has passed.
    ///
    /// Returns whether this call produced a log line.
    pub fn error(&self, message: &str, error: &dyn std::fmt::Display) -> bool {
        let total = self.total_errors.fetch_add(1, Ordering::Relaxed) + 1;

        let should_log = {
            let mut last = self.last_log_time.lock();
            let now = Instant::now();
            match *last {
                Some(at) if now.duration_since(at) < self.min_interval => false,
                _ => {
                    *last = Some(now);
                    true
                }
            }
        };

        if !should_log {
            self.suppressed.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let suppressed = self.suppressed.swap(0, Ordering::Relaxed);
        tracing::error!(
            message = %message,
            error = %error,
            suppressed_count = suppressed,
            total_errors = total,
            "sink error"
        );
        true
    }

    pub fn total_errors(&self) -> u64 {
        self.total_errors.load(Ordering::Relaxed)
    }
}

impl Default for RateLimitedLogger {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_INTERVAL)
    }
}
