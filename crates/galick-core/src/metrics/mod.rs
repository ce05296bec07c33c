use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

// Latency distribution bounds: 1 microsecond to 1 hour, 3 significant figures.
const LATENCY_LOW_MICROS: u64 = 1;
const LATENCY_HIGH_MICROS: u64 = 3_600_000_000;
const LATENCY_SIGFIGS: u8 = 3;

fn new_latency_histogram() -> Histogram<u64> {
    Histogram::new_with_bounds(LATENCY_LOW_MICROS, LATENCY_HIGH_MICROS, LATENCY_SIGFIGS)
        .expect("latency histogram bounds are statically valid")
}

// ---------------------------------------------------------------------------
// AttackResult — the immutable outcome of one attempted request
// ---------------------------------------------------------------------------

/// Outcome of a single request attempt.
///
/// `code` is 0 when no response was obtained. `error` is `None` on success;
/// otherwise it carries a short classified message. Exactly one of
/// success / error holds for any result (see [`AttackResult::is_success`]).
#[derive(Debug, Clone)]
pub struct AttackResult {
    /// Monotonic start time of the attempt.
    pub timestamp: Instant,
    /// Time from dispatch until the body was fully drained (or the failure).
    pub latency: Duration,
    /// HTTP status code; 0 when no response was obtained.
    pub code: u16,
    /// Bytes read from the response body.
    pub bytes_in: u64,
    /// Bytes written in the request body; 0 when unknown.
    pub bytes_out: u64,
    /// Short classified failure message; `None` on success.
    pub error: Option<String>,
}

impl AttackResult {
    /// A result counts as a success only when no error occurred *and* the
    /// status code is in the 2xx–3xx range. A clean transport exchange that
    /// returned a 5xx is an error for aggregation purposes.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..400).contains(&self.code)
    }

    /// Build a failed result stamped at `timestamp`, with latency measured
    /// from that instant.
    pub fn failure(timestamp: Instant, error: impl Into<String>) -> Self {
        Self {
            timestamp,
            latency: timestamp.elapsed(),
            code: 0,
            bytes_in: 0,
            bytes_out: 0,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Stats — thread-safe aggregator
// ---------------------------------------------------------------------------

struct StatsInner {
    total_requests: u64,
    success_count: u64,
    error_count: u64,
    bytes_in: u64,
    bytes_out: u64,
    histogram: Histogram<u64>,
}

/// Thread-safe sink for [`AttackResult`]s.
///
/// Designed to be held behind an `Arc`: workers call [`Stats::add`], the
/// presenter calls [`Stats::snapshot`]. The interior mutex is held only for
/// the duration of the counter updates or the histogram clone, never across
/// an await point and never while rendering.
pub struct Stats {
    inner: Mutex<StatsInner>,
}

impl Stats {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                total_requests: 0,
                success_count: 0,
                error_count: 0,
                bytes_in: 0,
                bytes_out: 0,
                histogram: new_latency_histogram(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StatsInner> {
        // A writer that panicked mid-add must not wedge the whole run.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one completed request. Counter updates and the histogram
    /// record happen atomically with respect to [`Stats::snapshot`].
    pub fn add(&self, result: &AttackResult) {
        let mut inner = self.lock();

        inner.total_requests += 1;
        if result.is_success() {
            inner.success_count += 1;
        } else {
            inner.error_count += 1;
        }

        inner.bytes_in += result.bytes_in;
        inner.bytes_out += result.bytes_out;

        let micros = result.latency.as_micros() as u64;
        if micros > 0 {
            inner.histogram.saturating_record(micros);
        }
    }

    /// Produce an independent copy of all counters and the latency
    /// distribution. A snapshot either contains a concurrent `add` in its
    /// entirety or not at all.
    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.lock();
        StatsSnapshot {
            total_requests: inner.total_requests,
            success_count: inner.success_count,
            error_count: inner.error_count,
            bytes_in: inner.bytes_in,
            bytes_out: inner.bytes_out,
            histogram: inner.histogram.clone(),
        }
    }
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StatsSnapshot — independent read-side copy
// ---------------------------------------------------------------------------

/// A point-in-time copy of [`Stats`], safe to query without holding any lock.
#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    histogram: Histogram<u64>,
}

impl StatsSnapshot {
    /// Latency at quantile `q`, where `q` is a fraction in `[0.0, 1.0]`
    /// (e.g. 0.99 for P99). Returns zero when nothing has been recorded.
    pub fn quantile(&self, q: f64) -> Duration {
        Duration::from_micros(self.histogram.value_at_quantile(q))
    }

    /// Mean recorded latency; zero when nothing has been recorded.
    pub fn mean(&self) -> Duration {
        Duration::from_micros(self.histogram.mean() as u64)
    }

    /// Maximum recorded latency; zero when nothing has been recorded.
    pub fn max(&self) -> Duration {
        Duration::from_micros(self.histogram.max())
    }

    /// Minimum recorded latency; zero when nothing has been recorded.
    pub fn min(&self) -> Duration {
        if self.histogram.len() == 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(self.histogram.min())
        }
    }

    /// Number of latency samples in the distribution. Equals the number of
    /// results recorded with a strictly positive latency.
    pub fn latency_count(&self) -> u64 {
        self.histogram.len()
    }

    /// Fraction of successful requests in `[0.0, 1.0]`; 0.0 when no
    /// requests completed.
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
