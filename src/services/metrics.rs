//! Request latency and outcome accounting.
//!
//! Keeps a bounded ring buffer of recent samples for percentile queries
//! plus cumulative request/error counters. All access goes through one
//! short, synchronous critical section so `record` and `reset` never
//! interleave.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::domain::errors::ErrorKind;

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error(ErrorKind),
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

#[derive(Debug, Clone)]
struct Sample {
    timestamp: DateTime<Utc>,
    duration_ms: f64,
    outcome: Outcome,
}

#[derive(Debug)]
struct MetricsWindow {
    samples: VecDeque<Sample>,
    capacity: usize,
    request_count: u64,
    error_count: u64,
    errors_by_type: BTreeMap<ErrorKind, u64>,
}

impl MetricsWindow {
    fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            request_count: 0,
            error_count: 0,
            errors_by_type: BTreeMap::new(),
        }
    }

    fn push(&mut self, sample: Sample) {
        self.request_count += 1;
        if let Outcome::Error(kind) = sample.outcome {
            self.error_count += 1;
            *self.errors_by_type.entry(kind).or_insert(0) += 1;
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }
}

/// Point-in-time view of the collected metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub request_count: u64,
    pub error_count: u64,
    pub error_rate: f64,
    pub avg_ms: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub errors_by_type: BTreeMap<ErrorKind, u64>,
    /// Configured ring buffer capacity.
    pub window_size: usize,
    /// Samples currently retained.
    pub samples: usize,
    /// Timestamp of the oldest retained sample.
    pub window_start: Option<DateTime<Utc>>,
}

/// Thread-safe metrics aggregator.
#[derive(Debug)]
pub struct MetricsCollector {
    window: Mutex<MetricsWindow>,
}

impl MetricsCollector {
    /// Create a collector retaining at most `window_size` samples.
    pub fn new(window_size: usize) -> Self {
        Self {
            window: Mutex::new(MetricsWindow::new(window_size.max(1))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MetricsWindow> {
        // push() has no partial states worth refusing to read.
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a sample, evicting the oldest when the window is full.
    pub fn record(&self, duration: Duration, outcome: Outcome) {
        let sample = Sample {
            timestamp: Utc::now(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            outcome,
        };
        self.lock().push(sample);
    }

    /// Compute counters and latency statistics over the current window.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (mut latencies, request_count, error_count, errors_by_type, window_size, window_start) = {
            let window = self.lock();
            (
                window.samples.iter().map(|s| s.duration_ms).collect::<Vec<_>>(),
                window.request_count,
                window.error_count,
                window.errors_by_type.clone(),
                window.capacity,
                window.samples.front().map(|s| s.timestamp),
            )
        };

        latencies.sort_by(f64::total_cmp);

        let avg_ms = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };

        let error_rate = if request_count == 0 {
            0.0
        } else {
            error_count as f64 / request_count as f64
        };

        MetricsSnapshot {
            request_count,
            error_count,
            error_rate,
            avg_ms,
            p50: percentile(&latencies, 50.0),
            p95: percentile(&latencies, 95.0),
            p99: percentile(&latencies, 99.0),
            errors_by_type,
            window_size,
            samples: latencies.len(),
            window_start,
        }
    }

    /// Clear counters and the sample window.
    pub fn reset(&self) {
        let mut window = self.lock();
        let capacity = window.capacity;
        *window = MetricsWindow::new(capacity);
    }
}

/// Nearest-rank percentile over an ascending slice.
///
/// Always returns a retained sample, so results are monotonic in `p`.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }

    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
