//! Statistics for pipeline runs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Row counters for one pipeline run, updated from every worker thread.
#[derive(Debug)]
pub struct PipelineStats {
    started_at: DateTime<Utc>,
    rows_read: AtomicU64,
    rows_written: AtomicU64,
    rows_failed: AtomicU64,
    rows_passed_through: AtomicU64,
}

impl Default for PipelineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStats {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            rows_read: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            rows_passed_through: AtomicU64::new(0),
        }
    }

    pub fn record_read(&self) {
        self.rows_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_written(&self, count: u64) {
        self.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.rows_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passed_through(&self) {
        self.rows_passed_through.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    /// Create a snapshot of the current statistics.
    pub fn snapshot(&self) -> PipelineStatsSnapshot {
        PipelineStatsSnapshot {
            started_at: self.started_at,
            completed_at: Utc::now(),
            rows_read: self.rows_read(),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            rows_passed_through: self.rows_passed_through.load(Ordering::Relaxed),
        }
    }
}

/// A serializable snapshot of pipeline statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStatsSnapshot {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub rows_read: u64,
    pub rows_written: u64,
    /// Input rows (or unreadable records) that failed
    pub rows_failed: u64,
    /// Failed rows written unchanged under the passthrough policy
    pub rows_passed_through: u64,
}

impl PipelineStatsSnapshot {
    /// Wall time of the run.
    pub fn duration(&self) -> Duration {
        self.completed_at - self.started_at
    }

    /// Input rows per second.
    pub fn rows_per_second(&self) -> f64 {
        let secs = self.duration().num_milliseconds() as f64 / 1000.0;
        if secs > 0.0 {
            self.rows_read as f64 / secs
        } else {
            0.0
        }
    }

    /// Returns true if any row failed.
    pub fn has_failures(&self) -> bool {
        self.rows_failed > 0
    }
}
