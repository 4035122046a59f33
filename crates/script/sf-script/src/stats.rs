//! Call statistics for an engine context.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Cache line size on most modern CPUs (64 bytes).
const CACHE_LINE_SIZE: usize = 64;

/// A cache-line-padded atomic counter.
///
/// Counters are bumped from every calling thread; padding keeps each on its
/// own cache line.
#[repr(C, align(64))]
#[derive(Debug)]
struct PaddedAtomicU64 {
    value: AtomicU64,
    _padding: [u8; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
}

impl Default for PaddedAtomicU64 {
    fn default() -> Self {
        Self {
            value: AtomicU64::new(0),
            _padding: [0; CACHE_LINE_SIZE - std::mem::size_of::<AtomicU64>()],
        }
    }
}

impl PaddedAtomicU64 {
    #[inline]
    fn load(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    #[inline]
    fn add(&self, val: u64) {
        self.value.fetch_add(val, Ordering::Relaxed);
    }
}

/// Counters shared by all callers of one engine context.
#[derive(Debug, Default)]
pub struct EngineStats {
    calls: PaddedAtomicU64,
    failures: PaddedAtomicU64,
    timeouts: PaddedAtomicU64,
    rows_emitted: PaddedAtomicU64,
    instances_recycled: PaddedAtomicU64,
    reloads: PaddedAtomicU64,
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_success(&self, rows_emitted: usize) {
        self.calls.add(1);
        self.rows_emitted.add(rows_emitted as u64);
    }

    pub(crate) fn record_failure(&self) {
        self.calls.add(1);
        self.failures.add(1);
    }

    pub(crate) fn record_timeout(&self) {
        self.calls.add(1);
        self.timeouts.add(1);
    }

    pub(crate) fn record_recycle(&self) {
        self.instances_recycled.add(1);
    }

    pub(crate) fn record_reload(&self) {
        self.reloads.add(1);
    }

    /// Create a snapshot of the current statistics.
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            calls: self.calls.load(),
            failures: self.failures.load(),
            timeouts: self.timeouts.load(),
            rows_emitted: self.rows_emitted.load(),
            instances_recycled: self.instances_recycled.load(),
            reloads: self.reloads.load(),
        }
    }
}

/// A serializable snapshot of engine statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    /// Calls that reached an interpreter, whatever their outcome
    pub calls: u64,
    /// Calls that ended in a script error
    pub failures: u64,
    pub timeouts: u64,
    /// Rows produced by row mappers
    pub rows_emitted: u64,
    pub instances_recycled: u64,
    pub reloads: u64,
}

impl EngineStatsSnapshot {
    /// Calls that completed successfully.
    pub fn succeeded(&self) -> u64 {
        self.calls - self.failures - self.timeouts
    }
}
