//! Dispatch metrics for observability

use std::sync::atomic::{AtomicU64, Ordering};

use contracts::Intent;

/// Counters for the dispatch loop
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    writes: AtomicU64,
    replays: AtomicU64,
    creates: AtomicU64,
    /// Events dropped by routing (unknown database / intent, malformed range)
    dropped: AtomicU64,
    /// Handlers that returned a collaborator error
    failures: AtomicU64,
    panics: AtomicU64,
    /// Ingest queue depth seen after the last receive
    queue_depth: AtomicU64,
    peak_queue_depth: AtomicU64,
}

impl DispatchMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an event handled without error
    pub fn inc_dispatched(&self, intent: Intent) {
        let counter = match intent {
            Intent::Write => &self.writes,
            Intent::Replay => &self.replays,
            Intent::Create => &self.creates,
            Intent::Newest | Intent::Invalid => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Events of `intent` handled without error
    pub fn dispatched(&self, intent: Intent) -> u64 {
        match intent {
            Intent::Write => self.writes.load(Ordering::Relaxed),
            Intent::Replay => self.replays.load(Ordering::Relaxed),
            Intent::Create => self.creates.load(Ordering::Relaxed),
            Intent::Newest | Intent::Invalid => 0,
        }
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_failures(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_panics(&self) {
        self.panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the ingest queue depth left after taking an event
    pub fn set_queue_depth(&self, depth: usize) {
        let depth = depth as u64;
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.peak_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Deepest backlog observed by the consumer
    pub fn peak_queue_depth(&self) -> u64 {
        self.peak_queue_depth.load(Ordering::Relaxed)
    }

    /// Get snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            replays: self.replays.load(Ordering::Relaxed),
            creates: self.creates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            panics: self.panics.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch metrics (for reporting)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub writes: u64,
    pub replays: u64,
    pub creates: u64,
    pub dropped: u64,
    pub failures: u64,
    pub panics: u64,
}

impl MetricsSnapshot {
    /// Every event the loop has consumed
    pub fn total(&self) -> u64 {
        self.writes + self.replays + self.creates + self.dropped + self.failures + self.panics
    }
}
