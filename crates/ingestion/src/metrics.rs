//! Ingestion metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Ingestion metrics
#[derive(Debug, Default)]
pub struct IngestionMetrics {
    /// Total messages delivered by the transport
    pub messages_received: AtomicU64,

    /// Messages dropped because the topic did not decode
    pub invalid_topics: AtomicU64,

    /// Messages dropped because the payload did not decode
    pub invalid_payloads: AtomicU64,

    /// Events pushed into the queue
    pub events_enqueued: AtomicU64,

    /// Events rejected because the queue was closed
    pub rejected_closed: AtomicU64,
}

impl IngestionMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_topic(&self) {
        self.invalid_topics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_payload(&self) {
        self.invalid_payloads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_enqueued(&self) {
        self.events_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_closed(&self) {
        self.rejected_closed.fetch_add(1, Ordering::Relaxed);
    }

    /// Get snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages_received: self.messages_received.load(Ordering::Relaxed),
            invalid_topics: self.invalid_topics.load(Ordering::Relaxed),
            invalid_payloads: self.invalid_payloads.load(Ordering::Relaxed),
            events_enqueued: self.events_enqueued.load(Ordering::Relaxed),
            rejected_closed: self.rejected_closed.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub messages_received: u64,
    pub invalid_topics: u64,
    pub invalid_payloads: u64,
    pub events_enqueued: u64,
    pub rejected_closed: u64,
}
