//! Ingest queue
//!
//! Unbounded FIFO shared by every transport callback and drained by a single
//! consumer. Closing the queue lets the consumer drain what is left and stop.

use std::sync::Arc;

use async_channel::{unbounded, Receiver, Sender};
use contracts::SubscribeEvent;
use tracing::{debug, trace};

use crate::error::{IngestionError, Result};
use crate::metrics::IngestionMetrics;

/// Ingest queue
pub struct IngestQueue {
    tx: Sender<SubscribeEvent>,
    rx: Option<Receiver<SubscribeEvent>>,
    metrics: Arc<IngestionMetrics>,
}

impl IngestQueue {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self {
            tx,
            rx: Some(rx),
            metrics: Arc::new(IngestionMetrics::new()),
        }
    }

    /// Producer handle, cheap to clone into callbacks
    pub fn sender(&self) -> IngestSender {
        IngestSender {
            tx: self.tx.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Get the consumer side
    ///
    /// Note: Can only be called once, subsequent calls return None
    pub fn take_receiver(&mut self) -> Option<Receiver<SubscribeEvent>> {
        self.rx.take()
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Events waiting to be dispatched
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }

    /// Close the queue
    ///
    /// Returns true only for the call that actually closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        let closed = self.tx.close();
        if closed {
            debug!(pending = self.tx.len(), "ingest queue closed");
        }
        closed
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl Default for IngestQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer side of the ingest queue
#[derive(Clone)]
pub struct IngestSender {
    tx: Sender<SubscribeEvent>,
    pub(crate) metrics: Arc<IngestionMetrics>,
}

impl IngestSender {
    /// Push an event; never blocks
    ///
    /// # Errors
    /// `IngestionError::QueueClosed` once the queue has been closed
    pub fn push(&self, event: SubscribeEvent) -> Result<()> {
        if self.tx.try_send(event).is_err() {
            self.metrics.record_rejected_closed();
            return Err(IngestionError::QueueClosed);
        }

        self.metrics.record_enqueued();
        let depth = self.tx.len();
        observability::record_ingest_queue_len(depth);
        trace!(depth, "event enqueued");
        Ok(())
    }
}
