//! Dispatcher - single consumer of the ingest queue

use std::sync::Arc;

use async_channel::Receiver;
use contracts::{DatabaseRegistry, Intent, SubscribeEvent, Transport};
use publisher::Publisher;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::error::DispatcherError;
use crate::handlers::{handle_replay, handle_write};
use crate::metrics::DispatchMetrics;

/// Shared state cloned into every handler task
struct HandlerContext<R, T> {
    registry: Arc<R>,
    publisher: Publisher<T>,
}

impl<R, T> Clone for HandlerContext<R, T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            publisher: self.publisher.clone(),
        }
    }
}

impl<R, T> HandlerContext<R, T>
where
    R: DatabaseRegistry + 'static,
    T: Transport + Send + Sync + 'static,
{
    async fn handle(&self, event: SubscribeEvent) -> Result<(), DispatcherError> {
        match event.intent {
            Intent::Write => handle_write(self.registry.as_ref(), event).await.map(|_| ()),
            Intent::Replay => handle_replay(self.registry.as_ref(), &self.publisher, &event)
                .await
                .map(|_| ()),
            Intent::Create => {
                warn!(client_id = %event.client_id, "create intent is not supported, ignored");
                Ok(())
            }
            intent @ (Intent::Newest | Intent::Invalid) => {
                Err(DispatcherError::UnknownIntent { intent })
            }
        }
    }
}

/// Drains the ingest queue in FIFO order and routes each event by intent
///
/// Each event runs in its own task which is awaited before the next event is
/// taken, so ordering is strict and a failing or panicking handler only
/// loses its own event.
pub struct Dispatcher<R, T> {
    context: HandlerContext<R, T>,
    input_rx: Receiver<SubscribeEvent>,
    metrics: Arc<DispatchMetrics>,
}

impl<R, T> Dispatcher<R, T>
where
    R: DatabaseRegistry + 'static,
    T: Transport + Send + Sync + 'static,
{
    pub fn new(registry: Arc<R>, publisher: Publisher<T>, input_rx: Receiver<SubscribeEvent>) -> Self {
        Self {
            context: HandlerContext {
                registry,
                publisher,
            },
            input_rx,
            metrics: Arc::new(DispatchMetrics::new()),
        }
    }

    /// Get metrics reference
    pub fn metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Run the dispatcher main loop
    ///
    /// Returns once the queue is closed and drained.
    #[instrument(name = "dispatcher_run", skip(self))]
    pub async fn run(self) {
        info!("Dispatcher started");

        let mut event_count: u64 = 0;

        while let Ok(event) = self.input_rx.recv().await {
            event_count += 1;
            let depth = self.input_rx.len();
            self.metrics.set_queue_depth(depth);
            observability::record_ingest_queue_len(depth);
            self.dispatch(event).await;

            if event_count.is_multiple_of(100) {
                debug!(events = event_count, "Dispatcher progress");
            }
        }

        info!(
            events = event_count,
            metrics = ?self.metrics.snapshot(),
            "Dispatcher input closed, shutting down"
        );
    }

    /// Spawn the dispatcher as a background task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn dispatch(&self, event: SubscribeEvent) {
        let intent = event.intent;
        let client_id = event.client_id.clone();
        let database_id = event.database_id.clone();

        let context = self.context.clone();
        let task = tokio::spawn(async move { context.handle(event).await });

        match task.await {
            Ok(Ok(())) => self.metrics.inc_dispatched(intent),
            Ok(Err(e)) => {
                match e.drop_reason() {
                    Some(reason) => {
                        self.metrics.inc_dropped();
                        observability::record_event_dropped(reason);
                    }
                    None => self.metrics.inc_failures(),
                }
                error!(
                    client_id = %client_id,
                    database_id = %database_id,
                    intent = %intent,
                    error = %e,
                    "event dropped"
                );
            }
            Err(e) => {
                self.metrics.inc_panics();
                observability::record_handler_panic(intent.as_str());
                error!(
                    client_id = %client_id,
                    database_id = %database_id,
                    intent = %intent,
                    error = ?e,
                    "Handler task panicked"
                );
            }
        }
    }
}
