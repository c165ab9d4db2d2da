//! Broker - wires transport, ingest queue, dispatcher and newest publisher

use std::sync::Arc;
use std::time::Duration;

use contracts::{BrokerConfig, DatabaseRegistry, Transport};
use dispatcher::{DispatchMetrics, Dispatcher};
use ingestion::{subscribe_callback, IngestQueue, IngestionMetrics};
use publisher::{NewestPublisher, Publisher};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{BrokerError, Result};

/// Running broker instance
pub struct Broker<R, T> {
    registry: Arc<R>,
    transport: Arc<T>,
    publisher: Publisher<T>,
    queue: IngestQueue,
    listen_filter: String,
    quiesce: Duration,
    shutdown: CancellationToken,
    dispatcher_task: Option<JoinHandle<()>>,
    newest_task: Option<JoinHandle<()>>,
    dispatch_metrics: Arc<DispatchMetrics>,
    closed: bool,
}

impl<R, T> Broker<R, T>
where
    R: DatabaseRegistry + 'static,
    T: Transport + Send + Sync + 'static,
{
    /// Validate the config, connect and start serving
    ///
    /// The subscription is made last, so no inbound message can arrive
    /// before the dispatcher is running.
    ///
    /// # Errors
    /// - `Config` if validation fails
    /// - `Connect` if the transport cannot connect
    /// - `Subscribe` if the inbound subscription is refused; everything
    ///   already started is shut down again before returning
    #[instrument(
        name = "broker_start",
        skip(config, registry, transport),
        fields(addr = %config.transport.addr, node = %config.node_id())
    )]
    pub async fn start(config: BrokerConfig, registry: Arc<R>, transport: Arc<T>) -> Result<Self> {
        config_loader::ConfigLoader::validate(&config).map_err(BrokerError::Config)?;

        info!(addr = %config.transport.addr, "Connecting to transport...");
        transport
            .connect()
            .await
            .map_err(|source| BrokerError::Connect {
                addr: config.transport.addr.clone(),
                source,
            })?;

        let mut queue = IngestQueue::new();
        let input_rx = queue.take_receiver().ok_or_else(|| BrokerError::Startup {
            message: "ingest queue receiver already taken".into(),
        })?;

        let publisher = Publisher::from_config(Arc::clone(&transport), &config);
        let dispatcher = Dispatcher::new(Arc::clone(&registry), publisher.clone(), input_rx);
        let dispatch_metrics = dispatcher.metrics();
        let dispatcher_task = dispatcher.spawn();

        let shutdown = CancellationToken::new();
        let newest_task = NewestPublisher::new(
            Arc::clone(&registry),
            publisher.clone(),
            config.publish.halt_on_error,
        )
        .spawn(config.publish.period(), shutdown.clone());

        let mut broker = Self {
            registry,
            transport,
            publisher,
            queue,
            listen_filter: config.topics.listen_filter(),
            quiesce: config.shutdown.quiesce(),
            shutdown,
            dispatcher_task: Some(dispatcher_task),
            newest_task: Some(newest_task),
            dispatch_metrics,
            closed: false,
        };

        let callback = subscribe_callback(broker.queue.sender(), config.topics.listen_root());
        if let Err(source) = broker
            .transport
            .subscribe(&broker.listen_filter, config.publish.qos, callback)
            .await
        {
            let filter = broker.listen_filter.clone();
            error!(filter = %filter, error = %source, "Subscribe failed, shutting down");
            broker.close().await;
            return Err(BrokerError::Subscribe { filter, source });
        }

        info!(
            listen = %broker.listen_filter,
            publish_root = %broker.publisher.root(),
            period_ms = config.publish.period_ms,
            "Broker started"
        );
        Ok(broker)
    }

    /// Shut the broker down
    ///
    /// Order: stop the newest loop, unsubscribe, close the queue and wait for
    /// the dispatcher to drain it, then disconnect. Later calls do nothing.
    #[instrument(name = "broker_close", skip(self))]
    pub async fn close(&mut self) {
        if self.closed {
            debug!("Broker already closed");
            return;
        }
        self.closed = true;
        info!("Broker shutting down...");

        self.shutdown.cancel();

        if let Err(e) = self.transport.unsubscribe(&self.listen_filter).await {
            warn!(filter = %self.listen_filter, error = %e, "Unsubscribe failed");
        }

        self.queue.close();

        if let Some(task) = self.newest_task.take() {
            if let Err(e) = task.await {
                error!(error = ?e, "Newest publisher task panicked");
            }
        }
        if let Some(task) = self.dispatcher_task.take() {
            if let Err(e) = task.await {
                error!(error = ?e, "Dispatcher task panicked");
            }
        }

        self.transport.disconnect(self.quiesce).await;

        info!(
            dispatch = ?self.dispatch_metrics.snapshot(),
            ingestion = ?self.queue.metrics().snapshot(),
            "Broker shutdown complete"
        );
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn registry(&self) -> &Arc<R> {
        &self.registry
    }

    /// Outbound publisher shared with the dispatcher and newest loop
    pub fn publisher(&self) -> &Publisher<T> {
        &self.publisher
    }

    pub fn dispatch_metrics(&self) -> Arc<DispatchMetrics> {
        Arc::clone(&self.dispatch_metrics)
    }

    pub fn ingestion_metrics(&self) -> Arc<IngestionMetrics> {
        self.queue.metrics()
    }

    /// Events waiting to be dispatched
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}

impl<R, T> Drop for Broker<R, T> {
    fn drop(&mut self) {
        // Dropped without close: stop background work, skip the async steps
        if !self.closed {
            self.shutdown.cancel();
            self.queue.close();
        }
    }
}
