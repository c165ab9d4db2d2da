//! 周期性发布各数据库最新区块
//!
//! 每个 tick 对注册表做一次快照，逐个数据库拉取最新区块并以 `newest`
//! 意图发布其中每一笔交易。单个数据库内部遇错即停；不同数据库之间互不影响，
//! 除非配置了 `halt_on_error`。

use std::sync::Arc;
use std::time::{Duration, Instant};

use contracts::{
    BrokerPayload, ChainDatabase, DatabaseId, DatabaseRegistry, Intent, Transport, LATEST_BLOCK,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::TickError;
use crate::publisher::Publisher;

/// Outcome for one database within a tick
#[derive(Debug)]
pub struct DatabaseTick {
    pub database_id: DatabaseId,
    /// Number of transactions published
    pub outcome: Result<usize, TickError>,
}

/// Per-database report of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub entries: Vec<DatabaseTick>,
    /// Tick stopped early because of `halt_on_error`
    pub halted: bool,
}

impl TickReport {
    /// Total transactions published in this tick
    pub fn published(&self) -> usize {
        self.entries
            .iter()
            .filter_map(|entry| entry.outcome.as_ref().ok())
            .sum()
    }

    pub fn failures(&self) -> usize {
        self.entries.iter().filter(|e| e.outcome.is_err()).count()
    }

    /// Lookup by database
    pub fn get(&self, database_id: &str) -> Option<&DatabaseTick> {
        self.entries.iter().find(|e| e.database_id == database_id)
    }
}

/// Newest-block publisher
pub struct NewestPublisher<R, T> {
    registry: Arc<R>,
    publisher: Publisher<T>,
    halt_on_error: bool,
}

impl<R, T> NewestPublisher<R, T>
where
    R: DatabaseRegistry + 'static,
    T: Transport + Send + Sync + 'static,
{
    pub fn new(registry: Arc<R>, publisher: Publisher<T>, halt_on_error: bool) -> Self {
        Self {
            registry,
            publisher,
            halt_on_error,
        }
    }

    /// Run one tick over every registered database
    #[instrument(name = "newest_tick", skip(self))]
    pub async fn tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        for (database_id, database) in self.registry.snapshot() {
            let outcome = self.publish_database(&database_id, &database).await;

            if let Err(e) = &outcome {
                warn!(database_id = %database_id, error = %e, "newest publish failed");
            }
            let failed = outcome.is_err();
            report.entries.push(DatabaseTick {
                database_id,
                outcome,
            });

            if failed && self.halt_on_error {
                report.halted = true;
                break;
            }
        }

        observability::record_tick(
            report.entries.len(),
            report.failures(),
            started.elapsed().as_secs_f64() * 1000.0,
        );
        debug!(
            databases = report.entries.len(),
            published = report.published(),
            failures = report.failures(),
            "newest tick complete"
        );
        report
    }

    /// Publish every transaction of the most recent block of one database
    async fn publish_database(
        &self,
        database_id: &DatabaseId,
        database: &R::Database,
    ) -> Result<usize, TickError> {
        let fetched = database
            .fetch_block_at(LATEST_BLOCK)
            .await
            .map_err(TickError::ChainRead)?;

        let mut published = 0;
        for (index, tx) in fetched.block.transactions.iter().enumerate() {
            let payload = BrokerPayload::from_transaction(fetched.count, index, tx);
            self.publisher
                .publish(Intent::Newest, database_id, &payload, None)
                .await
                .map_err(|source| TickError::Publish { published, source })?;
            published += 1;
        }
        Ok(published)
    }

    /// Tick every `period` until `shutdown` is cancelled
    ///
    /// The first tick happens after one full period. Cancellation is observed
    /// between ticks; an in-flight tick runs to completion.
    pub async fn run(self, period: Duration, shutdown: CancellationToken) {
        info!(period_ms = period.as_millis() as u64, "Newest publisher started");
        let mut ticks: u64 = 0;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(period) => {
                    self.tick().await;
                    ticks += 1;
                }
            }
        }

        info!(ticks, "Newest publisher stopped");
    }

    /// Spawn `run` as a tokio task
    pub fn spawn(self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(period, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{NodeId, QoS};
    use mock_backend::{
        synthetic_block, MemoryDatabase, MemoryDatabaseConfig, MemoryRegistry, MockTransport,
        MockTransportConfig,
    };

    struct Fixture {
        registry: Arc<MemoryRegistry>,
        transport: Arc<MockTransport>,
    }

    impl Fixture {
        async fn new() -> Self {
            let transport = Arc::new(MockTransport::new());
            transport.connect().await.unwrap();
            Self {
                registry: Arc::new(MemoryRegistry::new()),
                transport,
            }
        }

        fn add_database(&self, name: &str, block_sizes: &[usize]) -> Arc<MemoryDatabase> {
            let id: DatabaseId = name.into();
            let client: NodeId = "c1".into();
            let mut seq = 0;
            let blocks = block_sizes
                .iter()
                .map(|&len| {
                    let block = synthetic_block(&id, &client, seq, len);
                    seq += len as u64;
                    block
                })
                .collect();
            self.registry.insert(MemoryDatabase::with_blocks(id, blocks))
        }

        fn newest(&self, halt_on_error: bool) -> NewestPublisher<MemoryRegistry, MockTransport> {
            let publisher = Publisher::new(
                Arc::clone(&self.transport),
                "/cql/miner/N",
                QoS::AtLeastOnce,
                true,
            );
            NewestPublisher::new(Arc::clone(&self.registry), publisher, halt_on_error)
        }
    }

    #[tokio::test]
    async fn test_tick_publishes_latest_block_only() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[3, 2]);

        let report = fixture.newest(false).tick().await;
        assert_eq!(report.published(), 2);
        assert!(!report.halted);

        let published = fixture.transport.published_to("/db1/newest");
        assert_eq!(published.len(), 2);
        for (index, message) in published.iter().enumerate() {
            let payload = message.decode_payload().unwrap();
            assert_eq!(payload.block_id, 1);
            assert_eq!(payload.block_index, index as i64);
            assert_eq!(payload.client_sequence, 3 + index as u64);
            assert_eq!(payload.client_id, "c1");
        }
    }

    #[tokio::test]
    async fn test_failed_database_does_not_stop_others() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[2]);
        let broken = fixture.add_database("db2", &[2]);
        fixture.add_database("db3", &[1]);
        broken.set_config(MemoryDatabaseConfig {
            fail_fetch: true,
            ..Default::default()
        });

        let report = fixture.newest(false).tick().await;
        assert_eq!(report.entries.len(), 3);
        assert_eq!(report.failures(), 1);
        assert!(matches!(
            report.get("db2").unwrap().outcome,
            Err(TickError::ChainRead(_))
        ));
        assert_eq!(fixture.transport.published_to("/db1/newest").len(), 2);
        assert_eq!(fixture.transport.published_to("/db3/newest").len(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_fail_fast_within_database() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[3]);
        fixture.add_database("db2", &[1]);
        fixture.transport.set_config(MockTransportConfig {
            fail_publish_matching: vec!["/db1/".into()],
            ..Default::default()
        });

        let report = fixture.newest(false).tick().await;
        match &report.get("db1").unwrap().outcome {
            Err(TickError::Publish { published, .. }) => assert_eq!(*published, 0),
            other => panic!("unexpected outcome {other:?}"),
        }
        // One attempt for db1, then db2 proceeds
        assert_eq!(fixture.transport.publish_attempts(), 2);
        assert_eq!(fixture.transport.published_to("/db2/newest").len(), 1);
    }

    #[tokio::test]
    async fn test_halt_on_error_stops_tick() {
        let fixture = Fixture::new().await;
        let broken = fixture.add_database("db1", &[1]);
        fixture.add_database("db2", &[1]);
        broken.set_config(MemoryDatabaseConfig {
            fail_fetch: true,
            ..Default::default()
        });

        let report = fixture.newest(true).tick().await;
        assert!(report.halted);
        assert_eq!(report.entries.len(), 1);
        assert!(fixture.transport.published().is_empty());
    }

    #[tokio::test]
    async fn test_empty_chain_is_reported_as_failure() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[]);

        let report = fixture.newest(false).tick().await;
        assert_eq!(report.failures(), 1);
        assert_eq!(fixture.transport.publish_attempts(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[1]);

        let shutdown = CancellationToken::new();
        let handle = fixture
            .newest(false)
            .spawn(Duration::from_millis(10), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(60)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("newest loop did not stop")
            .unwrap();

        let ticks = fixture.transport.published().len();
        assert!(ticks >= 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(fixture.transport.published().len(), ticks);
    }

    #[tokio::test]
    async fn test_cancel_before_first_period_publishes_nothing() {
        let fixture = Fixture::new().await;
        fixture.add_database("db1", &[1]);

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        fixture
            .newest(false)
            .run(Duration::from_secs(60), shutdown)
            .await;

        assert!(fixture.transport.published().is_empty());
    }
}
