//! Simulated clients and chain activity around a running broker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use config_loader::{ConfigFormat, ConfigLoader};
use contracts::{
    ArgValue, BrokerConfig, BrokerPayload, DatabaseId, DatabaseRegistry, InboundMessage,
    MessageCallback, QoS, Statement, Transport,
};
use mock_backend::{MemoryDatabase, MemoryRegistry, MockTransport};
use mqtt_transport::{MqttSettings, MqttTransport};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Configuration used when no file is given
pub fn default_config(user: &str) -> Result<BrokerConfig> {
    let content = format!(
        r#"
[transport]
addr = "tcp://127.0.0.1:1883"
user = "{user}"
"#
    );
    ConfigLoader::load_from_str(&content, ConfigFormat::Toml)
        .context("Built-in configuration rejected")
}

/// Broker output observed on the MQTT link
#[derive(Debug, Default)]
pub struct SeenCounts {
    newest: AtomicUsize,
    replay: AtomicUsize,
}

/// How simulated clients reach the broker
#[derive(Clone)]
pub enum ClientLink {
    /// The broker's own in-memory transport
    Mock(Arc<MockTransport>),
    /// A second MQTT connection to the same server
    Mqtt {
        transport: Arc<MqttTransport>,
        seen: Arc<SeenCounts>,
    },
}

impl ClientLink {
    /// Connect as `<client id>-sim` and watch everything this node publishes
    pub async fn mqtt(config: &BrokerConfig) -> Result<Self> {
        let mut settings = MqttSettings::from_config(&config.transport)?;
        settings.client_id = format!("{}-sim", config.transport.effective_client_id());
        let transport = Arc::new(MqttTransport::new(settings));
        transport
            .connect()
            .await
            .context("Simulated clients failed to connect")?;

        let seen = Arc::new(SeenCounts::default());
        let counts = Arc::clone(&seen);
        let callback: MessageCallback = Arc::new(move |message: InboundMessage| {
            if message.topic.ends_with("/newest") {
                counts.newest.fetch_add(1, Ordering::Relaxed);
            } else if message.topic.contains("/replay/") {
                counts.replay.fetch_add(1, Ordering::Relaxed);
            }
        });
        let filter = format!("{}/#", config.topics.publish_root(&config.node_id()));
        transport
            .subscribe(&filter, QoS::AtLeastOnce, callback)
            .await
            .with_context(|| format!("Failed to watch {filter}"))?;

        Ok(Self::Mqtt { transport, seen })
    }

    /// Send one client request, returning how many subscribers it reached when known
    pub async fn send(&self, topic: &str, body: Vec<u8>) -> Result<usize> {
        match self {
            Self::Mock(transport) => Ok(transport.deliver(topic, body)),
            Self::Mqtt { transport, .. } => {
                transport
                    .publish(topic, QoS::AtLeastOnce, false, Bytes::from(body))
                    .await?;
                Ok(1)
            }
        }
    }

    /// Count broker publishes by topic kind
    pub fn publish_summary(&self) -> PublishSummary {
        match self {
            Self::Mock(transport) => {
                let published = transport.published();
                PublishSummary {
                    newest: published.iter().filter(|m| m.topic.ends_with("/newest")).count(),
                    replay: published.iter().filter(|m| m.topic.contains("/replay/")).count(),
                    attempts: transport.publish_attempts(),
                }
            }
            Self::Mqtt { seen, .. } => {
                let newest = seen.newest.load(Ordering::Relaxed);
                let replay = seen.replay.load(Ordering::Relaxed);
                PublishSummary {
                    newest,
                    replay,
                    attempts: newest + replay,
                }
            }
        }
    }

    pub async fn close(&self, quiesce: Duration) {
        if let Self::Mqtt { transport, .. } = self {
            transport.disconnect(quiesce).await;
        }
    }
}

/// In-memory chain shared by the broker and the simulated clients
pub struct Simulation {
    pub registry: Arc<MemoryRegistry>,
    pub client: ClientLink,
    pub databases: Vec<DatabaseId>,
    listen_root: String,
}

impl Simulation {
    pub fn new(database_count: usize, listen_root: String, client: ClientLink) -> Self {
        let registry = Arc::new(MemoryRegistry::new());
        let databases = (0..database_count)
            .map(|n| {
                let id = DatabaseId::from(format!("db{n}"));
                registry.insert(MemoryDatabase::new(id.clone()));
                id
            })
            .collect();

        Self {
            registry,
            client,
            databases,
            listen_root,
        }
    }

    /// One task per client, writing round-robin across databases
    ///
    /// Each task returns the number of writes it delivered.
    pub fn spawn_writers(
        &self,
        clients: usize,
        writes_per_sec: u32,
        shutdown: CancellationToken,
    ) -> Vec<JoinHandle<Result<u64>>> {
        let period = Duration::from_secs(1) / writes_per_sec.max(1);

        (0..clients)
            .map(|n| {
                let link = self.client.clone();
                let databases = self.databases.clone();
                let root = self.listen_root.clone();
                let shutdown = shutdown.clone();

                tokio::spawn(async move {
                    let client = format!("client{n}");
                    if databases.is_empty() {
                        return anyhow::Ok(0);
                    }
                    let mut ticker = tokio::time::interval(period);
                    let mut seq: u64 = 0;

                    loop {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = ticker.tick() => {
                                let database = &databases[seq as usize % databases.len()];
                                let payload = BrokerPayload {
                                    client_sequence: seq,
                                    events: vec![Statement::new("INSERT INTO events (seq) VALUES (?)")
                                        .with_arg("", ArgValue::Integer(seq as i64))],
                                    ..Default::default()
                                };
                                let topic = format!("{root}{client}/{database}/write");
                                if let Err(e) = link.send(&topic, payload.encode()?).await {
                                    warn!(client = %client, error = %e, "Write not sent");
                                    continue;
                                }
                                seq += 1;
                            }
                        }
                    }

                    debug!(client = %client, writes = seq, "Writer stopped");
                    anyhow::Ok(seq)
                })
            })
            .collect()
    }

    /// Seal pending writes into blocks every `interval`
    ///
    /// Returns the number of blocks sealed.
    pub fn spawn_sealer(&self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<u64> {
        let registry = Arc::clone(&self.registry);
        let databases = self.databases.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            let mut sealed: u64 = 0;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        for id in &databases {
                            let Some(db) = registry.lookup(id) else {
                                continue;
                            };
                            if let Some(block) = db.seal_block() {
                                debug!(database_id = %id, block, "Block sealed");
                                sealed += 1;
                            }
                        }
                    }
                }
            }
            sealed
        })
    }

    /// Ask the broker to replay every block of `database` to `client`
    pub async fn request_replay(&self, client: &str, database: &DatabaseId) -> Result<usize> {
        let Some(db) = self.registry.lookup(database) else {
            anyhow::bail!("Unknown database: {database}");
        };
        let blocks = db.block_count() as i32;
        if blocks == 0 {
            info!(database_id = %database, "Nothing committed yet, replay skipped");
            return Ok(0);
        }

        let payload = BrokerPayload {
            block_start: 0,
            index_start: 0,
            block_end: blocks - 1,
            index_end: i64::MAX,
            ..Default::default()
        };
        let topic = format!("{}{client}/{database}/replay", self.listen_root);
        self.client.send(&topic, payload.encode()?).await
    }
}

/// Publish counts at the end of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct PublishSummary {
    pub newest: usize,
    pub replay: usize,
    pub attempts: usize,
}
