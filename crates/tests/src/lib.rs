//! # Integration Tests
//!
//! 集成测试与端到端测试。
//!
//! 负责：
//! - 配置加载到 broker 启动的完整链路
//! - 模拟 e2e 测试（MockTransport + 内存链，无需真实 pub/sub 服务）
//! - 顺序、隔离与关闭语义

#[cfg(test)]
mod support {
    use std::sync::Arc;
    use std::time::Duration;

    use broker::Broker;
    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::BrokerConfig;
    use mock_backend::{MemoryRegistry, MockTransport};

    pub const LISTEN_ROOT: &str = "/cql/client/";

    pub fn config(period_ms: u64) -> BrokerConfig {
        let toml = format!(
            r#"
[transport]
addr = "tcp://127.0.0.1:1883"
user = "N"

[publish]
period_ms = {period_ms}
"#
        );
        ConfigLoader::load_from_str(&toml, ConfigFormat::Toml).unwrap()
    }

    pub async fn start(
        registry: &Arc<MemoryRegistry>,
        period_ms: u64,
    ) -> (Arc<MockTransport>, Broker<MemoryRegistry, MockTransport>) {
        let transport = Arc::new(MockTransport::new());
        let broker = Broker::start(config(period_ms), Arc::clone(registry), Arc::clone(&transport))
            .await
            .unwrap();
        (transport, broker)
    }

    /// Poll `condition` until it holds or `timeout` passes
    pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        condition()
    }

    pub fn write_body(seq: u64) -> Vec<u8> {
        format!(
            r#"{{"client_seq": {seq}, "events": [{{"Pattern": "INSERT INTO t VALUES (?)", "Args": [{{"Name": "", "Value": {seq}}}]}}]}}"#
        )
        .into_bytes()
    }
}

#[cfg(test)]
mod topic_tests {
    use contracts::{InboundMessage, Intent};
    use ingestion::{decode_message, decode_topic, IngestionError};

    use crate::support::LISTEN_ROOT;

    /// Every combination of 0-3 segments and intent token
    #[test]
    fn test_decode_grid() {
        let tokens = ["write", "replay", "create", "garbage"];

        let zero = decode_topic(LISTEN_ROOT, LISTEN_ROOT);
        assert!(zero.client_id.is_empty());
        assert!(zero.database_id.is_empty());
        assert_eq!(zero.intent, Intent::Invalid);

        let one = decode_topic(&format!("{LISTEN_ROOT}c1"), LISTEN_ROOT);
        assert_eq!(one.client_id, "c1");
        assert!(one.database_id.is_empty());
        assert_eq!(one.intent, Intent::Invalid);

        for token in tokens {
            let two = decode_topic(&format!("{LISTEN_ROOT}c1/{token}"), LISTEN_ROOT);
            assert_eq!(two.client_id, "c1");
            if token == "create" {
                assert!(two.database_id.is_empty());
                assert_eq!(two.intent, Intent::Create);
            } else {
                assert_eq!(two.database_id, token);
                assert_eq!(two.intent, Intent::Invalid);
            }

            let three = decode_topic(&format!("{LISTEN_ROOT}c1/db1/{token}"), LISTEN_ROOT);
            assert_eq!(three.client_id, "c1");
            assert_eq!(three.database_id, "db1");
            let expected = match token {
                "write" => Intent::Write,
                "replay" => Intent::Replay,
                "create" => Intent::Create,
                _ => Intent::Invalid,
            };
            assert_eq!(three.intent, expected, "token {token}");

            let four = decode_topic(&format!("{LISTEN_ROOT}c1/db1/{token}/x"), LISTEN_ROOT);
            assert!(four.client_id.is_empty());
            assert!(four.database_id.is_empty());
            assert_eq!(four.intent, Intent::Invalid);
        }
    }

    #[test]
    fn test_garbage_never_becomes_an_event() {
        let cases: [(&str, &[u8]); 4] = [
            ("/cql/client/c1/db1/garbage", b"{}"),
            ("/cql/client/c1/db1/write/extra", b"{}"),
            ("/cql/client/c1/db1/write", b"not json"),
            ("/cql/client/c1/db1/write", b"[1, 2, 3]"),
        ];

        for (topic, body) in cases {
            let message = InboundMessage::new(topic, body.to_vec());
            let result = decode_message(&message, LISTEN_ROOT);
            assert!(
                matches!(
                    result,
                    Err(IngestionError::InvalidTopic { .. } | IngestionError::InvalidPayload { .. })
                ),
                "{topic}"
            );
        }
    }
}

#[cfg(test)]
mod e2e_tests {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{ArgValue, DatabaseId, NodeId, QoS};
    use mock_backend::{
        synthetic_block, MemoryDatabase, MemoryDatabaseConfig, MemoryRegistry, MockTransportConfig,
    };

    use crate::support::{start, wait_for, write_body};

    /// Concurrent producers keep their own order through the single consumer
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_preserve_per_client_order() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: u64 = 100;

        let registry = Arc::new(MemoryRegistry::new());
        let db = registry.insert(MemoryDatabase::new("db1"));
        let (transport, mut broker) = start(&registry, 3_600_000).await;

        let threads: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let transport = Arc::clone(&transport);
                std::thread::spawn(move || {
                    let topic = format!("/cql/client/c{producer}/db1/write");
                    for seq in 0..PER_PRODUCER {
                        transport.deliver(&topic, write_body(seq));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        broker.close().await;

        let requests = db.executed_requests();
        assert_eq!(requests.len(), PRODUCERS * PER_PRODUCER as usize);

        let mut per_client: HashMap<NodeId, Vec<u64>> = HashMap::new();
        for request in &requests {
            per_client
                .entry(request.header.node_id.clone())
                .or_default()
                .push(request.header.seq_no);
        }
        assert_eq!(per_client.len(), PRODUCERS);
        for (client, seqs) in per_client {
            assert_eq!(seqs, (0..PER_PRODUCER).collect::<Vec<_>>(), "client {client}");
        }
    }

    /// One write event produces exactly one chain request; a failing database
    /// does not block later events
    #[tokio::test]
    async fn test_write_round_trip_with_collaborator_failure() {
        let registry = Arc::new(MemoryRegistry::new());
        let broken = registry.insert(MemoryDatabase::new("broken"));
        broken.set_config(MemoryDatabaseConfig {
            fail_execute: true,
            ..Default::default()
        });
        let db = registry.insert(MemoryDatabase::new("db1"));
        let (transport, mut broker) = start(&registry, 3_600_000).await;

        transport.deliver("/cql/client/c1/broken/write", write_body(1));
        transport.deliver("/cql/client/c1/db1/write", write_body(7));

        broker.close().await;

        let requests = db.executed_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].header.seq_no, 7);
        assert_eq!(requests[0].header.node_id, "c1");
        assert_eq!(requests[0].statements.len(), 1);
        assert_eq!(requests[0].statements[0].pattern, "INSERT INTO t VALUES (?)");
        assert_eq!(requests[0].statements[0].args[0].value, ArgValue::Integer(7));

        let metrics = broker.dispatch_metrics().snapshot();
        assert_eq!(metrics.writes, 1);
        assert_eq!(metrics.failures, 1);
    }

    /// 2-block chain [0,1,2] [0,1], range (0,1)-(1,0)
    #[tokio::test]
    async fn test_replay_range_over_transport() {
        let id: DatabaseId = "db1".into();
        let writer: NodeId = "writer".into();
        let registry = Arc::new(MemoryRegistry::new());
        registry.insert(MemoryDatabase::with_blocks(
            id.clone(),
            vec![
                synthetic_block(&id, &writer, 0, 3),
                synthetic_block(&id, &writer, 3, 2),
            ],
        ));
        let (transport, mut broker) = start(&registry, 3_600_000).await;

        transport.deliver(
            "/cql/client/reader/db1/replay",
            &br#"{"block_start": 0, "index_start": 1, "block_end": 1, "index_end": 0}"#[..],
        );
        broker.close().await;

        let published = transport.published_to("/cql/miner/N/db1/replay/reader");
        let positions: Vec<(i32, i64)> = published
            .iter()
            .map(|m| {
                let payload = m.decode_payload().unwrap();
                (payload.block_id, payload.block_index)
            })
            .collect();
        assert_eq!(positions, vec![(0, 1), (0, 2), (1, 0)]);
        assert!(published.iter().all(|m| m.retained && m.qos == QoS::AtLeastOnce));
    }

    /// Committed writes show up on the newest topic
    #[tokio::test]
    async fn test_write_then_newest_publish() {
        let registry = Arc::new(MemoryRegistry::new());
        let db = registry.insert(MemoryDatabase::new("db1"));
        let (transport, mut broker) = start(&registry, 20).await;

        transport.deliver("/cql/client/c1/db1/write", write_body(3));
        assert!(wait_for(Duration::from_secs(2), || db.executed_requests().len() == 1).await);
        assert_eq!(db.seal_block(), Some(0));

        let seen = wait_for(Duration::from_secs(2), || {
            !transport.published_to("/cql/miner/N/db1/newest").is_empty()
        })
        .await;
        broker.close().await;
        assert!(seen, "newest block was never published");

        let payload = transport.published_to("/cql/miner/N/db1/newest")[0]
            .decode_payload()
            .unwrap();
        assert_eq!(payload.block_id, 0);
        assert_eq!(payload.block_index, 0);
        assert_eq!(payload.client_id, "c1");
        assert_eq!(payload.client_sequence, 3);
    }

    /// A database whose publishes fail does not suppress the others
    #[tokio::test]
    async fn test_periodic_tick_isolation() {
        let registry = Arc::new(MemoryRegistry::new());
        for name in ["db1", "db2", "db3"] {
            let id: DatabaseId = name.into();
            registry.insert(MemoryDatabase::with_blocks(
                id.clone(),
                vec![synthetic_block(&id, &"w".into(), 0, 1)],
            ));
        }
        let (transport, mut broker) = start(&registry, 20).await;
        transport.set_config(MockTransportConfig {
            fail_publish_matching: vec!["/db1/".into()],
            ..Default::default()
        });

        let seen = wait_for(Duration::from_secs(2), || {
            !transport.published_to("/db2/newest").is_empty()
                && !transport.published_to("/db3/newest").is_empty()
        })
        .await;
        broker.close().await;

        assert!(seen);
        assert!(transport.published_to("/db1/newest").is_empty());
    }

    /// Invalid and unroutable messages are dropped without stopping the loop
    #[tokio::test]
    async fn test_bad_messages_are_dropped() {
        let registry = Arc::new(MemoryRegistry::new());
        let db = registry.insert(MemoryDatabase::new("db1"));
        let (transport, mut broker) = start(&registry, 3_600_000).await;

        transport.deliver("/cql/client/c1/db1/garbage", write_body(1));
        transport.deliver("/cql/client/c1/db1/write", &b"{broken"[..]);
        transport.deliver("/cql/client/c1/missing/write", write_body(2));
        transport.deliver("/cql/client/c1/create", &b"{}"[..]);
        transport.deliver("/cql/client/c1/db1/write", write_body(3));

        broker.close().await;

        assert_eq!(db.executed_requests().len(), 1);
        let ingestion = broker.ingestion_metrics().snapshot();
        assert_eq!(ingestion.messages_received, 5);
        assert_eq!(ingestion.invalid_topics, 1);
        assert_eq!(ingestion.invalid_payloads, 1);

        let dispatch = broker.dispatch_metrics().snapshot();
        assert_eq!(dispatch.dropped, 1);
        assert_eq!(dispatch.creates, 1);
        assert_eq!(dispatch.writes, 1);
    }

    /// Shutdown twice is harmless; messages after close are not dispatched
    #[tokio::test]
    async fn test_idempotent_shutdown() {
        let registry = Arc::new(MemoryRegistry::new());
        let db = registry.insert(MemoryDatabase::new("db1"));
        let (transport, mut broker) = start(&registry, 10).await;

        transport.deliver("/cql/client/c1/db1/write", write_body(1));
        broker.close().await;
        broker.close().await;

        assert_eq!(transport.unsubscribe_calls(), 1);
        assert_eq!(transport.disconnect_calls(), 1);
        assert_eq!(transport.deliver("/cql/client/c1/db1/write", write_body(2)), 0);
        assert_eq!(db.executed_requests().len(), 1);
    }
}
