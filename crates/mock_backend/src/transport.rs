//! Mock pub/sub transport
//!
//! Publishes are recorded instead of sent; `deliver` plays the role of the
//! server pushing a message to matching subscriptions on the caller's thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use bytes::Bytes;
use contracts::{
    topic_matches, BrokerPayload, ContractError, InboundMessage, MessageCallback, QoS, Transport,
};
use tracing::{debug, instrument};

/// Failure injection for `MockTransport`
#[derive(Debug, Default, Clone)]
pub struct MockTransportConfig {
    pub fail_connect: bool,
    pub fail_subscribe: bool,
    /// Publishes to topics containing any of these substrings fail
    pub fail_publish_matching: Vec<String>,
    /// Artificial acknowledgement latency for every publish
    pub publish_delay: Option<Duration>,
}

/// One recorded publish
#[derive(Debug, Clone)]
pub struct PublishedMessage {
    pub topic: String,
    pub qos: QoS,
    pub retained: bool,
    pub payload: Bytes,
}

impl PublishedMessage {
    /// Decode the recorded body back into a payload
    pub fn decode_payload(&self) -> Result<BrokerPayload, ContractError> {
        BrokerPayload::decode(&self.payload)
    }
}

/// Mock transport
#[derive(Default)]
pub struct MockTransport {
    config: Mutex<MockTransportConfig>,
    connected: AtomicBool,
    subscriptions: Mutex<HashMap<String, MessageCallback>>,
    published: Mutex<Vec<PublishedMessage>>,
    publish_attempts: AtomicUsize,
    unsubscribe_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MockTransportConfig) -> Self {
        Self {
            config: Mutex::new(config),
            ..Default::default()
        }
    }

    /// Replace the failure injection config
    pub fn set_config(&self, config: MockTransportConfig) {
        *self.config.lock().unwrap() = config;
    }

    /// Push a message to every matching subscription, returning how many received it
    pub fn deliver(&self, topic: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let callbacks: Vec<MessageCallback> = self
            .subscriptions
            .lock()
            .unwrap()
            .iter()
            .filter(|(filter, _)| topic_matches(filter, topic))
            .map(|(_, callback)| callback.clone())
            .collect();

        for callback in &callbacks {
            callback(InboundMessage::new(topic, payload.clone()));
        }
        callbacks.len()
    }

    /// Successful publishes in order
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.published.lock().unwrap().clone()
    }

    /// Successful publishes whose topic ends with `suffix`
    pub fn published_to(&self, suffix: &str) -> Vec<PublishedMessage> {
        self.published()
            .into_iter()
            .filter(|m| m.topic.ends_with(suffix))
            .collect()
    }

    /// Publish calls including failed ones
    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }

    pub fn clear_published(&self) {
        self.published.lock().unwrap().clear();
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().unwrap().len()
    }

    pub fn unsubscribe_calls(&self) -> usize {
        self.unsubscribe_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    fn config(&self) -> MockTransportConfig {
        self.config.lock().unwrap().clone()
    }
}

impl Transport for MockTransport {
    #[instrument(name = "mock_transport_connect", skip(self))]
    async fn connect(&self) -> Result<(), ContractError> {
        if self.config().fail_connect {
            return Err(ContractError::TransportConnection {
                message: "mock failure".into(),
            });
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    #[instrument(name = "mock_transport_subscribe", skip(self, callback), fields(filter = %filter))]
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), ContractError> {
        if self.config().fail_subscribe {
            return Err(ContractError::transport_ack("subscribe", filter, "mock failure"));
        }
        debug!(filter = %filter, qos = qos.level(), "mock subscription added");
        self.subscriptions
            .lock()
            .unwrap()
            .insert(filter.to_string(), callback);
        Ok(())
    }

    #[instrument(name = "mock_transport_publish", skip(self, payload), fields(topic = %topic))]
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: Bytes,
    ) -> Result<(), ContractError> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);

        if !self.is_connected() {
            return Err(ContractError::TransportConnection {
                message: "not connected".into(),
            });
        }

        let config = self.config();
        if let Some(delay) = config.publish_delay {
            tokio::time::sleep(delay).await;
        }
        if config
            .fail_publish_matching
            .iter()
            .any(|pattern| topic.contains(pattern.as_str()))
        {
            return Err(ContractError::transport_ack("publish", topic, "mock failure"));
        }

        self.published.lock().unwrap().push(PublishedMessage {
            topic: topic.to_string(),
            qos,
            retained,
            payload,
        });
        Ok(())
    }

    #[instrument(name = "mock_transport_unsubscribe", skip(self), fields(filter = %filter))]
    async fn unsubscribe(&self, filter: &str) -> Result<(), ContractError> {
        self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
        // 幂等：即使不存在也返回 Ok
        self.subscriptions.lock().unwrap().remove(filter);
        Ok(())
    }

    #[instrument(name = "mock_transport_disconnect", skip(self))]
    async fn disconnect(&self, quiesce: Duration) {
        let _ = quiesce;
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_publish_requires_connection() {
        let transport = MockTransport::new();
        let result = transport
            .publish("/t", QoS::AtLeastOnce, true, Bytes::from_static(b"{}"))
            .await;
        assert!(result.is_err());
        assert_eq!(transport.publish_attempts(), 1);

        transport.connect().await.unwrap();
        transport
            .publish("/t", QoS::AtLeastOnce, true, Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert_eq!(transport.published().len(), 1);
        assert!(transport.published()[0].retained);
    }

    #[tokio::test]
    async fn test_publish_failure_injection() {
        let transport = MockTransport::with_config(MockTransportConfig {
            fail_publish_matching: vec!["/db2/".into()],
            ..Default::default()
        });
        transport.connect().await.unwrap();

        assert!(transport
            .publish("/m/n/db2/newest", QoS::AtLeastOnce, true, Bytes::new())
            .await
            .is_err());
        assert!(transport
            .publish("/m/n/db1/newest", QoS::AtLeastOnce, true, Bytes::new())
            .await
            .is_ok());
        assert_eq!(transport.published().len(), 1);
        assert_eq!(transport.publish_attempts(), 2);
    }

    #[tokio::test]
    async fn test_deliver_to_matching_subscription() {
        let transport = MockTransport::new();
        transport.connect().await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: MessageCallback = Arc::new(move |msg: InboundMessage| {
            sink.lock().unwrap().push(msg.topic);
        });
        transport
            .subscribe("/cql/client/#", QoS::AtLeastOnce, callback)
            .await
            .unwrap();

        assert_eq!(transport.deliver("/cql/client/c1/db1/write", &b"{}"[..]), 1);
        assert_eq!(transport.deliver("/elsewhere", &b"{}"[..]), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);

        transport.unsubscribe("/cql/client/#").await.unwrap();
        transport.unsubscribe("/cql/client/#").await.unwrap();
        assert_eq!(transport.subscription_count(), 0);
        assert_eq!(transport.deliver("/cql/client/c1/db1/write", &b"{}"[..]), 0);
    }
}
