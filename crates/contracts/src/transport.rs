//! Transport trait - pub/sub connection used by the broker
//!
//! Every operation resolves only after the remote side acknowledged it, so
//! awaiting `publish` is the broker's backpressure point.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ContractError;

/// Delivery guarantee of a publish or subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    AtMostOnce,
    #[default]
    AtLeastOnce,
    ExactlyOnce,
}

impl QoS {
    pub fn level(&self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("qos must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos.level()
    }
}

/// Message delivered by a subscription
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Subscription callback
///
/// Invoked from arbitrary transport threads, possibly concurrently.
pub type MessageCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

/// MQTT-style filter matching (`+` one level, trailing `#` any remainder)
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Pub/sub transport
#[trait_variant::make(Transport: Send)]
pub trait LocalTransport {
    /// Open the connection
    async fn connect(&self) -> Result<(), ContractError>;

    /// Subscribe to a topic filter; matching messages are passed to `callback`
    async fn subscribe(
        &self,
        filter: &str,
        qos: QoS,
        callback: MessageCallback,
    ) -> Result<(), ContractError>;

    /// Publish and wait for acknowledgement
    async fn publish(
        &self,
        topic: &str,
        qos: QoS,
        retained: bool,
        payload: Bytes,
    ) -> Result<(), ContractError>;

    /// Remove a subscription
    async fn unsubscribe(&self, filter: &str) -> Result<(), ContractError>;

    /// Close the connection, giving in-flight work `quiesce` to finish
    async fn disconnect(&self, quiesce: Duration);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_levels() {
        assert_eq!(QoS::try_from(1).unwrap(), QoS::AtLeastOnce);
        assert!(QoS::try_from(3).is_err());
        assert_eq!(u8::from(QoS::ExactlyOnce), 2);
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("/cql/client/#", "/cql/client/c1/db1/write"));
        assert!(topic_matches("/cql/client/#", "/cql/client/"));
        assert!(topic_matches("/cql/+/c1", "/cql/client/c1"));
        assert!(!topic_matches("/cql/client/#", "/cql/miner/n/db/newest"));
        assert!(!topic_matches("/a/b", "/a/b/c"));
        assert!(!topic_matches("/a/b/c", "/a/b"));
    }
}
