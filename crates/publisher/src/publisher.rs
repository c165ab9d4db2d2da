//! Publisher - the only code path that calls `Transport::publish`

use std::sync::Arc;

use bytes::Bytes;
use contracts::{BrokerConfig, BrokerPayload, DatabaseId, Intent, NodeId, QoS, Transport};
use tracing::{debug, instrument};

use crate::error::PublishError;

/// Outbound publisher
///
/// Topics are `<root>/<database>/newest` and `<root>/<database>/replay/<client>`,
/// where `root` is `<publish_prefix><node>`.
pub struct Publisher<T> {
    transport: Arc<T>,
    root: String,
    qos: QoS,
    retained: bool,
}

impl<T> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            root: self.root.clone(),
            qos: self.qos,
            retained: self.retained,
        }
    }
}

impl<T: Transport + Send + Sync + 'static> Publisher<T> {
    /// Create a publisher rooted at `root` (no trailing slash)
    pub fn new(transport: Arc<T>, root: impl Into<String>, qos: QoS, retained: bool) -> Self {
        Self {
            transport,
            root: root.into(),
            qos,
            retained,
        }
    }

    /// Create from broker configuration
    pub fn from_config(transport: Arc<T>, config: &BrokerConfig) -> Self {
        Self::new(
            transport,
            config.topics.publish_root(&config.node_id()),
            config.publish.qos,
            config.publish.retained,
        )
    }

    /// Outbound topic for `intent`
    ///
    /// # Errors
    /// - `UnsupportedIntent` for anything but `Newest` / `Replay`
    /// - `MissingRequester` for `Replay` without a requesting client
    pub fn topic_for(
        &self,
        intent: Intent,
        database_id: &DatabaseId,
        requester: Option<&NodeId>,
    ) -> Result<String, PublishError> {
        match intent {
            Intent::Newest => Ok(format!("{}/{}/{}", self.root, database_id, intent)),
            Intent::Replay => {
                let requester = requester.ok_or(PublishError::MissingRequester)?;
                Ok(format!(
                    "{}/{}/{}/{}",
                    self.root, database_id, intent, requester
                ))
            }
            other => Err(PublishError::UnsupportedIntent { intent: other }),
        }
    }

    /// Serialize and publish, waiting for the transport acknowledgement
    #[instrument(
        name = "publisher_publish",
        skip(self, payload, requester),
        fields(intent = %intent, database_id = %database_id, block_id = payload.block_id, block_index = payload.block_index)
    )]
    pub async fn publish(
        &self,
        intent: Intent,
        database_id: &DatabaseId,
        payload: &BrokerPayload,
        requester: Option<&NodeId>,
    ) -> Result<(), PublishError> {
        let topic = self.topic_for(intent, database_id, requester)?;
        let body = payload.encode().map_err(PublishError::Encode)?;

        let result = self
            .transport
            .publish(&topic, self.qos, self.retained, Bytes::from(body))
            .await
            .map_err(|source| PublishError::Transport {
                topic: topic.clone(),
                source,
            });

        observability::record_publish(intent.as_str(), result.is_ok());
        if result.is_ok() {
            debug!(topic = %topic, "published");
        }
        result
    }

    pub fn root(&self) -> &str {
        &self.root
    }
}
