//! Subscription callback
//!
//! Runs on transport threads: decode topic and payload, then enqueue.
//! Never panics and never blocks; anything undecodable is logged and dropped.

use std::sync::Arc;

use contracts::{BrokerPayload, InboundMessage, MessageCallback, SubscribeEvent};
use tracing::{debug, error, warn};

use crate::error::{IngestionError, Result};
use crate::queue::IngestSender;
use crate::topic::decode_topic;

/// Decode one inbound message into a routable event
///
/// # Errors
/// - `InvalidTopic` when the topic carries no valid intent
/// - `InvalidPayload` when the body is not a valid payload object
pub fn decode_message(message: &InboundMessage, listen_root: &str) -> Result<SubscribeEvent> {
    let topic = decode_topic(&message.topic, listen_root);
    if !topic.intent.is_valid() {
        return Err(IngestionError::InvalidTopic {
            topic: message.topic.clone(),
        });
    }

    let payload =
        BrokerPayload::decode(&message.payload).map_err(|source| IngestionError::InvalidPayload {
            topic: message.topic.clone(),
            source,
        })?;

    Ok(SubscribeEvent {
        client_id: topic.client_id,
        database_id: topic.database_id,
        intent: topic.intent,
        payload,
    })
}

/// Build the callback handed to `Transport::subscribe`
pub fn subscribe_callback(sender: IngestSender, listen_root: String) -> MessageCallback {
    Arc::new(move |message: InboundMessage| {
        sender.metrics.record_received();
        debug!(topic = %message.topic, "inbound message");

        match decode_message(&message, &listen_root) {
            Ok(event) => {
                observability::record_event_received(event.intent.as_str());
                debug!(
                    client_id = %event.client_id,
                    database_id = %event.database_id,
                    intent = %event.intent,
                    client_seq = event.payload.client_sequence,
                    "decoded event"
                );
                if let Err(e) = sender.push(event) {
                    observability::record_event_dropped("queue_closed");
                    warn!(topic = %message.topic, error = %e, "event dropped");
                }
            }
            Err(e @ IngestionError::InvalidTopic { .. }) => {
                sender.metrics.record_invalid_topic();
                observability::record_event_dropped("invalid_topic");
                error!(
                    topic = %message.topic,
                    payload = %String::from_utf8_lossy(&message.payload),
                    error = %e,
                    "invalid topic"
                );
            }
            Err(e) => {
                sender.metrics.record_invalid_payload();
                observability::record_event_dropped("invalid_payload");
                error!(
                    topic = %message.topic,
                    payload = %String::from_utf8_lossy(&message.payload),
                    error = %e,
                    "invalid message"
                );
            }
        }
    })
}
