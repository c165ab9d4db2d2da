//! # Ingestion
//!
//! Inbound side of the broker.
//!
//! Responsibilities:
//! - Decode addressed topics into `(client, database, intent)`
//! - Decode JSON payloads into `BrokerPayload`
//! - Serialize concurrent transport callbacks into one FIFO `IngestQueue`
//!
//! ## Usage Example
//!
//! ```ignore
//! use ingestion::{subscribe_callback, IngestQueue};
//!
//! let mut queue = IngestQueue::new();
//! let rx = queue.take_receiver().unwrap();
//! let callback = subscribe_callback(queue.sender(), "/cql/client/".to_string());
//! transport.subscribe("/cql/client/#", QoS::AtLeastOnce, callback).await?;
//!
//! while let Ok(event) = rx.recv().await {
//!     // dispatch event
//! }
//! ```

mod callback;
mod error;
mod metrics;
mod queue;
mod topic;

pub use callback::{decode_message, subscribe_callback};
pub use contracts::SubscribeEvent;
pub use error::{IngestionError, Result};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use queue::{IngestQueue, IngestSender};
pub use topic::{decode_topic, DecodedTopic};
