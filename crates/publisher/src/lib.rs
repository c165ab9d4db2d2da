//! # Publisher
//!
//! Outbound side of the broker.
//!
//! Responsibilities:
//! - Build outbound topics and publish payloads (`Publisher`)
//! - Periodically publish the newest block of every database (`NewestPublisher`)
//!
//! Only `newest` and `replay` are ever published; any other intent is
//! rejected before the transport is touched.

pub mod error;
pub mod newest;
pub mod publisher;

pub use error::{PublishError, TickError};
pub use newest::{DatabaseTick, NewestPublisher, TickReport};
pub use publisher::Publisher;
