//! # Contracts
//!
//! Frozen interface contracts for the chain sync broker, defining the data
//! structures and collaborator traits shared by every other crate.
//! All business crates can only depend on this crate, reverse dependencies are prohibited.
//!
//! ## Topic model
//! - Inbound: `<listen_prefix><client_id>[/<database_id>][/<intent>]`
//! - Outbound: `<publish_prefix><node>/<database_id>/<intent>[/<requesting_client>]`

mod chain;
mod config;
mod error;
mod ids;
mod intent;
mod payload;
mod transport;

pub use chain::*;
pub use config::*;
pub use error::*;
pub use ids::{DatabaseId, NodeId};
pub use intent::Intent;
pub use payload::*;
pub use transport::*;
