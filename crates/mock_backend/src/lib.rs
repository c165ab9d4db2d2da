//! # Mock Backend
//!
//! In-memory collaborators for running the broker without a chain or a
//! pub/sub server.
//!
//! Responsibilities:
//! - `MemoryDatabase`: synthetic chain with positional block fetch
//! - `MemoryRegistry`: ordered database registry
//! - `MockTransport`: records publishes, delivers injected inbound messages
//!
//! All three support failure injection for testing error paths.

pub mod chain;
pub mod registry;
pub mod transport;

pub use chain::{synthetic_block, MemoryDatabase, MemoryDatabaseConfig};
pub use registry::MemoryRegistry;
pub use transport::{MockTransport, MockTransportConfig, PublishedMessage};
