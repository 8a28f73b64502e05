//! # Slotmux
//!
//! Async Redis Cluster client core: slot hashing, a shared topology cache,
//! single-flight topology discovery and a dispatcher that follows `MOVED`
//! and `ASK` redirects within a bounded budget.
//!
//! ## Features
//!
//! - `test-utils` - Exposes [`testing::MockCluster`], an in-memory cluster
//!
//! ## Example
//!
//! ```no_run
//! use slotmux::ClusterClientBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = ClusterClientBuilder::new()
//!         .addresses("127.0.0.1:7000,127.0.0.1:7001,127.0.0.1:7002")
//!         .build()
//!         .await?;
//!     client.set("{user:42}:name", "ada").await?;
//!     let _ = client.get("{user:42}:name").await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod proto;

#[cfg(test)]
mod stress;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

// Re-export high-level client types for convenience
pub use crate::cluster::{
    key_slot, AddressTranslator, ClusterClient, Connector, Discovery, NodeConnection,
    NodeEndpoint, NodePool, PoolConfig, TopologyCache,
};
pub use crate::core::builder::ClusterClientBuilder;
pub use crate::core::command::Cmd;
pub use crate::core::connection::{Connection, TcpConnector};
pub use crate::core::ConnectionConfig;
pub use crate::proto::error::{Error, Result};
pub use crate::proto::frame::Frame;
