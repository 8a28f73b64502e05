//! # Cluster routing
//!
//! Slot-based routing, topology discovery and redirect handling
//! (`MOVED`/`ASK`) for Redis Cluster.
//!
//! ## Layers
//!
//! - [`slot`] - CRC16 key hashing with hash tags
//! - [`endpoint`] - Node addresses and address translation
//! - [`pool`] - Bounded per-node connection pools
//! - [`cache`] - Slot table and node registry shared by all commands
//! - [`discovery`] - `CLUSTER SLOTS` loading, at most one pass at a time
//! - [`dispatcher`] - Per-command retry loop following redirects
//! - [`ClusterClient`] - The public facade tying them together
//!
//! ## Example
//!
//! ```no_run
//! # async fn example() -> slotmux::Result<()> {
//! use slotmux::ClusterClient;
//! use bytes::Bytes;
//!
//! // Connect to Redis Cluster (comma-separated seed nodes)
//! let client = ClusterClient::connect("127.0.0.1:7000,127.0.0.1:7001").await?;
//!
//! // Commands are automatically routed to correct node
//! client.set("key", Bytes::from("value")).await?;
//! let value = client.get("key").await?;
//! # Ok(())
//! # }
//! ```

pub mod cache;
mod client;
pub mod commands;
pub mod discovery;
pub mod dispatcher;
pub mod endpoint;
mod errors;
pub mod pool;
pub mod slot;
pub mod topology;

pub use cache::TopologyCache;
pub use client::ClusterClient;
pub use discovery::{Discovery, Rediscovery};
pub use dispatcher::Dispatcher;
pub use endpoint::{AddressTranslator, NodeEndpoint};
pub use errors::{classify, RedirectionSignal};
pub use pool::{Connector, NodeConnection, NodePool, PoolConfig, PooledConnection};
pub use slot::{key_slot, SLOT_COUNT};
pub use topology::{ClusterTopology, SlotRange};
