//! # Shardmux
//!
//! Command routing and reply normalization for clients of sharded,
//! Redis-compatible key-value stores.
//!
//! Typed calls are encoded into wire commands, multi-key commands are split
//! per hash slot and sent to the owning shards concurrently, and the raw
//! replies are merged back into one typed result in input order. Topology
//! changes (MOVED, ASK) are followed transparently.
//!
//! Sockets, TLS and authentication are out of scope: plug them in through
//! the [`Transport`] trait.
//!
//! ## Features
//!
//! - `test-utils` - [`testing::MockCluster`], an in-memory cluster speaking RESP
//!
//! ## Example
//!
//! ```
//! # #[cfg(feature = "test-utils")]
//! # async fn example() -> shardmux::Result<()> {
//! use shardmux::testing::MockCluster;
//! use shardmux::ClientBuilder;
//!
//! let nodes = ["127.0.0.1:7000", "127.0.0.1:7001", "127.0.0.1:7002"];
//! let client = ClientBuilder::new()
//!     .addresses(nodes)
//!     .cluster_mode(true)
//!     .build(MockCluster::new(&nodes))
//!     .await?;
//!
//! client.set("greeting", "hello").await?;
//! assert_eq!(client.get("greeting").await?, Some("hello".to_string()));
//! assert_eq!(client.del(&["greeting", "missing"]).await?, 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub(crate) mod core;
pub mod proto;

#[cfg(test)]
mod scenarios;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use crate::core::builder::ClientBuilder;
pub use crate::core::command;
pub use crate::core::options::{ConditionalSet, Expiry, SetOptions};
pub use crate::core::reply::SetStatus;
pub use crate::core::transport::Transport;
pub use crate::core::{Client, Error, Result, ShardFailure};

pub use crate::cluster::{key_slot, ClusterTopology, Discovery, SeedDiscovery};
