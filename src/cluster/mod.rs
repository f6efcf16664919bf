//! # Cluster routing
//!
//! Slot-based routing for sharded deployments.
//!
//! ## Features
//!
//! - **Slot calculation**: CRC16 of the key or its `{hash tag}`, modulo 16384
//! - **Topology snapshots**: slot ranges mapped to masters, parsed from `CLUSTER SLOTS`
//! - **Discovery**: snapshots replaced wholesale through a [`Discovery`] source
//! - **Redirect handling**: MOVED, ASK and TRYAGAIN are followed transparently
//! - **Fan-out**: multi-key commands are split per slot and merged in input order

pub mod discovery;
mod errors;
pub(crate) mod router;
mod slot;
mod topology;

pub use discovery::{Discovery, SeedDiscovery};
pub use errors::Redirect;
pub use slot::{key_slot, SLOT_COUNT};
pub use topology::{ClusterTopology, NodeId, NodeInfo, SlotRange};
