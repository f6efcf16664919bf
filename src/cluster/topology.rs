//! Cluster topology snapshots.
//!
//! A [`ClusterTopology`] maps every hash slot to the master node that owns
//! it. Snapshots are built once, from a `CLUSTER SLOTS` reply or from
//! explicit ranges, and never mutated afterwards; a refresh produces a new
//! snapshot.

use std::collections::HashMap;
use std::fmt;

use super::slot::SLOT_COUNT;
use crate::proto::frame::Frame;
use crate::{Error, Result};

/// Unique identifier for a node in the cluster.
///
/// The store assigns 40-character hex IDs. Nodes that do not report one
/// (older servers) are identified by their address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(String);

impl NodeId {
    /// Creates a new NodeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the node ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A shard master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node ID.
    pub id: NodeId,
    /// Network address (host:port).
    pub address: String,
}

impl NodeInfo {
    /// Creates a node whose ID is its address.
    pub fn from_address(address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            id: NodeId::new(address.clone()),
            address,
        }
    }
}

/// A range of hash slots owned by one master.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    /// Start of the slot range (inclusive).
    pub start: u16,
    /// End of the slot range (inclusive).
    pub end: u16,
    /// Master node serving this slot range.
    pub master: NodeInfo,
}

impl SlotRange {
    /// Returns true if the given slot is within this range.
    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    /// Returns the number of slots in this range.
    pub fn len(&self) -> usize {
        (self.end - self.start + 1) as usize
    }

    /// Returns true if this range is empty (invalid).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// An immutable view of slot ownership.
///
/// Ranges are kept sorted by start slot so lookups are a binary search.
#[derive(Debug, Clone, Default)]
pub struct ClusterTopology {
    slot_ranges: Vec<SlotRange>,
    nodes: HashMap<NodeId, NodeInfo>,
}

impl ClusterTopology {
    /// Creates a topology that owns no slots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a topology from slot ranges.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if a range is inverted, exceeds
    /// the slot space, or overlaps another range.
    pub fn from_ranges(ranges: impl IntoIterator<Item = SlotRange>) -> Result<Self> {
        let mut slot_ranges: Vec<SlotRange> = ranges.into_iter().collect();
        slot_ranges.sort_by_key(|range| range.start);

        for range in &slot_ranges {
            if range.is_empty() || range.end >= SLOT_COUNT {
                return Err(Error::InvalidArgument {
                    message: format!("invalid slot range {}-{}", range.start, range.end),
                });
            }
        }
        for pair in slot_ranges.windows(2) {
            if pair[1].start <= pair[0].end {
                return Err(Error::InvalidArgument {
                    message: format!(
                        "slot ranges {}-{} and {}-{} overlap",
                        pair[0].start, pair[0].end, pair[1].start, pair[1].end
                    ),
                });
            }
        }

        let nodes = slot_ranges
            .iter()
            .map(|range| (range.master.id.clone(), range.master.clone()))
            .collect();

        Ok(Self { slot_ranges, nodes })
    }

    /// A topology where one node owns every slot.
    pub fn single_node(address: impl Into<String>) -> Self {
        let master = NodeInfo::from_address(address);
        Self {
            nodes: HashMap::from([(master.id.clone(), master.clone())]),
            slot_ranges: vec![SlotRange {
                start: 0,
                end: SLOT_COUNT - 1,
                master,
            }],
        }
    }

    /// Finds the master responsible for a slot, `None` if uncovered.
    pub fn master_for_slot(&self, slot: u16) -> Option<&NodeInfo> {
        let idx = self
            .slot_ranges
            .partition_point(|range| range.start <= slot)
            .checked_sub(1)?;
        let range = &self.slot_ranges[idx];
        range.contains(slot).then_some(&range.master)
    }

    /// Gets node information by node ID.
    pub fn node(&self, node_id: &NodeId) -> Option<&NodeInfo> {
        self.nodes.get(node_id)
    }

    /// Iterates over the known masters.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeInfo> {
        self.nodes.values()
    }

    /// Number of distinct masters.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The slot ranges, sorted by start slot.
    pub fn slot_ranges(&self) -> &[SlotRange] {
        &self.slot_ranges
    }

    /// Returns true if every slot has an owner.
    pub fn is_fully_covered(&self) -> bool {
        self.slot_ranges.iter().map(SlotRange::len).sum::<usize>() == SLOT_COUNT as usize
    }

    /// Parses a `CLUSTER SLOTS` reply.
    ///
    /// Each entry is `[start, end, [host, port, id?, ...], replicas...]`.
    /// Replicas are ignored: every command is routed to the master.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if the reply is not an array, an entry
    /// is malformed, or the ranges overlap.
    pub fn from_cluster_slots(frame: Frame) -> Result<Self> {
        let entries = match frame {
            Frame::Array(arr) => arr,
            Frame::Error(e) => return Err(Error::from_server_reply(&e)),
            other => {
                return Err(Error::Protocol {
                    message: format!(
                        "CLUSTER SLOTS reply must be an array, got {}",
                        other.kind()
                    ),
                })
            }
        };

        let mut ranges = Vec::with_capacity(entries.len());
        for entry in entries {
            let Frame::Array(fields) = entry else {
                return Err(protocol("slot entry must be an array"));
            };
            if fields.len() < 3 {
                return Err(protocol("slot entry must have at least 3 elements"));
            }

            let start = slot_number(&fields[0])?;
            let end = slot_number(&fields[1])?;
            let master = parse_node(&fields[2])?;
            ranges.push(SlotRange { start, end, master });
        }

        Self::from_ranges(ranges).map_err(|e| Error::Protocol {
            message: format!("CLUSTER SLOTS: {e}"),
        })
    }
}

fn protocol(message: &str) -> Error {
    Error::Protocol {
        message: format!("CLUSTER SLOTS: {message}"),
    }
}

fn slot_number(frame: &Frame) -> Result<u16> {
    match frame {
        Frame::Integer(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        Frame::Integer(n) => Err(protocol(&format!("slot {n} out of range"))),
        _ => Err(protocol("slot bound must be an integer")),
    }
}

fn parse_node(frame: &Frame) -> Result<NodeInfo> {
    let Frame::Array(fields) = frame else {
        return Err(protocol("node info must be an array"));
    };
    if fields.len() < 2 {
        return Err(protocol("node info must have host and port"));
    }

    let host = fields[0]
        .as_text()
        .ok_or_else(|| protocol("node host must be a string"))?;
    let port = match &fields[1] {
        Frame::Integer(n) => *n,
        _ => return Err(protocol("node port must be an integer")),
    };

    let address = if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    };

    let id = match fields.get(2).and_then(Frame::as_text) {
        Some(id) if !id.is_empty() => NodeId::new(id),
        _ => NodeId::new(address.clone()),
    };

    Ok(NodeInfo { id, address })
}
