//! Test utilities.
//!
//! [`MockCluster`] is an in-memory store implementing [`Transport`]. Every
//! request and reply goes through the RESP [`Encoder`] and [`Decoder`], and
//! each node enforces slot ownership the way a real cluster node does:
//! `MOVED` for slots it does not own, `ASK` for slots being migrated away,
//! `CROSSSLOT` for multi-key commands spanning slots.
//!
//! Faults can be injected per node: unreachable, slow, or answering every
//! command with an error.
//!
//! Enabled with the `test-utils` feature.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::ops::RangeInclusive;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::cluster::{key_slot, SLOT_COUNT};
use crate::proto::codec::{Decoder, Encoder};
use crate::proto::frame::Frame;
use crate::{Error, Result, Transport};

/// A request a node received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    /// Address of the node.
    pub address: String,
    /// Command name and arguments, lossily decoded as UTF-8.
    pub args: Vec<String>,
    /// Whether the request was preceded by `ASKING`.
    pub asking: bool,
}

#[derive(Debug)]
struct Node {
    id: String,
    failed: bool,
    delay: Option<Duration>,
    error_reply: Option<String>,
}

#[derive(Debug)]
struct State {
    cluster_enabled: bool,
    nodes: BTreeMap<String, Node>,
    /// Owner address per slot.
    owners: Vec<String>,
    /// Slot to importing node, for slots mid-migration.
    migrating: HashMap<u16, String>,
    data: HashMap<Bytes, Bytes>,
    requests: Vec<MockRequest>,
}

/// An in-memory cluster speaking RESP.
///
/// Key expiry options are validated but not enforced.
///
/// # Example
///
/// ```
/// use shardmux::testing::MockCluster;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mock = MockCluster::new(&["127.0.0.1:7000", "127.0.0.1:7001"]);
/// assert_eq!(mock.owner_of("foo").await, "127.0.0.1:7001");
/// # }
/// ```
#[derive(Debug)]
pub struct MockCluster {
    state: Mutex<State>,
}

impl MockCluster {
    /// Creates a cluster whose nodes own equal, contiguous slot ranges in
    /// the order given.
    pub fn new(addresses: &[&str]) -> Self {
        let owners = (0..SLOT_COUNT as usize)
            .map(|slot| {
                addresses
                    .get(slot * addresses.len() / SLOT_COUNT as usize)
                    .map_or_else(String::new, |address| address.to_string())
            })
            .collect();
        Self::with_owners(true, addresses, owners)
    }

    /// Creates a single node with cluster support disabled. It accepts
    /// multi-key commands across slots and rejects `CLUSTER SLOTS`.
    pub fn standalone(address: &str) -> Self {
        let owners = vec![address.to_string(); SLOT_COUNT as usize];
        Self::with_owners(false, &[address], owners)
    }

    fn with_owners(cluster_enabled: bool, addresses: &[&str], owners: Vec<String>) -> Self {
        let mut state = State {
            cluster_enabled,
            nodes: BTreeMap::new(),
            owners,
            migrating: HashMap::new(),
            data: HashMap::new(),
            requests: Vec::new(),
        };
        for address in addresses {
            state.add_node(address);
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Adds a node owning no slots.
    pub async fn add_node(&self, address: &str) {
        self.state.lock().await.add_node(address);
    }

    /// Makes a node unreachable: requests fail with a transport error.
    pub async fn fail_node(&self, address: &str) {
        self.with_node(address, |node| node.failed = true).await;
    }

    /// Delays every reply from a node.
    pub async fn delay_node(&self, address: &str, delay: Duration) {
        self.with_node(address, |node| node.delay = Some(delay)).await;
    }

    /// Makes a node answer every command with the error reply `reply`,
    /// e.g. `"ERR internal failure"`.
    pub async fn break_node(&self, address: &str, reply: &str) {
        let reply = reply.to_string();
        self.with_node(address, |node| node.error_reply = Some(reply))
            .await;
    }

    /// Clears every fault injected into a node.
    pub async fn restore_node(&self, address: &str) {
        self.with_node(address, |node| {
            node.failed = false;
            node.delay = None;
            node.error_reply = None;
        })
        .await;
    }

    async fn with_node(&self, address: &str, f: impl FnOnce(&mut Node)) {
        let mut state = self.state.lock().await;
        if let Some(node) = state.nodes.get_mut(address) {
            f(node);
        }
    }

    /// Moves slots to `address`. Nodes that owned them answer `MOVED`
    /// from now on; clients keep their old snapshot until they refresh.
    pub async fn reassign_slots(&self, slots: RangeInclusive<u16>, address: &str) {
        let mut state = self.state.lock().await;
        state.add_node(address);
        for slot in slots {
            if let Some(owner) = state.owners.get_mut(slot as usize) {
                *owner = address.to_string();
            }
            state.migrating.remove(&slot);
        }
    }

    /// Starts migrating `slot` to `target`. The owner answers `ASK` and
    /// `target` serves the slot to requests preceded by `ASKING`.
    pub async fn migrate_slot(&self, slot: u16, target: &str) {
        let mut state = self.state.lock().await;
        state.add_node(target);
        state.migrating.insert(slot, target.to_string());
    }

    /// Address of the node owning the key's slot.
    pub async fn owner_of(&self, key: &str) -> String {
        let state = self.state.lock().await;
        state.owners[key_slot(key) as usize].clone()
    }

    /// Reads a value directly, bypassing routing.
    pub async fn value(&self, key: &str) -> Option<String> {
        let state = self.state.lock().await;
        state
            .data
            .get(key.as_bytes())
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    /// Writes a value directly, bypassing routing.
    pub async fn insert(&self, key: &str, value: &str) {
        let mut state = self.state.lock().await;
        state.data.insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(value.as_bytes()),
        );
    }

    /// Requests delivered so far, in arrival order.
    pub async fn requests(&self) -> Vec<MockRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Requests delivered to one node.
    pub async fn requests_to(&self, address: &str) -> Vec<MockRequest> {
        self.requests()
            .await
            .into_iter()
            .filter(|request| request.address == address)
            .collect()
    }

    /// Forgets the request log.
    pub async fn clear_requests(&self) {
        self.state.lock().await.requests.clear();
    }

    async fn handle(&self, address: &str, frame: Frame, asking: bool) -> Result<Frame> {
        let request = round_trip(&frame)?;

        let (delay, reply) = {
            let mut state = self.state.lock().await;
            let (delay, error_reply) = match state.nodes.get(address) {
                None => return Err(refused(address, "unknown node")),
                Some(node) if node.failed => return Err(refused(address, "node is down")),
                Some(node) => (node.delay, node.error_reply.clone()),
            };

            let args = match request_args(request) {
                Ok(args) => args,
                Err(reply) => return Ok(reply),
            };
            state.requests.push(MockRequest {
                address: address.to_string(),
                args: args
                    .iter()
                    .map(|arg| String::from_utf8_lossy(arg).into_owned())
                    .collect(),
                asking,
            });

            let reply = match error_reply {
                Some(reply) => Frame::Error(reply.into_bytes()),
                None => state.execute(address, &args, asking),
            };
            (delay, reply)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        round_trip(&reply)
    }
}

impl Transport for MockCluster {
    fn send<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>> {
        self.handle(address, frame, false).boxed()
    }

    fn send_asking<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>> {
        self.handle(address, frame, true).boxed()
    }
}

impl State {
    fn add_node(&mut self, address: &str) {
        let id = format!("{:040x}", self.nodes.len() + 1);
        self.nodes.entry(address.to_string()).or_insert(Node {
            id,
            failed: false,
            delay: None,
            error_reply: None,
        });
    }

    fn execute(&mut self, address: &str, args: &[Bytes], asking: bool) -> Frame {
        let Some(name) = args.first() else {
            return error("ERR empty command");
        };
        let name = String::from_utf8_lossy(name).to_ascii_uppercase();
        let lower = name.to_ascii_lowercase();

        let keys: Vec<&Bytes> = match name.as_str() {
            "GET" if args.len() == 2 => vec![&args[1]],
            "SET" if args.len() >= 3 => vec![&args[1]],
            "MGET" | "DEL" | "EXISTS" if args.len() >= 2 => args[1..].iter().collect(),
            "MSET" if args.len() >= 3 && args.len() % 2 == 1 => {
                args[1..].iter().step_by(2).collect()
            }
            "GET" | "SET" | "MGET" | "DEL" | "EXISTS" | "MSET" => {
                return error(&format!("ERR wrong number of arguments for '{lower}' command"));
            }
            "ASKING" => return ok(),
            "CLUSTER" => return self.cluster(args),
            _ => return error(&format!("ERR unknown command '{lower}'")),
        };

        if self.cluster_enabled {
            if let Some(redirect) = self.check_ownership(address, &keys, asking) {
                return redirect;
            }
        }

        match name.as_str() {
            "GET" => self.lookup(&args[1]),
            "SET" => self.set(&args[1], &args[2], &args[3..]),
            "MGET" => Frame::Array(
                keys.iter().map(|key| self.lookup(key)).collect(),
            ),
            "MSET" => {
                for pair in args[1..].chunks(2) {
                    self.data.insert(pair[0].clone(), pair[1].clone());
                }
                ok()
            }
            "DEL" => Frame::Integer(
                keys.iter()
                    .filter(|key| self.data.remove(**key).is_some())
                    .count() as i64,
            ),
            _ => Frame::Integer(
                keys.iter()
                    .filter(|key| self.data.contains_key(**key))
                    .count() as i64,
            ),
        }
    }

    fn lookup(&self, key: &Bytes) -> Frame {
        self.data
            .get(key)
            .cloned()
            .map_or(Frame::Null, Frame::BulkString)
    }

    fn check_ownership(&self, address: &str, keys: &[&Bytes], asking: bool) -> Option<Frame> {
        let slot = key_slot(keys.first()?);
        if keys.iter().any(|key| key_slot(key) != slot) {
            return Some(error("CROSSSLOT Keys in request don't hash to the same slot"));
        }

        let owner = &self.owners[slot as usize];
        if let Some(target) = self.migrating.get(&slot) {
            if asking && target == address {
                return None;
            }
            if owner == address {
                return Some(error(&format!("ASK {slot} {target}")));
            }
        }
        if owner != address {
            return Some(error(&format!("MOVED {slot} {owner}")));
        }
        None
    }

    fn set(&mut self, key: &Bytes, value: &Bytes, options: &[Bytes]) -> Frame {
        let (mut nx, mut xx, mut get, mut expiry) = (false, false, false, false);
        let mut tokens = options.iter();
        while let Some(token) = tokens.next() {
            match String::from_utf8_lossy(token).to_ascii_uppercase().as_str() {
                "NX" if !xx => nx = true,
                "XX" if !nx => xx = true,
                "GET" => get = true,
                "KEEPTTL" if !expiry => expiry = true,
                "EX" | "PX" | "EXAT" | "PXAT" if !expiry => {
                    expiry = true;
                    let Some(count) = tokens.next() else {
                        return error("ERR syntax error");
                    };
                    match std::str::from_utf8(count).ok().and_then(|n| n.parse::<i64>().ok()) {
                        Some(n) if n > 0 => {}
                        Some(_) => return error("ERR invalid expire time in 'set' command"),
                        None => return error("ERR value is not an integer or out of range"),
                    }
                }
                _ => return error("ERR syntax error"),
            }
        }

        let old = self.data.get(key).cloned();
        let apply = !(nx && old.is_some()) && !(xx && old.is_none());
        if apply {
            self.data.insert(key.clone(), value.clone());
        }
        match (get, apply) {
            (true, _) => old.map_or(Frame::Null, Frame::BulkString),
            (false, true) => ok(),
            (false, false) => Frame::Null,
        }
    }

    fn cluster(&self, args: &[Bytes]) -> Frame {
        let is_slots = args.len() == 2 && args[1].eq_ignore_ascii_case(b"SLOTS");
        if !is_slots {
            return error("ERR unknown subcommand");
        }
        if !self.cluster_enabled {
            return error("ERR This instance has cluster support disabled");
        }

        let mut entries = Vec::new();
        let mut start = 0usize;
        while start < self.owners.len() {
            let owner = &self.owners[start];
            let mut end = start;
            while end + 1 < self.owners.len() && &self.owners[end + 1] == owner {
                end += 1;
            }
            if let Some(node) = self.nodes.get(owner) {
                let (host, port) = owner.rsplit_once(':').unwrap_or((owner.as_str(), "0"));
                let host = host.trim_start_matches('[').trim_end_matches(']');
                entries.push(Frame::Array(vec![
                    Frame::Integer(start as i64),
                    Frame::Integer(end as i64),
                    Frame::Array(vec![
                        Frame::BulkString(Bytes::copy_from_slice(host.as_bytes())),
                        Frame::Integer(port.parse().unwrap_or(0)),
                        Frame::BulkString(Bytes::copy_from_slice(node.id.as_bytes())),
                    ]),
                ]));
            }
            start = end + 1;
        }
        Frame::Array(entries)
    }
}

/// Encodes and decodes a frame, as if it crossed the wire.
fn round_trip(frame: &Frame) -> Result<Frame> {
    let mut encoder = Encoder::new();
    encoder.encode(frame);
    let mut decoder = Decoder::new();
    decoder.append(&encoder.take());
    decoder.decode()?.ok_or_else(|| Error::Protocol {
        message: "incomplete frame".to_string(),
    })
}

/// Splits a request into its bulk-string arguments, or the error reply a
/// node gives for a malformed request.
fn request_args(request: Frame) -> std::result::Result<Vec<Bytes>, Frame> {
    let Frame::Array(items) = request else {
        return Err(error("ERR Protocol error: expected array"));
    };
    items
        .into_iter()
        .map(|item| match item {
            Frame::BulkString(arg) => Ok(arg),
            _ => Err(error("ERR Protocol error: expected bulk string")),
        })
        .collect()
}

fn refused(address: &str, reason: &str) -> Error {
    Error::Transport {
        address: address.to_string(),
        source: io::Error::new(io::ErrorKind::ConnectionRefused, reason.to_string()),
    }
}

fn ok() -> Frame {
    Frame::SimpleString(b"OK".to_vec())
}

fn error(message: &str) -> Frame {
    Frame::Error(message.as_bytes().to_vec())
}
