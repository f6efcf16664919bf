//! Command routing.
//!
//! A call becomes one sub-request per hash slot (cluster mode) or a single
//! request (standalone mode). Sub-requests run concurrently under one
//! deadline, redirects are followed a bounded number of times, and the
//! per-sub-request outcomes are merged in one sequential pass.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, instrument, warn};

use super::discovery::Discovery;
use super::errors::Redirect;
use super::slot::key_slot;
use super::topology::ClusterTopology;
use crate::core::command::Cmd;
use crate::core::transport::Transport;
use crate::proto::frame::Frame;
use crate::{Error, Result, ShardFailure};

/// Default bound on a whole call, retries included.
pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(250);

/// Default number of redirect rounds: retry once.
pub(crate) const DEFAULT_MAX_REDIRECTS: usize = 1;

/// Builds the command carrying a group of entries.
pub(crate) type BuildFn<'a> = dyn Fn(&[Entry]) -> Cmd + Sync + 'a;

/// One key of a call and its position in the caller's input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub index: usize,
    pub key: String,
    pub value: Option<String>,
}

impl Entry {
    pub fn key(index: usize, key: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
            value: None,
        }
    }

    pub fn pair(index: usize, key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            index,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

#[derive(Debug)]
struct SubRequest {
    /// `None` in standalone mode, where one request carries every slot.
    slot: Option<u16>,
    address: String,
    asking: bool,
    /// Owner named by the last `MOVED` reply, if any.
    moved_to: Option<String>,
    entries: Vec<Entry>,
}

impl SubRequest {
    fn finish<T>(self, result: Result<T>) -> Outcome<T> {
        Outcome {
            address: self.address,
            entries: self.entries,
            result,
        }
    }
}

/// The final result of one sub-request, after any retries.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    pub address: String,
    pub entries: Vec<Entry>,
    pub result: Result<T>,
}

impl<T> Outcome<T> {
    fn first_index(&self) -> usize {
        self.entries.first().map_or(usize::MAX, |entry| entry.index)
    }

    /// Normalizes a successful result; errors pass through.
    pub fn map<U>(self, f: impl FnOnce(T, &[Entry]) -> Result<U>) -> Outcome<U> {
        let Outcome {
            address,
            entries,
            result,
        } = self;
        let result = result.and_then(|value| f(value, &entries));
        Outcome {
            address,
            entries,
            result,
        }
    }
}

/// What to do with a sub-request after its reply arrived.
enum Next {
    Done(Result<Frame>),
    Moved { slot: u16, address: String },
    Ask { slot: u16, address: String },
    TryAgain(Frame),
    Unreachable(Error),
}

/// Routing limits.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RoutingConfig {
    pub request_timeout: Duration,
    pub max_redirects: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

enum Mode {
    Standalone {
        address: String,
        topology: Arc<ClusterTopology>,
    },
    Cluster {
        discovery: Arc<dyn Discovery>,
    },
}

/// Splits calls into sub-requests and drives them to completion.
pub(crate) struct Router {
    transport: Arc<dyn Transport>,
    mode: Mode,
    config: RoutingConfig,
}

impl Router {
    /// Routes every request to a single node.
    pub fn standalone(
        transport: Arc<dyn Transport>,
        address: String,
        config: RoutingConfig,
    ) -> Self {
        let topology = Arc::new(ClusterTopology::single_node(address.clone()));
        Self {
            transport,
            mode: Mode::Standalone { address, topology },
            config,
        }
    }

    /// Routes by slot using snapshots from `discovery`.
    pub fn cluster(
        transport: Arc<dyn Transport>,
        discovery: Arc<dyn Discovery>,
        config: RoutingConfig,
    ) -> Self {
        Self {
            transport,
            mode: Mode::Cluster { discovery },
            config,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self.mode, Mode::Cluster { .. })
    }

    pub fn topology(&self) -> Arc<ClusterTopology> {
        match &self.mode {
            Mode::Standalone { topology, .. } => topology.clone(),
            Mode::Cluster { discovery } => discovery.current_topology(),
        }
    }

    pub async fn refresh_topology(&self) -> Result<Arc<ClusterTopology>> {
        match &self.mode {
            Mode::Standalone { topology, .. } => Ok(topology.clone()),
            Mode::Cluster { discovery } => discovery.refresh_topology().await,
        }
    }

    /// Runs `entries` through the cluster and returns one outcome per
    /// sub-request, in no particular order.
    ///
    /// Fails as a whole only for an empty key list, an unroutable slot, or
    /// an expired deadline. Everything else is reported per outcome.
    #[instrument(skip(self, entries, build), fields(keys = entries.len()), level = "debug")]
    pub async fn execute(
        &self,
        command: &'static str,
        entries: Vec<Entry>,
        build: &BuildFn<'_>,
    ) -> Result<Vec<Outcome<Frame>>> {
        if entries.is_empty() {
            return Err(Error::InvalidArgument {
                message: format!("{command} requires at least one key"),
            });
        }

        let deadline = Instant::now() + self.config.request_timeout;
        let mut outcomes = Vec::new();

        let mut round = match &self.mode {
            Mode::Standalone { address, .. } => vec![SubRequest {
                slot: None,
                address: address.clone(),
                asking: false,
                moved_to: None,
                entries,
            }],
            Mode::Cluster { discovery } => {
                let topology = self.covering_snapshot(discovery, &entries, deadline).await?;
                split_by_slot(entries, &topology)?
            }
        };

        let mut attempt = 0;
        while !round.is_empty() {
            let retry = attempt < self.config.max_redirects;
            let mut next = Vec::new();
            let mut moved = Vec::new();

            for (sub, reply) in self.dispatch(round, build, deadline).await? {
                match (self.classify(reply), retry) {
                    (Next::Done(result), _) => outcomes.push(sub.finish(result)),
                    (Next::Moved { slot, address }, true) => {
                        warn!(slot, from = %sub.address, to = %address, "MOVED");
                        moved.push(SubRequest {
                            moved_to: Some(address),
                            ..sub
                        });
                    }
                    (Next::Ask { slot, address }, true) => {
                        debug!(slot, from = %sub.address, to = %address, "ASK");
                        next.push(SubRequest {
                            address,
                            asking: true,
                            moved_to: None,
                            ..sub
                        });
                    }
                    (Next::TryAgain(_), true) => {
                        debug!(slot = ?sub.slot, address = %sub.address, "TRYAGAIN");
                        next.push(sub);
                    }
                    (Next::Unreachable(error), true) => {
                        warn!(address = %sub.address, error = ?error, "node unreachable");
                        moved.push(sub);
                    }
                    (Next::Moved { slot, address } | Next::Ask { slot, address }, false) => {
                        outcomes.push(sub.finish(Err(Error::Redirection { slot, address })));
                    }
                    (Next::TryAgain(reply), false) => outcomes.push(sub.finish(Ok(reply))),
                    (Next::Unreachable(error), false) => outcomes.push(sub.finish(Err(error))),
                }
            }

            // Only cluster mode classifies replies as MOVED or unreachable.
            if let (Mode::Cluster { discovery }, false) = (&self.mode, moved.is_empty()) {
                let topology = self.refresh(discovery, deadline).await?;
                for sub in moved {
                    match reroute(sub, &topology) {
                        Ok(sub) => next.push(sub),
                        Err(outcome) => outcomes.push(outcome),
                    }
                }
            }

            round = next;
            attempt += 1;
        }

        Ok(outcomes)
    }

    /// Sends a round of sub-requests concurrently and waits for all of
    /// them, or for the deadline.
    async fn dispatch(
        &self,
        round: Vec<SubRequest>,
        build: &BuildFn<'_>,
        deadline: Instant,
    ) -> Result<Vec<(SubRequest, Result<Frame>)>> {
        let transport = &self.transport;
        let mut pending = HashMap::with_capacity(round.len());
        let mut in_flight = FuturesUnordered::new();

        for (id, sub) in round.into_iter().enumerate() {
            let frame = build(&sub.entries).into_frame();
            debug!(
                address = %sub.address,
                slot = ?sub.slot,
                keys = sub.entries.len(),
                asking = sub.asking,
                "dispatching sub-request"
            );
            pending.insert(id, sub.address.clone());
            in_flight.push(async move {
                let reply = if sub.asking {
                    transport.send_asking(&sub.address, frame).await
                } else {
                    transport.send(&sub.address, frame).await
                };
                (id, sub, reply)
            });
        }

        let mut replies = Vec::with_capacity(pending.len());
        loop {
            match timeout_at(deadline, in_flight.next()).await {
                Ok(Some((id, sub, reply))) => {
                    pending.remove(&id);
                    replies.push((sub, reply));
                }
                Ok(None) => return Ok(replies),
                Err(_) => {
                    let pending = sorted_unique(pending.into_values());
                    warn!(?pending, "deadline expired");
                    return Err(Error::Timeout { pending });
                }
            }
        }
    }

    fn classify(&self, reply: Result<Frame>) -> Next {
        if !self.is_cluster() {
            return Next::Done(reply);
        }
        match reply {
            Ok(Frame::Error(message)) => match Redirect::parse(&message) {
                Some(Redirect::Moved { slot, address }) => Next::Moved { slot, address },
                Some(Redirect::Ask { slot, address }) => Next::Ask { slot, address },
                Some(Redirect::TryAgain) => Next::TryAgain(Frame::Error(message)),
                None => Next::Done(Ok(Frame::Error(message))),
            },
            Err(error @ Error::Transport { .. }) => Next::Unreachable(error),
            other => Next::Done(other),
        }
    }

    /// The current snapshot, refreshed first if it leaves a key unowned.
    async fn covering_snapshot(
        &self,
        discovery: &Arc<dyn Discovery>,
        entries: &[Entry],
        deadline: Instant,
    ) -> Result<Arc<ClusterTopology>> {
        let topology = discovery.current_topology();
        let covered = entries
            .iter()
            .all(|entry| topology.master_for_slot(key_slot(&entry.key)).is_some());
        if covered {
            return Ok(topology);
        }
        debug!("snapshot leaves keys unowned, refreshing");
        self.refresh(discovery, deadline).await
    }

    /// Refreshes within the deadline. A failed refresh falls back to the
    /// current snapshot so the retry still happens.
    async fn refresh(
        &self,
        discovery: &Arc<dyn Discovery>,
        deadline: Instant,
    ) -> Result<Arc<ClusterTopology>> {
        match timeout_at(deadline, discovery.refresh_topology()).await {
            Ok(Ok(topology)) => Ok(topology),
            Ok(Err(error)) => {
                warn!(error = ?error, "topology refresh failed, keeping current snapshot");
                Ok(discovery.current_topology())
            }
            Err(_) => {
                warn!("deadline expired during topology refresh");
                Err(Error::RefreshTimeout)
            }
        }
    }
}

/// Groups entries by slot, one sub-request per slot, ordered by owning
/// node and then by slot.
fn split_by_slot(entries: Vec<Entry>, topology: &ClusterTopology) -> Result<Vec<SubRequest>> {
    let mut groups: BTreeMap<u16, Vec<Entry>> = BTreeMap::new();
    for entry in entries {
        groups.entry(key_slot(&entry.key)).or_default().push(entry);
    }

    let mut round = Vec::with_capacity(groups.len());
    for (slot, entries) in groups {
        let master = topology
            .master_for_slot(slot)
            .ok_or(Error::Unroutable { slot })?;
        round.push(SubRequest {
            slot: Some(slot),
            address: master.address.clone(),
            asking: false,
            moved_to: None,
            entries,
        });
    }
    round.sort_by(|a, b| a.address.cmp(&b.address));
    Ok(round)
}

/// Points a redirected sub-request at its slot's owner in `topology`.
///
/// A snapshot that still names the redirecting node, or owns no node for
/// the slot, is stale: the owner from the `MOVED` reply wins.
fn reroute(
    sub: SubRequest,
    topology: &ClusterTopology,
) -> std::result::Result<SubRequest, Outcome<Frame>> {
    let Some(slot) = sub.slot else {
        return Ok(sub);
    };
    let owner = topology
        .master_for_slot(slot)
        .map(|master| master.address.as_str())
        .filter(|owner| sub.moved_to.is_none() || *owner != sub.address);
    let address = match owner {
        Some(owner) => owner.to_string(),
        None => match sub.moved_to.clone() {
            Some(moved_to) => moved_to,
            None => return Err(sub.finish(Err(Error::Unroutable { slot }))),
        },
    };
    Ok(SubRequest {
        address,
        asking: false,
        moved_to: None,
        ..sub
    })
}

fn sorted_unique(addresses: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut addresses: Vec<String> = addresses.into_iter().collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Returns the result of a single-key call.
pub(crate) fn merge_single<T>(outcomes: Vec<Outcome<T>>) -> Result<T> {
    outcomes
        .into_iter()
        .next()
        .map(|outcome| outcome.result)
        .unwrap_or_else(|| {
            Err(Error::Protocol {
                message: "no reply for single-key command".to_string(),
            })
        })
}

/// Scatters per-slot value lists back into input order.
///
/// Values are all-or-nothing: the failure holding the earliest key wins.
pub(crate) fn merge_values(
    outcomes: Vec<Outcome<Vec<Option<String>>>>,
    len: usize,
) -> Result<Vec<Option<String>>> {
    let mut values = vec![None; len];
    let mut first_error: Option<(usize, Error)> = None;

    for outcome in outcomes {
        let first = outcome.first_index();
        match outcome.result {
            Ok(found) => {
                for (entry, value) in outcome.entries.iter().zip(found) {
                    values[entry.index] = value;
                }
            }
            Err(error) => {
                if first_error.as_ref().map_or(true, |(index, _)| first < *index) {
                    first_error = Some((first, error));
                }
            }
        }
    }

    match first_error {
        Some((_, error)) => Err(error),
        None => Ok(values),
    }
}

/// Sums per-slot counts (DEL, EXISTS).
pub(crate) fn merge_counts(outcomes: Vec<Outcome<i64>>) -> Result<i64> {
    let (counts, failures) = settle(outcomes)?;
    let count = counts.into_iter().sum();
    if failures.is_empty() {
        Ok(count)
    } else {
        Err(Error::PartialFailure {
            count: Some(count),
            failures,
        })
    }
}

/// Requires every sub-request to succeed (MSET).
pub(crate) fn merge_unit(outcomes: Vec<Outcome<()>>) -> Result<()> {
    let (_, failures) = settle(outcomes)?;
    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::PartialFailure {
            count: None,
            failures,
        })
    }
}

/// Separates successes from failures. With no success at all there is
/// nothing partial to report, so the error holding the earliest key is
/// returned as is.
fn settle<T>(outcomes: Vec<Outcome<T>>) -> Result<(Vec<T>, Vec<ShardFailure>)> {
    let mut values = Vec::with_capacity(outcomes.len());
    let mut failed = Vec::new();

    for outcome in outcomes {
        let first = outcome.first_index();
        let Outcome {
            address,
            entries,
            result,
        } = outcome;
        match result {
            Ok(value) => values.push(value),
            Err(error) => failed.push((
                first,
                ShardFailure {
                    address,
                    keys: entries.into_iter().map(|entry| entry.key).collect(),
                    error: Box::new(error),
                },
            )),
        }
    }

    failed.sort_by_key(|(first, _)| *first);
    let failures: Vec<ShardFailure> = failed.into_iter().map(|(_, failure)| failure).collect();

    if values.is_empty() {
        return Err(failures
            .into_iter()
            .next()
            .map(|failure| *failure.error)
            .unwrap_or_else(|| Error::Protocol {
                message: "no sub-request completed".to_string(),
            }));
    }

    Ok((values, failures))
}
