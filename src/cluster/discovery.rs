//! Topology discovery.
//!
//! The router never edits a topology. It reads the current snapshot from a
//! [`Discovery`] for every call and asks it for a refresh when a node
//! answers `MOVED`. [`SeedDiscovery`] is the built-in implementation: it
//! asks known nodes, then the configured seeds, for `CLUSTER SLOTS`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::topology::ClusterTopology;
use crate::core::command::cluster_slots;
use crate::core::transport::Transport;
use crate::{Error, Result};

/// Default time a single node gets to answer `CLUSTER SLOTS`.
pub const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_millis(100);

/// Source of topology snapshots.
pub trait Discovery: Send + Sync + 'static {
    /// The latest published snapshot.
    fn current_topology(&self) -> Arc<ClusterTopology>;

    /// Fetches a fresh topology, publishes it, and returns it.
    fn refresh_topology(&self) -> BoxFuture<'_, Result<Arc<ClusterTopology>>>;
}

impl<D: Discovery + ?Sized> Discovery for Arc<D> {
    fn current_topology(&self) -> Arc<ClusterTopology> {
        (**self).current_topology()
    }

    fn refresh_topology(&self) -> BoxFuture<'_, Result<Arc<ClusterTopology>>> {
        (**self).refresh_topology()
    }
}

/// Discovers the topology with `CLUSTER SLOTS` over the transport.
///
/// Snapshots are published through a watch channel, so a reader either
/// sees the previous map or the new one, never a mix. Concurrent refreshes
/// collapse into one round of requests.
pub struct SeedDiscovery {
    transport: Arc<dyn Transport>,
    seeds: Vec<String>,
    node_timeout: Duration,
    topology: watch::Sender<Arc<ClusterTopology>>,
    refresh_lock: Mutex<()>,
}

impl SeedDiscovery {
    /// Creates a discovery with an empty topology.
    ///
    /// Call [`Discovery::refresh_topology`] before routing anything.
    pub fn new(transport: Arc<dyn Transport>, seeds: Vec<String>) -> Self {
        let (topology, _) = watch::channel(Arc::new(ClusterTopology::new()));
        Self {
            transport,
            seeds,
            node_timeout: DEFAULT_NODE_TIMEOUT,
            topology,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Sets how long each node may take to answer before the next
    /// candidate is asked.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Per-node budget (default: 100ms)
    #[inline]
    pub fn node_timeout(mut self, timeout: Duration) -> Self {
        self.node_timeout = timeout;
        self
    }

    /// Subscribes to published snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<ClusterTopology>> {
        self.topology.subscribe()
    }

    /// Nodes of the current snapshot first, then seeds not already listed.
    fn candidates(&self) -> Vec<String> {
        let current = self.current_topology();
        let known = current.slot_ranges().iter().map(|range| &range.master.address);

        let mut candidates: Vec<String> = Vec::new();
        for address in known.chain(&self.seeds) {
            if !candidates.contains(address) {
                candidates.push(address.clone());
            }
        }
        candidates
    }

    async fn fetch(&self, address: &str) -> Result<ClusterTopology> {
        let request = self.transport.send(address, cluster_slots().into_frame());
        let reply = timeout(self.node_timeout, request)
            .await
            .map_err(|_| Error::Timeout {
                pending: vec![address.to_string()],
            })??;
        let topology = ClusterTopology::from_cluster_slots(reply)?;
        if topology.node_count() == 0 {
            return Err(Error::Protocol {
                message: format!("{address} reported no slot owners"),
            });
        }
        Ok(topology)
    }

    #[instrument(skip(self), level = "debug")]
    async fn refresh(&self) -> Result<Arc<ClusterTopology>> {
        let before = self.current_topology();
        let _guard = self.refresh_lock.lock().await;

        // Someone else refreshed while this call waited for the lock.
        let current = self.current_topology();
        if !Arc::ptr_eq(&before, &current) {
            debug!("reusing topology published by a concurrent refresh");
            return Ok(current);
        }

        let mut last_error = None;
        for address in self.candidates() {
            match self.fetch(&address).await {
                Ok(topology) => {
                    let topology = Arc::new(topology);
                    info!(
                        %address,
                        nodes = topology.node_count(),
                        ranges = topology.slot_ranges().len(),
                        "topology refreshed"
                    );
                    self.topology.send_replace(topology.clone());
                    return Ok(topology);
                }
                Err(e) => {
                    warn!(%address, error = ?e, "CLUSTER SLOTS failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::InvalidArgument {
            message: "no seed nodes configured".to_string(),
        }))
    }
}

impl Discovery for SeedDiscovery {
    fn current_topology(&self) -> Arc<ClusterTopology> {
        self.topology.borrow().clone()
    }

    fn refresh_topology(&self) -> BoxFuture<'_, Result<Arc<ClusterTopology>>> {
        self.refresh().boxed()
    }
}

impl std::fmt::Debug for SeedDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeedDiscovery")
            .field("seeds", &self.seeds)
            .field("node_timeout", &self.node_timeout)
            .field("topology", &*self.topology.borrow())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster;

    const NODES: [&str; 3] = ["127.0.0.1:7000", "127.0.0.1:7001", "127.0.0.1:7002"];

    fn discovery(mock: &Arc<MockCluster>, seeds: &[&str]) -> SeedDiscovery {
        SeedDiscovery::new(
            mock.clone(),
            seeds.iter().map(|s| s.to_string()).collect(),
        )
    }

    #[tokio::test]
    async fn test_starts_empty() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = discovery(&mock, &NODES[..1]);
        assert_eq!(discovery.current_topology().node_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_publishes_snapshot() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = discovery(&mock, &NODES[..1]);
        let mut rx = discovery.subscribe();

        let topology = discovery.refresh_topology().await.unwrap();
        assert_eq!(topology.node_count(), 3);
        assert!(topology.is_fully_covered());
        assert!(Arc::ptr_eq(&topology, &discovery.current_topology()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().node_count(), 3);
    }

    #[tokio::test]
    async fn test_refresh_skips_failed_seed() {
        let mock = Arc::new(MockCluster::new(&NODES));
        mock.fail_node(NODES[0]).await;
        let discovery = discovery(&mock, &NODES);

        let topology = discovery.refresh_topology().await.unwrap();
        assert_eq!(topology.node_count(), 3);

        let asked: Vec<String> = mock
            .requests()
            .await
            .into_iter()
            .filter(|r| r.args[0] == "CLUSTER")
            .map(|r| r.address)
            .collect();
        assert_eq!(asked, vec![NODES[1].to_string()]);
    }

    #[tokio::test]
    async fn test_refresh_prefers_known_nodes() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = discovery(&mock, &["127.0.0.1:9999"]);
        mock.add_node("127.0.0.1:9999").await;

        discovery.refresh_topology().await.unwrap();
        mock.clear_requests().await;
        discovery.refresh_topology().await.unwrap();

        let first = mock.requests().await.remove(0);
        assert_eq!(first.address, NODES[0]);
    }

    #[tokio::test]
    async fn test_refresh_sees_reassigned_slots() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = discovery(&mock, &NODES[..1]);
        let before = discovery.refresh_topology().await.unwrap();
        assert_eq!(before.master_for_slot(0).unwrap().address, NODES[0]);

        mock.reassign_slots(0..=99, NODES[2]).await;
        let after = discovery.refresh_topology().await.unwrap();

        assert_eq!(after.master_for_slot(0).unwrap().address, NODES[2]);
        assert_eq!(after.master_for_slot(100).unwrap().address, NODES[0]);
        // The old snapshot is untouched.
        assert_eq!(before.master_for_slot(0).unwrap().address, NODES[0]);
    }

    #[tokio::test]
    async fn test_refresh_fails_when_no_node_answers() {
        let mock = Arc::new(MockCluster::new(&NODES[..1]));
        mock.fail_node(NODES[0]).await;
        let discovery = discovery(&mock, &NODES[..1]);

        let result = discovery.refresh_topology().await;
        assert!(matches!(result, Err(Error::Transport { .. })));
        assert_eq!(discovery.current_topology().node_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_moves_past_hung_node() {
        let mock = Arc::new(MockCluster::new(&NODES));
        mock.delay_node(NODES[0], Duration::from_secs(60)).await;
        let discovery = discovery(&mock, &NODES).node_timeout(Duration::from_millis(20));

        let started = tokio::time::Instant::now();
        let topology = discovery.refresh_topology().await.unwrap();

        assert_eq!(topology.node_count(), 3);
        assert!(started.elapsed() < Duration::from_secs(1));
        let asked: Vec<String> = mock
            .requests()
            .await
            .into_iter()
            .map(|r| r.address)
            .collect();
        assert_eq!(asked, vec![NODES[0].to_string(), NODES[1].to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_reports_hung_node() {
        let mock = Arc::new(MockCluster::new(&NODES[..1]));
        mock.delay_node(NODES[0], Duration::from_secs(60)).await;
        let discovery = discovery(&mock, &NODES[..1]);

        match discovery.refresh_topology().await {
            Err(Error::Timeout { pending }) => assert_eq!(pending, vec![NODES[0]]),
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_refresh_without_seeds() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = discovery(&mock, &[]);
        assert!(matches!(
            discovery.refresh_topology().await,
            Err(Error::InvalidArgument { .. })
        ));
    }
}
