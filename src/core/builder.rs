use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::transport::Transport;
use crate::cluster::router::{
    Router, RoutingConfig, DEFAULT_MAX_REDIRECTS, DEFAULT_REQUEST_TIMEOUT,
};
use crate::cluster::{Discovery, SeedDiscovery};
use crate::{Client, Error, Result};

const DEFAULT_PORT: u16 = 6379;

/// Builder for configuring and creating a [`Client`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use shardmux::ClientBuilder;
///
/// let builder = ClientBuilder::new()
///     .addresses(["redis://10.0.0.1:7000", "10.0.0.2:7000"])
///     .cluster_mode(true)
///     .request_timeout(Duration::from_millis(500))
///     .max_redirects(2);
/// # let _ = builder;
/// ```
#[derive(Default)]
pub struct ClientBuilder {
    addresses: Vec<String>,
    cluster_mode: bool,
    request_timeout: Option<Duration>,
    max_redirects: Option<usize>,
    discovery: Option<Arc<dyn Discovery>>,
}

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node address.
    ///
    /// # Arguments
    ///
    /// * `address` - `host:port`, or `redis://host:port`
    #[inline]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.addresses.push(address.into());
        self
    }

    /// Adds several node addresses. In cluster mode these are the seeds
    /// asked for the topology.
    #[inline]
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
        self
    }

    /// Routes commands by hash slot across a cluster instead of sending
    /// everything to the first address.
    #[inline]
    pub fn cluster_mode(mut self, enabled: bool) -> Self {
        self.cluster_mode = enabled;
        self
    }

    /// Sets the deadline for a whole call, retries included.
    ///
    /// # Arguments
    ///
    /// * `timeout` - Maximum time a call may take (default: 250ms)
    #[inline]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets how many redirect rounds a call may go through.
    ///
    /// # Arguments
    ///
    /// * `max` - Retry rounds after MOVED, ASK, TRYAGAIN or an unreachable node (default: 1)
    #[inline]
    pub fn max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Uses a custom topology source instead of `CLUSTER SLOTS` on the seeds.
    #[inline]
    pub fn discovery(mut self, discovery: impl Discovery) -> Self {
        self.discovery = Some(Arc::new(discovery));
        self
    }

    /// Builds the [`Client`] on top of `transport`.
    ///
    /// In cluster mode the initial topology is discovered here unless a
    /// custom discovery already has one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if no address is set, an address
    /// is malformed, or the timeout is zero. In cluster mode any error from
    /// the initial discovery is returned as is.
    pub async fn build(self, transport: impl Transport) -> Result<Client> {
        let config = RoutingConfig {
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            max_redirects: self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS),
        };
        if config.request_timeout.is_zero() {
            return Err(Error::InvalidArgument {
                message: "request timeout must be greater than zero".to_string(),
            });
        }

        let mut addresses: Vec<String> = Vec::with_capacity(self.addresses.len());
        for address in &self.addresses {
            let address = normalize_address(address)?;
            if !addresses.contains(&address) {
                addresses.push(address);
            }
        }

        let transport: Arc<dyn Transport> = Arc::new(transport);

        if !self.cluster_mode {
            let address = addresses.into_iter().next().ok_or_else(|| Error::InvalidArgument {
                message: "address is required".to_string(),
            })?;
            debug!(%address, "standalone client");
            return Ok(Client::new(Router::standalone(transport, address, config)));
        }

        let discovery = match self.discovery {
            Some(discovery) => discovery,
            None if addresses.is_empty() => {
                return Err(Error::InvalidArgument {
                    message: "at least one seed address is required".to_string(),
                })
            }
            None => Arc::new(
                SeedDiscovery::new(transport.clone(), addresses)
                    .node_timeout(config.request_timeout / 4),
            ),
        };

        if discovery.current_topology().node_count() == 0 {
            discovery.refresh_topology().await?;
        }
        debug!(
            nodes = discovery.current_topology().node_count(),
            "cluster client"
        );

        Ok(Client::new(Router::cluster(transport, discovery, config)))
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("addresses", &self.addresses)
            .field("cluster_mode", &self.cluster_mode)
            .field("request_timeout", &self.request_timeout)
            .field("max_redirects", &self.max_redirects)
            .field("custom_discovery", &self.discovery.is_some())
            .finish()
    }
}

/// Validates an address and reduces it to the `host:port` form transports
/// are given.
fn normalize_address(address: &str) -> Result<String> {
    let address = address.trim();
    let invalid = |reason: &str| Error::InvalidArgument {
        message: format!("invalid address {address:?}: {reason}"),
    };

    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("redis://{address}")
    };
    let parsed = url::Url::parse(&with_scheme).map_err(|e| invalid(&e.to_string()))?;

    let scheme = parsed.scheme();
    if scheme != "redis" && scheme != "rediss" {
        return Err(invalid("expected redis:// or rediss://"));
    }

    let host = parsed
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| invalid("missing host"))?;
    let port = parsed.port().unwrap_or(DEFAULT_PORT);

    Ok(format!("{host}:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCluster;

    const NODES: [&str; 3] = ["127.0.0.1:7000", "127.0.0.1:7001", "127.0.0.1:7002"];

    #[test]
    fn test_builder_new() {
        let builder = ClientBuilder::new();
        assert!(builder.addresses.is_empty());
        assert!(!builder.cluster_mode);
        assert!(builder.request_timeout.is_none());
    }

    #[test]
    fn test_builder_chaining() {
        let builder = ClientBuilder::new()
            .address("127.0.0.1:7000")
            .addresses(["127.0.0.1:7001", "127.0.0.1:7002"])
            .cluster_mode(true)
            .request_timeout(Duration::from_secs(1))
            .max_redirects(3);

        assert_eq!(builder.addresses.len(), 3);
        assert!(builder.cluster_mode);
        assert_eq!(builder.request_timeout, Some(Duration::from_secs(1)));
        assert_eq!(builder.max_redirects, Some(3));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("127.0.0.1:7000").unwrap(), "127.0.0.1:7000");
        assert_eq!(normalize_address("redis://localhost:7001").unwrap(), "localhost:7001");
        assert_eq!(normalize_address("rediss://cache.local").unwrap(), "cache.local:6379");
        assert_eq!(normalize_address(" localhost ").unwrap(), "localhost:6379");
        assert_eq!(normalize_address("[::1]:7000").unwrap(), "[::1]:7000");
    }

    #[test]
    fn test_normalize_address_rejects_garbage() {
        assert!(matches!(
            normalize_address("http://localhost:7000"),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(normalize_address("localhost:notaport").is_err());
        assert!(normalize_address("").is_err());
    }

    #[tokio::test]
    async fn test_build_without_address() {
        let result = ClientBuilder::new().build(MockCluster::new(&NODES)).await;
        match result {
            Err(Error::InvalidArgument { message }) => {
                assert_eq!(message, "address is required");
            }
            other => panic!("expected InvalidArgument error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_build_cluster_without_seeds() {
        let result = ClientBuilder::new()
            .cluster_mode(true)
            .build(MockCluster::new(&NODES))
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_build_rejects_zero_timeout() {
        let result = ClientBuilder::new()
            .address(NODES[0])
            .request_timeout(Duration::ZERO)
            .build(MockCluster::new(&NODES))
            .await;
        assert!(matches!(result, Err(Error::InvalidArgument { .. })));
    }

    #[tokio::test]
    async fn test_build_cluster_discovers_topology() {
        let client = ClientBuilder::new()
            .addresses(["redis://127.0.0.1:7001"])
            .cluster_mode(true)
            .build(MockCluster::new(&NODES))
            .await
            .unwrap();

        assert!(client.is_cluster());
        assert_eq!(client.topology().node_count(), 3);
        assert!(client.topology().is_fully_covered());
    }

    #[tokio::test]
    async fn test_build_cluster_with_unreachable_seeds() {
        let mock = MockCluster::new(&NODES);
        for node in NODES {
            mock.fail_node(node).await;
        }
        let result = ClientBuilder::new()
            .addresses(NODES)
            .cluster_mode(true)
            .build(mock)
            .await;
        assert!(matches!(result, Err(Error::Transport { .. })));
    }

    #[tokio::test]
    async fn test_build_with_custom_discovery() {
        let mock = Arc::new(MockCluster::new(&NODES));
        let discovery = SeedDiscovery::new(mock.clone(), vec![NODES[2].to_string()]);
        discovery.refresh_topology().await.unwrap();
        mock.clear_requests().await;

        let client = ClientBuilder::new()
            .cluster_mode(true)
            .discovery(discovery)
            .build(mock.clone())
            .await
            .unwrap();

        assert_eq!(client.topology().node_count(), 3);
        // The populated discovery is reused without another CLUSTER SLOTS.
        assert!(mock.requests().await.is_empty());
    }
}
