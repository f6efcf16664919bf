//! # Core
//!
//! The typed command surface and everything a command passes through
//! before and after routing.
//!
//! ## Modules
//!
//! - [`builder`] - Client configuration
//! - [`command`] - Command builders
//! - [`options`] - SET options and their encoding
//! - [`reply`] - Reply normalization
//! - [`transport`] - The seam to real connections

use std::fmt;
use std::sync::Arc;

use crate::cluster::router::{
    merge_counts, merge_single, merge_unit, merge_values, Entry, Router,
};
use crate::cluster::ClusterTopology;

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
pub mod options;
pub mod reply;
pub mod transport;

pub use crate::proto::error::{Error, Result, ShardFailure};
use options::SetOptions;
use reply::SetStatus;

/// Client for a standalone node or a sharded cluster.
///
/// Multi-key commands are split per hash slot in cluster mode and the
/// replies merged back, so callers see one result in input order either
/// way. Clones share the transport and the topology.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "test-utils")]
/// # async fn example() -> shardmux::Result<()> {
/// use shardmux::testing::MockCluster;
/// use shardmux::{ClientBuilder, SetOptions, SetStatus};
///
/// let nodes = ["127.0.0.1:7000", "127.0.0.1:7001"];
/// let client = ClientBuilder::new()
///     .addresses(nodes)
///     .cluster_mode(true)
///     .build(MockCluster::new(&nodes))
///     .await?;
///
/// client.mset(&[("a", "1"), ("b", "2")]).await?;
/// assert_eq!(
///     client.mget(&["a", "b", "missing"]).await?,
///     vec![Some("1".to_string()), Some("2".to_string()), None]
/// );
///
/// let nx = SetOptions::new().only_if_does_not_exist();
/// assert_eq!(client.set_with_options("a", "9", &nx).await?, SetStatus::NotSet);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    router: Arc<Router>,
}

impl Client {
    pub(crate) fn new(router: Router) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    /// Returns true if commands are routed by slot.
    pub fn is_cluster(&self) -> bool {
        self.router.is_cluster()
    }

    /// The topology snapshot commands are currently routed with.
    ///
    /// In standalone mode this is a single node owning every slot.
    pub fn topology(&self) -> Arc<ClusterTopology> {
        self.router.topology()
    }

    /// Asks discovery for a fresh topology. A no-op in standalone mode.
    pub async fn refresh_topology(&self) -> Result<()> {
        self.router.refresh_topology().await.map(|_| ())
    }

    /// Sets the string value of a key.
    pub async fn set(&self, key: &str, value: &str) -> Result<SetStatus> {
        self.set_with_options(key, value, &SetOptions::default())
            .await
    }

    /// Sets the string value of a key with conditions, expiry, or the
    /// previous value returned.
    ///
    /// # Returns
    ///
    /// - [`SetStatus::Ok`] when stored
    /// - [`SetStatus::NotSet`] when the condition did not hold
    /// - [`SetStatus::OldValue`] when `return_old_value` was requested
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an expiry the store cannot represent;
    /// nothing is sent in that case.
    pub async fn set_with_options(
        &self,
        key: &str,
        value: &str,
        options: &SetOptions,
    ) -> Result<SetStatus> {
        let cmd = command::set_with_options(key.to_owned(), value.to_owned(), options)?;
        let outcomes = self
            .router
            .execute("SET", vec![Entry::pair(0, key, value)], &|_| cmd.clone())
            .await?;
        merge_single(outcomes)
            .and_then(|frame| reply::set(frame, options.return_old_value))
    }

    /// Gets the value of a key. `None` if the key does not exist.
    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let cmd = command::get(key.to_owned());
        let outcomes = self
            .router
            .execute("GET", vec![Entry::key(0, key)], &|_| cmd.clone())
            .await?;
        merge_single(outcomes).and_then(reply::get)
    }

    /// Sets several keys. In cluster mode each slot is written separately,
    /// so the write is not atomic across slots.
    ///
    /// # Errors
    ///
    /// [`Error::PartialFailure`] names the keys that were not written when
    /// some slots failed and others succeeded.
    pub async fn mset<K: AsRef<str>, V: AsRef<str>>(&self, pairs: &[(K, V)]) -> Result<()> {
        let entries = pairs
            .iter()
            .enumerate()
            .map(|(index, (key, value))| Entry::pair(index, key.as_ref(), value.as_ref()))
            .collect();
        let outcomes = self
            .router
            .execute("MSET", entries, &|entries| {
                command::mset(
                    entries
                        .iter()
                        .map(|entry| (entry.key.as_str(), entry.value_str())),
                )
            })
            .await?;
        merge_unit(
            outcomes
                .into_iter()
                .map(|outcome| outcome.map(|frame, _| reply::mset(frame)))
                .collect(),
        )
    }

    /// Gets several keys, in the order given.
    pub async fn mget<K: AsRef<str>>(&self, keys: &[K]) -> Result<Vec<Option<String>>> {
        let outcomes = self
            .router
            .execute("MGET", key_entries(keys), &|entries| {
                command::mget(entries.iter().map(|entry| entry.key.as_str()))
            })
            .await?;
        merge_values(
            outcomes
                .into_iter()
                .map(|outcome| outcome.map(|frame, entries| reply::mget(frame, entries.len())))
                .collect(),
            keys.len(),
        )
    }

    /// Deletes keys and returns how many existed.
    pub async fn del<K: AsRef<str>>(&self, keys: &[K]) -> Result<i64> {
        self.count("DEL", keys, |entries| {
            command::del(entries.iter().map(|entry| entry.key.as_str()))
        })
        .await
    }

    /// Counts how many of the keys exist. A key given twice counts twice.
    pub async fn exists<K: AsRef<str>>(&self, keys: &[K]) -> Result<i64> {
        self.count("EXISTS", keys, |entries| {
            command::exists(entries.iter().map(|entry| entry.key.as_str()))
        })
        .await
    }

    async fn count<K: AsRef<str>>(
        &self,
        name: &'static str,
        keys: &[K],
        build: impl Fn(&[Entry]) -> command::Cmd + Sync,
    ) -> Result<i64> {
        let outcomes = self.router.execute(name, key_entries(keys), &build).await?;
        merge_counts(
            outcomes
                .into_iter()
                .map(|outcome| outcome.map(|frame, _| reply::integer(name, frame)))
                .collect(),
        )
    }
}

fn key_entries<K: AsRef<str>>(keys: &[K]) -> Vec<Entry> {
    keys.iter()
        .enumerate()
        .map(|(index, key)| Entry::key(index, key.as_ref()))
        .collect()
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("cluster", &self.is_cluster())
            .field("nodes", &self.topology().node_count())
            .finish()
    }
}
