use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for shardmux operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the command routing layer.
///
/// Every variant carries enough detail (keys, shards, addresses) for a
/// caller to decide whether and where to retry.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid argument provided. Raised before anything is sent.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// The transport failed to deliver a request or read its reply.
    #[error("transport error at {address}: {source}")]
    Transport {
        /// Address of the node the request was sent to.
        address: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The reply did not have the shape the command promises.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// The store rejected the command.
    #[error("server error: {kind} {message}")]
    Server {
        /// Error kind, the first token of the error reply (e.g. `ERR`, `WRONGTYPE`).
        kind: String,
        /// Remainder of the error reply.
        message: String,
    },

    /// A slot kept redirecting after the topology was refreshed.
    #[error("slot {slot} redirected to {address} after retries were exhausted")]
    Redirection {
        /// The slot number (0-16383).
        slot: u16,
        /// The address named by the last redirect.
        address: String,
    },

    /// No node in the topology serves the slot, even after a refresh.
    #[error("no node serves slot {slot}")]
    Unroutable {
        /// The slot number (0-16383).
        slot: u16,
    },

    /// The per-call deadline expired before every shard answered.
    #[error("request timed out waiting for {}", pending.join(", "))]
    Timeout {
        /// Addresses of the shards that had not answered.
        pending: Vec<String>,
    },

    /// The per-call deadline expired while the topology was being
    /// refreshed. Every shard asked so far had answered.
    #[error("request timed out waiting for a topology refresh")]
    RefreshTimeout,

    /// A multi-shard command succeeded on some shards and failed on others.
    #[error("partial failure: {} of the sub-requests failed", failures.len())]
    PartialFailure {
        /// Aggregated count from the shards that succeeded (DEL/EXISTS only).
        count: Option<i64>,
        /// One entry per failed sub-request.
        failures: Vec<ShardFailure>,
    },
}

impl Error {
    /// Builds a [`Error::Server`] from a raw error reply, splitting off the kind.
    pub fn from_server_reply(reply: &[u8]) -> Self {
        let text = String::from_utf8_lossy(reply);
        let text = text.trim();
        match text.split_once(' ') {
            Some((kind, message)) => Error::Server {
                kind: kind.to_string(),
                message: message.trim_start().to_string(),
            },
            None => Error::Server {
                kind: text.to_string(),
                message: String::new(),
            },
        }
    }

    /// Returns true if this error came from the store rejecting a command.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Server { .. })
    }

    /// Returns the keys that were not applied, for [`Error::PartialFailure`].
    pub fn failed_keys(&self) -> Vec<&str> {
        match self {
            Error::PartialFailure { failures, .. } => failures
                .iter()
                .flat_map(|f| f.keys.iter().map(String::as_str))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A sub-request of a multi-shard command that did not succeed.
#[derive(Debug)]
pub struct ShardFailure {
    /// Address of the shard the sub-request was sent to.
    pub address: String,
    /// Keys carried by the failed sub-request, in input order.
    pub keys: Vec<String>,
    /// Why it failed.
    pub error: Box<Error>,
}

impl fmt::Display for ShardFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]: {}", self.address, self.keys.join(", "), self.error)
    }
}
