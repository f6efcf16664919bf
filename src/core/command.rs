use bytes::Bytes;

use super::options::SetOptions;
use crate::proto::frame::Frame;
use crate::Result;

/// A command ready to be sent to the store.
///
/// Commands are built with the builder pattern and converted to frames
/// for transmission. A `Cmd` is cheap to clone so a sub-request can be
/// resent after a redirect.
///
/// # Example
///
/// ```
/// use shardmux::command::{get, Cmd};
///
/// let cmd = Cmd::new("SET").arg("key").arg("value");
/// assert_eq!(cmd.name(), b"SET");
/// assert_eq!(get("key").args().len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name (e.g. "GET", "SET", "DEL").
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Returns the command name.
    #[inline]
    pub fn name(&self) -> &[u8] {
        &self.args[0]
    }

    /// Returns every argument including the command name.
    #[inline]
    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(self.args.into_iter().map(Frame::BulkString).collect())
    }
}

/// Creates a GET command.
#[inline]
pub fn get(key: impl Into<Bytes>) -> Cmd {
    Cmd::new("GET").arg(key)
}

/// Creates a plain SET command.
#[inline]
pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Cmd {
    Cmd::new("SET").arg(key).arg(value)
}

/// Creates a SET command carrying `options`.
///
/// # Errors
///
/// See [`SetOptions::encode`].
#[inline]
pub fn set_with_options(
    key: impl Into<Bytes>,
    value: impl Into<Bytes>,
    options: &SetOptions,
) -> Result<Cmd> {
    options.encode(key, value)
}

fn with_keys<K: AsRef<str>>(name: &'static str, keys: impl IntoIterator<Item = K>) -> Cmd {
    keys.into_iter().fold(Cmd::new(name), |cmd, key| {
        cmd.arg(Bytes::copy_from_slice(key.as_ref().as_bytes()))
    })
}

/// Creates a MGET command.
pub fn mget<K: AsRef<str>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    with_keys("MGET", keys)
}

/// Creates a MSET command.
pub fn mset<K: AsRef<str>, V: AsRef<str>>(pairs: impl IntoIterator<Item = (K, V)>) -> Cmd {
    pairs.into_iter().fold(Cmd::new("MSET"), |cmd, (key, value)| {
        cmd.arg(Bytes::copy_from_slice(key.as_ref().as_bytes()))
            .arg(Bytes::copy_from_slice(value.as_ref().as_bytes()))
    })
}

/// Creates a DEL command.
pub fn del<K: AsRef<str>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    with_keys("DEL", keys)
}

/// Creates an EXISTS command.
pub fn exists<K: AsRef<str>>(keys: impl IntoIterator<Item = K>) -> Cmd {
    with_keys("EXISTS", keys)
}

/// Creates a CLUSTER SLOTS command.
///
/// The reply maps slot ranges to their master and replica nodes and is
/// the input of `ClusterTopology::from_cluster_slots`.
#[inline]
pub fn cluster_slots() -> Cmd {
    Cmd::new("CLUSTER").arg("SLOTS")
}

/// Creates an ASKING command.
///
/// Sent immediately before a command that received an ASK redirect so
/// the importing node accepts it. It only affects the next command on
/// the same connection.
#[inline]
pub fn asking() -> Cmd {
    Cmd::new("ASKING")
}
