//! The transport seam.
//!
//! Sockets, TLS, authentication and reconnection live behind this trait.
//! The router only hands it a node address and a request frame.

use futures::future::BoxFuture;

use crate::proto::frame::Frame;
use crate::Result;

/// Delivers request frames to store nodes.
///
/// Implementations return the node's reply frame, including error
/// replies (`-MOVED ...`, `-ERR ...`), which the router interprets.
/// Connection-level failures are reported as
/// [`Error::Transport`](crate::Error::Transport).
pub trait Transport: Send + Sync + 'static {
    /// Sends `frame` to the node at `address` and returns its reply.
    fn send<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>>;

    /// Sends `ASKING` followed by `frame` on the same connection to the
    /// node at `address`, returning the reply to `frame`.
    fn send_asking<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn send<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>> {
        (**self).send(address, frame)
    }

    fn send_asking<'a>(&'a self, address: &'a str, frame: Frame) -> BoxFuture<'a, Result<Frame>> {
        (**self).send_asking(address, frame)
    }
}
