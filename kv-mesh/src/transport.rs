//! Delivery of requests to node mailboxes.
//!
//! A node server loop reads [`Inbound`] messages from a crossbeam channel.
//! Each inbound message carries its own reply handle, so the loop never has
//! to correlate replies with callers. Implementations of [`Transport`] decide
//! how a request reaches the right mailbox: [`crate::local::LocalMesh`] hands
//! it over in-process, [`crate::tcp::TcpHost`] ships it to another process.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use crate::error::{MeshError, Result};
use crate::membership::NodeId;
use crate::message::{Reply, Request};

/// A request waiting in a node's mailbox.
pub struct Inbound {
    pub request: Request,
    /// One-shot reply slot. `None` for fire-and-forget deliveries.
    pub reply_to: Option<Sender<Reply>>,
}

impl Inbound {
    pub fn cast(request: Request) -> Self {
        Self {
            request,
            reply_to: None,
        }
    }

    /// Builds a request together with the receiver its reply will arrive on.
    pub fn call(request: Request) -> (Self, Receiver<Reply>) {
        let (reply_tx, reply_rx) = bounded(1);
        let inbound = Self {
            request,
            reply_to: Some(reply_tx),
        };
        (inbound, reply_rx)
    }
}

/// Moves requests between nodes.
pub trait Transport: Send + Sync {
    /// Delivers `request` without waiting for it to be processed.
    fn send(&self, to: &NodeId, request: Request) -> Result<()>;

    /// Delivers `request` and blocks until the receiving loop replies.
    fn call(&self, to: &NodeId, request: Request) -> Result<Reply>;

    /// Starts a node server on `target` and returns its identity.
    fn spawn_remote(&self, target: &NodeId) -> Result<NodeId>;

    /// Binds a mailbox to the well-known name `id`.
    fn register(&self, id: &NodeId, mailbox: Sender<Inbound>) -> Result<()>;

    fn unregister(&self, id: &NodeId);
}

/// Pushes a request into a mailbox and returns the pending reply.
pub(crate) fn deliver_call(
    mailbox: &Sender<Inbound>,
    to: &NodeId,
    request: Request,
) -> Result<Receiver<Reply>> {
    let (inbound, reply_rx) = Inbound::call(request);
    mailbox
        .send(inbound)
        .map_err(|_| MeshError::PeerUnreachable(to.clone()))?;
    Ok(reply_rx)
}

pub(crate) fn deliver_cast(mailbox: &Sender<Inbound>, to: &NodeId, request: Request) -> Result<()> {
    mailbox
        .send(Inbound::cast(request))
        .map_err(|_| MeshError::PeerUnreachable(to.clone()))
}

/// Waits on a pending reply.
///
/// Without a timeout this blocks until the loop answers or drops the request.
pub(crate) fn await_reply(
    reply_rx: Receiver<Reply>,
    from: &NodeId,
    timeout: Option<Duration>,
) -> Result<Reply> {
    match timeout {
        None => reply_rx
            .recv()
            .map_err(|_| MeshError::PeerUnreachable(from.clone())),
        Some(timeout) => reply_rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => MeshError::Timeout(from.clone()),
            RecvTimeoutError::Disconnected => MeshError::PeerUnreachable(from.clone()),
        }),
    }
}
