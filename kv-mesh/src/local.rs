//! In-process mesh: every node lives in this process and requests travel
//! over crossbeam channels.
//!
//! The registry of node mailboxes doubles as the membership source, which
//! makes this the transport of choice for tests and single-process demos.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::debug;

use crate::client::Client;
use crate::error::{MeshError, Result};
use crate::membership::{Membership, NodeId};
use crate::message::{Reply, Request};
use crate::runtime::{start_server, NodeConfig, NodeHandle};
use crate::transport::{await_reply, deliver_call, deliver_cast, Inbound, Transport};

#[derive(Default)]
struct Registry {
    mailboxes: RwLock<BTreeMap<NodeId, Sender<Inbound>>>,
    call_timeout: Option<Duration>,
}

/// Shared in-process registry of node mailboxes.
///
/// Clones refer to the same mesh.
#[derive(Clone, Default)]
pub struct LocalMesh {
    registry: Arc<Registry>,
}

impl LocalMesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mesh whose synchronous calls give up after `timeout`.
    pub fn with_call_timeout(timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Registry {
                call_timeout: Some(timeout),
                ..Registry::default()
            }),
        }
    }

    /// Membership as seen by `local`, or by an outside client when `None`.
    pub fn view(&self, local: Option<NodeId>) -> LocalView {
        LocalView {
            mesh: self.clone(),
            local,
        }
    }

    /// Registered node names in sorted order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.registry
            .mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Starts a node named `id` in this mesh.
    pub fn start_server(&self, id: impl Into<NodeId>) -> Result<NodeHandle> {
        let id = id.into();
        let membership = Arc::new(self.view(Some(id.clone())));
        start_server(NodeConfig::new(id), Arc::new(self.clone()), membership)
    }

    /// A client that spreads requests over every registered node.
    pub fn client(&self) -> Client {
        Client::new(Arc::new(self.view(None)), Arc::new(self.clone()))
    }

    fn mailbox(&self, to: &NodeId) -> Result<Sender<Inbound>> {
        self.registry
            .mailboxes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(to)
            .cloned()
            .ok_or_else(|| MeshError::PeerUnreachable(to.clone()))
    }
}

impl Transport for LocalMesh {
    fn send(&self, to: &NodeId, request: Request) -> Result<()> {
        deliver_cast(&self.mailbox(to)?, to, request)
    }

    fn call(&self, to: &NodeId, request: Request) -> Result<Reply> {
        let reply_rx = deliver_call(&self.mailbox(to)?, to, request)?;
        await_reply(reply_rx, to, self.registry.call_timeout)
    }

    fn spawn_remote(&self, target: &NodeId) -> Result<NodeId> {
        // The loop thread keeps running on its own; it exits on Stop.
        let handle = self.start_server(target.clone())?;
        Ok(handle.id().clone())
    }

    fn register(&self, id: &NodeId, mailbox: Sender<Inbound>) -> Result<()> {
        let mut mailboxes = self
            .registry
            .mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if mailboxes.contains_key(id) {
            return Err(MeshError::AlreadyRegistered(id.clone()));
        }
        mailboxes.insert(id.clone(), mailbox);
        debug!(node = %id, "registered");
        Ok(())
    }

    fn unregister(&self, id: &NodeId) {
        self.registry
            .mailboxes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        debug!(node = %id, "unregistered");
    }
}

/// Membership over a [`LocalMesh`], excluding the viewing node.
#[derive(Clone)]
pub struct LocalView {
    mesh: LocalMesh,
    local: Option<NodeId>,
}

impl Membership for LocalView {
    fn current_peers(&self) -> Vec<NodeId> {
        let mut peers = self.mesh.nodes();
        if let Some(local) = &self.local {
            peers.retain(|peer| peer != local);
        }
        peers
    }
}
