//! Blocking client façade over a mesh.
//!
//! Each call picks a peer at random from a fresh membership read, sends one
//! request and waits for exactly one reply. There are no retries: if the
//! chosen peer never answers, the call blocks until the transport's call
//! timeout (if any) expires.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{MeshError, Result};
use crate::membership::{random_peer, Membership, NodeId};
use crate::message::{Reply, Request};
use crate::store::{Key, Store, Value};
use crate::transport::Transport;

#[derive(Clone)]
pub struct Client {
    membership: Arc<dyn Membership>,
    transport: Arc<dyn Transport>,
}

impl Client {
    pub fn new(membership: Arc<dyn Membership>, transport: Arc<dyn Transport>) -> Self {
        Self {
            membership,
            transport,
        }
    }

    /// Stores `key = value` on a random node, which replicates it to the rest.
    ///
    /// Returns once that node has stored the value locally. Replication to
    /// the other nodes is not awaited.
    pub fn add(&self, key: impl Into<Key>, value: impl Into<Value>) -> Result<NodeId> {
        let node = self.pick()?;
        self.add_on(&node, key, value)?;
        Ok(node)
    }

    /// Reads `key` from a random node. `Ok(None)` means the key was not found.
    pub fn fetch(&self, key: impl Into<Key>) -> Result<Option<Value>> {
        let node = self.pick()?;
        self.fetch_from(&node, key)
    }

    /// Stores `key = value` on a specific node.
    pub fn add_on(&self, node: &NodeId, key: impl Into<Key>, value: impl Into<Value>) -> Result<()> {
        let request = Request::Store {
            key: key.into(),
            value: value.into(),
        };
        match self.transport.call(node, request)? {
            Reply::Ok => Ok(()),
            other => Err(unexpected(node, "ok", &other)),
        }
    }

    /// Reads `key` from a specific node.
    pub fn fetch_from(&self, node: &NodeId, key: impl Into<Key>) -> Result<Option<Value>> {
        let request = Request::Retrieve { key: key.into() };
        match self.transport.call(node, request)? {
            Reply::Value(value) => Ok(value),
            other => Err(unexpected(node, "value", &other)),
        }
    }

    /// Full copy of one node's store.
    pub fn snapshot(&self, node: &NodeId) -> Result<Store> {
        match self.transport.call(node, Request::SendSnapshot)? {
            Reply::Snapshot(store) => Ok(store),
            other => Err(unexpected(node, "snapshot", &other)),
        }
    }

    /// Starts a node server on `target`.
    pub fn bring_up_node(&self, target: &NodeId) -> Result<NodeId> {
        let node = self.transport.spawn_remote(target)?;
        debug!(%node, "brought up node");
        Ok(node)
    }

    /// Sends `Stop` to every known node and returns those that acknowledged.
    ///
    /// Nodes that cannot be reached are skipped.
    pub fn stop_mesh(&self) -> Vec<NodeId> {
        let mut stopped = Vec::new();
        for node in self.membership.current_peers() {
            match self.transport.call(&node, Request::Stop) {
                Ok(Reply::Stopped) => stopped.push(node),
                Ok(other) => warn!(%node, reply = other.kind(), "unexpected reply to stop"),
                Err(err) => warn!(%node, error = %err, "failed to stop node"),
            }
        }
        stopped
    }

    pub fn peers(&self) -> Vec<NodeId> {
        self.membership.current_peers()
    }

    fn pick(&self) -> Result<NodeId> {
        random_peer(self.membership.as_ref()).ok_or(MeshError::NoPeersAvailable)
    }
}

fn unexpected(peer: &NodeId, expected: &'static str, got: &Reply) -> MeshError {
    MeshError::UnexpectedReply {
        peer: peer.clone(),
        expected,
        got: got.kind(),
    }
}
