//! Node lifecycle: registering, bootstrapping and spawning a server loop.
//!
//! Every node runs on its own named thread. Callers talk to it only through
//! the [`Transport`] it registered with, never through shared state.

use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use tracing::{info, warn};

use crate::error::Result;
use crate::membership::{Membership, NodeId};
use crate::node::NodeServer;
use crate::replication::bootstrap;
use crate::store::Store;
use crate::transport::Transport;

/// Configuration for starting a node server.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Well-known name the node registers under.
    pub id: NodeId,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self { id: id.into() }
    }
}

/// Handle to a running node server thread.
pub struct NodeHandle {
    id: NodeId,
    thread: thread::JoinHandle<Store>,
}

impl NodeHandle {
    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Waits for the loop to exit and returns its final store.
    pub fn join(self) -> Option<Store> {
        match self.thread.join() {
            Ok(store) => Some(store),
            Err(_) => {
                warn!(node = %self.id, "node server thread panicked");
                None
            }
        }
    }
}

/// Starts a node server.
///
/// The mailbox is registered first so writes replicated to this node while
/// it bootstraps queue up behind the snapshot. Bootstrap then runs on the
/// calling thread and blocks until the chosen peer answers. Only after the
/// initial store is known does the serving loop start on its own thread.
///
/// # Errors
///
/// - The name is already registered with `transport`
/// - Bootstrapping from the chosen peer fails
/// - The server thread cannot be spawned
pub fn start_server(
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    membership: Arc<dyn Membership>,
) -> Result<NodeHandle> {
    let NodeConfig { id } = config;
    let (mailbox_tx, mailbox_rx) = unbounded();
    transport.register(&id, mailbox_tx)?;

    let store = match bootstrap(membership.as_ref(), transport.as_ref()) {
        Ok(store) => store,
        Err(err) => {
            transport.unregister(&id);
            return Err(err);
        }
    };
    info!(node = %id, entries = store.len(), "node bootstrapped");

    let server = NodeServer::new(id.clone(), store, mailbox_rx, membership, transport.clone());
    let spawned = thread::Builder::new()
        .name(format!("kv-node-{id}"))
        .spawn(move || server.run());

    match spawned {
        Ok(thread) => Ok(NodeHandle { id, thread }),
        Err(err) => {
            transport.unregister(&id);
            Err(err.into())
        }
    }
}
