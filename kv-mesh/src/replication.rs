//! Write fan-out and snapshot bootstrap.

use tracing::debug;

use crate::error::{MeshError, Result};
use crate::membership::{random_peer, Membership};
use crate::message::{Reply, Request};
use crate::store::{Key, Store, Value};
use crate::transport::Transport;

/// Pushes one write to every peer currently in the mesh.
///
/// Sends are fire-and-forget: nothing is awaited and a failed send is only
/// logged. Returns the number of peers the write was addressed to.
pub fn replicate_item(
    membership: &dyn Membership,
    transport: &dyn Transport,
    key: &Key,
    value: &Value,
) -> usize {
    let peers = membership.current_peers();
    for peer in &peers {
        let request = Request::ReplicateItem {
            key: key.clone(),
            value: value.clone(),
        };
        if let Err(err) = transport.send(peer, request) {
            debug!(%peer, %key, error = %err, "replication send dropped");
        }
    }
    peers.len()
}

/// Computes the initial store of a starting node.
///
/// With no peers the node starts empty. Otherwise one peer is picked at
/// random and its full snapshot is adopted as-is. Blocks until that peer
/// replies (or the transport's call timeout expires).
pub fn bootstrap(membership: &dyn Membership, transport: &dyn Transport) -> Result<Store> {
    let Some(peer) = random_peer(membership) else {
        debug!("no peers to bootstrap from, starting empty");
        return Ok(Store::new());
    };

    match transport.call(&peer, Request::SendSnapshot)? {
        Reply::Snapshot(store) => {
            debug!(%peer, entries = store.len(), "bootstrapped from snapshot");
            Ok(store)
        }
        other => Err(MeshError::UnexpectedReply {
            peer,
            expected: "snapshot",
            got: other.kind(),
        }),
    }
}
