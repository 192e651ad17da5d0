//! Peer identity and the view of who is currently in the mesh.
//!
//! Components never cache membership: every fan-out, bootstrap and client
//! call asks its [`Membership`] for a fresh peer list.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Name of a reachable node.
///
/// In-process meshes use free-form names; TCP hosts use their `ip:port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for NodeId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

/// Source of the live peer set.
pub trait Membership: Send + Sync {
    /// Peers reachable right now. Never includes the asking node itself.
    fn current_peers(&self) -> Vec<NodeId>;
}

impl Membership for Vec<NodeId> {
    fn current_peers(&self) -> Vec<NodeId> {
        self.clone()
    }
}

/// Picks one peer uniformly at random from a single membership read.
///
/// Returns `None` when there are no peers.
pub fn random_peer(membership: &dyn Membership) -> Option<NodeId> {
    let mut peers = membership.current_peers();
    if peers.is_empty() {
        return None;
    }
    let idx = rand::thread_rng().gen_range(0..peers.len());
    Some(peers.swap_remove(idx))
}

/// What one host last said about itself: its name and whether it runs a server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerStatus {
    pub id: NodeId,
    pub serving: bool,
}

/// Shared set of hosts that have joined this host's mesh.
///
/// Every member carries a serving flag. Only serving members are offered as
/// peers, so requests and bootstraps never land on a host without a server.
/// Clones share the same underlying set.
#[derive(Debug, Clone)]
pub struct PeerSet {
    local: NodeId,
    members: Arc<RwLock<BTreeMap<NodeId, bool>>>,
}

impl PeerSet {
    pub fn new(local: NodeId) -> Self {
        Self {
            local,
            members: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    pub fn local(&self) -> &NodeId {
        &self.local
    }

    /// Adds a peer that is not known to serve yet. Returns `false` if it was
    /// already known or is the local host.
    pub fn insert(&self, peer: NodeId) -> bool {
        if peer == self.local {
            return false;
        }
        let mut members = self.members.write().unwrap_or_else(PoisonError::into_inner);
        if members.contains_key(&peer) {
            return false;
        }
        members.insert(peer, false);
        true
    }

    /// Records whether `peer` runs a server, adding it if it is new.
    pub fn set_serving(&self, peer: NodeId, serving: bool) {
        if peer == self.local {
            return;
        }
        self.members
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, serving);
    }

    pub fn contains(&self, peer: &NodeId) -> bool {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(peer)
    }

    /// Every known member except the local host, sorted by name.
    pub fn statuses(&self) -> Vec<PeerStatus> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, serving)| PeerStatus {
                id: id.clone(),
                serving: *serving,
            })
            .collect()
    }
}

impl Membership for PeerSet {
    fn current_peers(&self) -> Vec<NodeId> {
        self.members
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, serving)| **serving)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn ids(names: &[&str]) -> Vec<NodeId> {
        names.iter().copied().map(NodeId::from).collect()
    }

    #[test]
    fn test_random_peer_empty() {
        let none: Vec<NodeId> = Vec::new();
        assert_eq!(random_peer(&none), None);
    }

    #[test]
    fn test_random_peer_single() {
        let one = ids(&["a"]);
        for _ in 0..10 {
            assert_eq!(random_peer(&one), Some(NodeId::from("a")));
        }
    }

    #[test]
    fn test_random_peer_covers_all_members() {
        let peers = ids(&["a", "b", "c"]);
        let mut seen = HashSet::new();
        for _ in 0..500 {
            let peer = random_peer(&peers).unwrap();
            assert!(peers.contains(&peer));
            seen.insert(peer);
        }
        assert_eq!(seen.len(), 3, "every peer should be chosen eventually");
    }

    #[test]
    fn test_peer_set_excludes_local() {
        let set = PeerSet::new(NodeId::from("self"));
        assert!(!set.insert(NodeId::from("self")));
        assert!(set.insert(NodeId::from("b")));
        assert!(!set.insert(NodeId::from("b")));
        set.set_serving(NodeId::from("b"), true);
        set.set_serving(NodeId::from("self"), true);

        assert_eq!(set.current_peers(), ids(&["b"]));
        assert_eq!(set.statuses().len(), 1);
    }

    #[test]
    fn test_peer_set_offers_only_serving_members() {
        let set = PeerSet::new(NodeId::from("a"));
        set.insert(NodeId::from("shell"));
        set.set_serving(NodeId::from("server"), true);

        assert!(set.contains(&NodeId::from("shell")));
        assert_eq!(set.current_peers(), ids(&["server"]));
        for _ in 0..50 {
            assert_eq!(random_peer(&set), Some(NodeId::from("server")));
        }

        set.set_serving(NodeId::from("server"), false);
        assert!(set.current_peers().is_empty());
        assert_eq!(random_peer(&set), None);
    }

    #[test]
    fn test_insert_keeps_known_serving_flag() {
        let set = PeerSet::new(NodeId::from("a"));
        set.set_serving(NodeId::from("b"), true);
        assert!(!set.insert(NodeId::from("b")));
        assert_eq!(
            set.statuses(),
            vec![PeerStatus {
                id: NodeId::from("b"),
                serving: true
            }]
        );
    }

    #[test]
    fn test_peer_set_clones_share_members() {
        let set = PeerSet::new(NodeId::from("a"));
        let shared = set.clone();
        set.set_serving(NodeId::from("b"), true);

        assert!(shared.contains(&NodeId::from("b")));
        assert_eq!(shared.local(), &NodeId::from("a"));
        assert_eq!(shared.current_peers(), ids(&["b"]));
    }
}
