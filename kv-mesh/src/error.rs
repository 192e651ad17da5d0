//! Errors returned by mesh operations.
//!
//! Failures a caller can act on get their own variant. Codec and socket errors
//! are wrapped as they come.

use std::io;

use thiserror::Error;

use crate::membership::NodeId;

/// Errors surfaced by synchronous mesh operations.
///
/// A missing key is not an error: `fetch` reports it as `Ok(None)`.
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("no peers available")]
    NoPeersAvailable,

    #[error("peer {0} is unreachable")]
    PeerUnreachable(NodeId),

    #[error("timed out waiting for a reply from {0}")]
    Timeout(NodeId),

    #[error("unexpected reply from {peer}: expected {expected}, got {got}")]
    UnexpectedReply {
        peer: NodeId,
        expected: &'static str,
        got: &'static str,
    },

    #[error("peer {peer} refused the request: {reason}")]
    Refused { peer: NodeId, reason: String },

    #[error("a server named {0} is already registered")]
    AlreadyRegistered(NodeId),

    #[error("wire codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;
