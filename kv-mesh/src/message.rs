//! Requests and replies exchanged with a node server loop.
//!
//! [`Request`] and [`Reply`] are the logical protocol. [`Frame`] and
//! [`FrameReply`] wrap them for the TCP transport, together with the host
//! control messages used to join a mesh and start servers remotely.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::membership::{NodeId, PeerStatus};
use crate::store::{Key, Store, Value};

/// Messages a node server loop understands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Client write. Stored locally, then fanned out to every peer.
    Store { key: Key, value: Value },
    /// Write pushed by another node. Never answered.
    ReplicateItem { key: Key, value: Value },
    Retrieve { key: Key },
    SendSnapshot,
    Stop,
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Request::Store { .. } => "store",
            Request::ReplicateItem { .. } => "replicate_item",
            Request::Retrieve { .. } => "retrieve",
            Request::SendSnapshot => "send_snapshot",
            Request::Stop => "stop",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reply {
    Ok,
    /// `None` means the key was not found.
    Value(Option<Value>),
    Snapshot(Store),
    Stopped,
}

impl Reply {
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Ok => "ok",
            Reply::Value(_) => "value",
            Reply::Snapshot(_) => "snapshot",
            Reply::Stopped => "stopped",
        }
    }
}

/// Unit of transfer between TCP hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Fire-and-forget delivery to the host's server.
    Cast(Request),
    /// Delivery that expects a [`FrameReply::Reply`] on the same stream.
    Call(Request),
    /// Start a server on the receiving host.
    StartServer,
    /// Announce `from` and the members it already knows.
    Join {
        from: PeerStatus,
        known: Vec<PeerStatus>,
    },
    /// The sending host started or stopped its server.
    Status(PeerStatus),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameReply {
    Reply(Reply),
    Started(NodeId),
    /// The replying host's view of the mesh, itself included.
    Peers(Vec<PeerStatus>),
    Ack,
    Refused(String),
}

impl FrameReply {
    pub fn kind(&self) -> &'static str {
        match self {
            FrameReply::Reply(reply) => reply.kind(),
            FrameReply::Started(_) => "started",
            FrameReply::Peers(_) => "peers",
            FrameReply::Ack => "ack",
            FrameReply::Refused(_) => "refused",
        }
    }
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

impl FrameReply {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
