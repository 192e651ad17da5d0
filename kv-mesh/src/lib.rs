//! Fully replicated, eventually consistent key-value mesh.
//!
//! Every node keeps the whole data set in memory. A write lands on one node,
//! which stores it and pushes it to every peer it currently knows about. A
//! node joining later copies the full store of a random peer before it starts
//! serving. Clients spread load by sending each request to a random node.
//!
//! There is no durability, no quorum and no conflict resolution: the last
//! write to arrive at a node wins there.
//!
//! # Architecture
//!
//! - **Node thread**: runs [`node::NodeServer`], the only code touching its store
//! - **Transport**: moves requests into node mailboxes, either in-process
//!   ([`local::LocalMesh`]) or between processes ([`tcp::TcpHost`])
//! - **Caller threads**: block on a one-shot reply channel per request
//!
//! Communication uses crossbeam channels, so a node's state is never shared
//! and never locked.
//!
//! # Modules
//!
//! - [`store`]: ordered in-memory key-value storage
//! - [`node`]: the node server loop
//! - [`replication`]: write fan-out and snapshot bootstrap
//! - [`membership`]: node identity and peer sets
//! - [`transport`]: the delivery abstraction and reply rendezvous
//! - [`runtime`]: starting node servers
//! - [`client`]: random-peer `add`/`fetch` façade and mesh lifecycle calls
//! - [`local`], [`tcp`]: transports
//! - [`message`]: requests, replies and wire frames
//! - [`protocol`], [`cli`]: REPL and command-line parsing

pub mod cli;
pub mod client;
pub mod error;
pub mod local;
pub mod membership;
pub mod message;
pub mod node;
pub mod protocol;
pub mod replication;
pub mod runtime;
pub mod store;
pub mod tcp;
pub mod transport;

pub use error::{MeshError, Result};
