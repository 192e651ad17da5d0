//! The node server loop.
//!
//! [`NodeServer`] owns one [`Store`] and drains its mailbox one message at a
//! time. A client write and the fan-out it triggers finish before the next
//! message is looked at, so no other request on this node can observe the
//! store between the two.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use tracing::{debug, info};

use crate::membership::{Membership, NodeId};
use crate::message::{Reply, Request};
use crate::replication::replicate_item;
use crate::store::Store;
use crate::transport::{Inbound, Transport};

pub struct NodeServer {
    id: NodeId,
    store: Store,
    mailbox: Receiver<Inbound>,
    membership: Arc<dyn Membership>,
    transport: Arc<dyn Transport>,
}

impl NodeServer {
    pub fn new(
        id: NodeId,
        store: Store,
        mailbox: Receiver<Inbound>,
        membership: Arc<dyn Membership>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            id,
            store,
            mailbox,
            membership,
            transport,
        }
    }

    /// Serves requests until a `Stop` arrives or every sender is gone.
    ///
    /// Returns the final store.
    pub fn run(mut self) -> Store {
        info!(node = %self.id, entries = self.store.len(), "node serving");
        while let Ok(inbound) = self.mailbox.recv() {
            if !self.handle(inbound) {
                break;
            }
        }
        info!(node = %self.id, "node stopped");
        self.store
    }

    /// Processes one request. Returns `false` once the loop should exit.
    fn handle(&mut self, inbound: Inbound) -> bool {
        let Inbound { request, reply_to } = inbound;
        debug!(node = %self.id, request = request.kind(), "handling request");

        let (reply, keep_running) = match request {
            Request::Store { key, value } => {
                self.store.store_item(key.clone(), value.clone());
                let peers = replicate_item(
                    self.membership.as_ref(),
                    self.transport.as_ref(),
                    &key,
                    &value,
                );
                debug!(node = %self.id, %key, peers, "stored and replicated");
                (Some(Reply::Ok), true)
            }
            Request::ReplicateItem { key, value } => {
                self.store.store_item(key, value);
                (None, true)
            }
            Request::Retrieve { key } => {
                let value = self.store.fetch_item(&key).cloned();
                (Some(Reply::Value(value)), true)
            }
            Request::SendSnapshot => (Some(Reply::Snapshot(self.store.clone())), true),
            Request::Stop => {
                self.transport.unregister(&self.id);
                (Some(Reply::Stopped), false)
            }
        };

        if let (Some(reply), Some(reply_to)) = (reply, reply_to) {
            // The caller may have given up waiting.
            let _ = reply_to.send(reply);
        }
        keep_running
    }
}
