//! In-process protocol for tests and simulations: invokes the remote
//! node's handlers directly, bypassing serialization and the network.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::future::{ready, BoxFuture, FutureExt};

use crate::config::SystemConfig;
use crate::node::{Node, NodeError};
use crate::proto::{FindValueReply, Protocol, RpcError};
use crate::{Contact, Id};

#[derive(Clone, Debug)]
pub struct LoopbackProtocol {
    node: Weak<Node>,
    responds: bool,
}

impl LoopbackProtocol {
    pub fn new(node: Weak<Node>) -> Self {
        LoopbackProtocol {
            node,
            responds: true,
        }
    }

    /// A peer that never answers; every call reports a timeout.
    pub fn silent() -> Self {
        LoopbackProtocol {
            node: Weak::new(),
            responds: false,
        }
    }

    fn target(&self) -> Result<Arc<Node>, RpcError> {
        if !self.responds {
            return Err(RpcError::Timeout);
        }
        self.node
            .upgrade()
            .ok_or_else(|| RpcError::Protocol("peer node is gone".to_owned()))
    }
}

fn peer_err(err: NodeError) -> RpcError {
    RpcError::Peer(err.to_string())
}

impl Protocol for LoopbackProtocol {
    fn ping(&self, sender: Contact) -> BoxFuture<'static, Result<(), RpcError>> {
        let res = self
            .target()
            .and_then(|node| node.ping(&sender).map(|_| ()).map_err(peer_err));
        ready(res).boxed()
    }

    fn store(
        &self,
        sender: Contact,
        key: Id,
        value: String,
        exp_time: u64,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        let res = self.target().and_then(|node| {
            node.store(&sender, key, value, Duration::from_secs(exp_time))
                .map_err(peer_err)
        });
        ready(res).boxed()
    }

    fn find_node(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<Vec<Contact>, RpcError>> {
        let res = self
            .target()
            .and_then(|node| node.find_node(&sender, key).map_err(peer_err));
        ready(res).boxed()
    }

    fn find_value(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<FindValueReply, RpcError>> {
        let res = self
            .target()
            .and_then(|node| node.find_value(&sender, key).map_err(peer_err));
        ready(res).boxed()
    }
}

/// Build a node whose own contact loops back to itself, the way test
/// networks wire peers together.
pub fn create_node(config: SystemConfig, id: Id, host: &str, port: u16) -> Arc<Node> {
    Arc::new_cyclic(|weak: &Weak<Node>| {
        let contact = Contact::new(id, host, port, Arc::new(LoopbackProtocol::new(weak.clone())));
        Node::from_parts(config, contact)
    })
}

/// A contact whose RPCs always time out, standing in for a dead peer.
pub fn silent_contact(id: Id, host: &str, port: u16) -> Contact {
    Contact::new(id, host, port, Arc::new(LoopbackProtocol::silent()))
}
