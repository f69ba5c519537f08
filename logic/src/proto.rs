use std::fmt::Debug;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::{Contact, Id};

/// Answer to a FIND_VALUE call: the value when the peer held it, otherwise
/// up to k contacts closer to the key.
#[derive(Clone, Debug, Default)]
pub struct FindValueReply {
    pub contacts: Vec<Contact>,
    pub value: Option<String>,
}

/// Outbound RPC surface of a remote peer.
///
/// Every [`Contact`] carries one of these. Network transports serialize
/// the call onto the wire and wait for the correlated response; in-process
/// doubles invoke the remote node directly. `sender` is always the local
/// node's own contact so the remote side can fold it into its routing
/// table.
///
/// An implementation either returns the result or exactly one
/// [`RpcError`]; partial results never accompany an error.
pub trait Protocol: Send + Sync + Debug {
    fn ping(&self, sender: Contact) -> BoxFuture<'static, Result<(), RpcError>>;

    /// `exp_time` is the requested lifetime in whole seconds, zero for no
    /// expiration.
    fn store(
        &self,
        sender: Contact,
        key: Id,
        value: String,
        exp_time: u64,
    ) -> BoxFuture<'static, Result<(), RpcError>>;

    fn find_node(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<Vec<Contact>, RpcError>>;

    fn find_value(
        &self,
        sender: Contact,
        key: Id,
    ) -> BoxFuture<'static, Result<FindValueReply, RpcError>>;
}

/// Why an outbound RPC failed.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RpcError {
    /// No response arrived before the per-request deadline.
    #[error("request timed out")]
    Timeout,

    /// The response nonce does not match the one sent.
    #[error("response correlation id mismatch")]
    IdMismatched,

    /// The remote handler answered with an error message.
    #[error("peer error: {0}")]
    Peer(String),

    /// Framing, parsing or socket failure.
    #[error("protocol error: {0}")]
    Protocol(String),
}
