use std::sync::Arc;

use futures::future::BoxFuture;

use crate::proto::{FindValueReply, Protocol, RpcError};
use crate::{Contact, Id};

/// Protocol stub for routing-table tests; anything that actually sends is
/// a bug in the test.
#[derive(Clone, Debug)]
pub struct DeadProtocol;

impl Protocol for DeadProtocol {
    fn ping(&self, _sender: Contact) -> BoxFuture<'static, Result<(), RpcError>> {
        panic!("network call in a table-only test");
    }

    fn store(
        &self,
        _sender: Contact,
        _key: Id,
        _value: String,
        _exp_time: u64,
    ) -> BoxFuture<'static, Result<(), RpcError>> {
        panic!("network call in a table-only test");
    }

    fn find_node(
        &self,
        _sender: Contact,
        _key: Id,
    ) -> BoxFuture<'static, Result<Vec<Contact>, RpcError>> {
        panic!("network call in a table-only test");
    }

    fn find_value(
        &self,
        _sender: Contact,
        _key: Id,
    ) -> BoxFuture<'static, Result<FindValueReply, RpcError>> {
        panic!("network call in a table-only test");
    }
}

pub fn contact(id: Id) -> Contact {
    Contact::new(id, "127.0.0.1", 0, Arc::new(DeadProtocol))
}

pub fn contact_u64(id: u64) -> Contact {
    contact(Id::from_u64(id))
}
