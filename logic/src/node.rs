use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use crate::bucket_list::BucketList;
use crate::config::SystemConfig;
use crate::proto::FindValueReply;
use crate::storage::{self, Storage};
use crate::{Contact, Id};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum NodeError {
    /// A request claiming to come from the local node itself.
    #[error("sender cannot be the local node")]
    SenderIsSelf,
    #[error(transparent)]
    Storage(#[from] storage::Error),
}

/// Local RPC responder: owns the routing table and the value store and
/// applies incoming requests against them.
///
/// Every handler first folds the sender into the routing table, so merely
/// being queried keeps a peer known.
pub struct Node {
    our_contact: Contact,
    bucket_list: Mutex<BucketList>,
    storage: RwLock<Storage>,
}

impl Node {
    pub fn new(config: SystemConfig, our_contact: Contact) -> Arc<Self> {
        Arc::new(Self::from_parts(config, our_contact))
    }

    pub(crate) fn from_parts(config: SystemConfig, our_contact: Contact) -> Self {
        Node {
            bucket_list: Mutex::new(BucketList::new(our_contact.id, config.routing)),
            storage: RwLock::new(Storage::new(config.storage)),
            our_contact,
        }
    }

    pub fn id(&self) -> Id {
        self.our_contact.id
    }

    pub fn our_contact(&self) -> &Contact {
        &self.our_contact
    }

    pub fn bucket_list(&self) -> &Mutex<BucketList> {
        &self.bucket_list
    }

    pub fn storage(&self) -> &RwLock<Storage> {
        &self.storage
    }

    fn register_sender(&self, sender: &Contact) -> Result<(), NodeError> {
        if sender.id == self.our_contact.id {
            return Err(NodeError::SenderIsSelf);
        }
        self.bucket_list.lock().unwrap().add_contact(sender.clone());
        Ok(())
    }

    pub fn ping(&self, sender: &Contact) -> Result<Contact, NodeError> {
        self.register_sender(sender)?;
        Ok(self.our_contact.clone())
    }

    pub fn store(
        &self,
        sender: &Contact,
        key: Id,
        value: String,
        lifetime: Duration,
    ) -> Result<(), NodeError> {
        self.register_sender(sender)?;
        debug!(%key, from = %sender, "storing value");
        self.storage.write().unwrap().set(key, value, lifetime)?;
        Ok(())
    }

    pub fn find_node(&self, sender: &Contact, key: Id) -> Result<Vec<Contact>, NodeError> {
        self.register_sender(sender)?;
        Ok(self
            .bucket_list
            .lock()
            .unwrap()
            .get_close_contacts(key, sender.id))
    }

    pub fn find_value(&self, sender: &Contact, key: Id) -> Result<FindValueReply, NodeError> {
        self.register_sender(sender)?;
        let value = self.storage.read().unwrap().get(key).map(str::to_owned);
        let reply = match value {
            Some(value) => FindValueReply {
                contacts: Vec::new(),
                value: Some(value),
            },
            None => FindValueReply {
                contacts: self
                    .bucket_list
                    .lock()
                    .unwrap()
                    .get_close_contacts(key, sender.id),
                value: None,
            },
        };
        Ok(reply)
    }
}
