use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::SystemConfig;
use crate::node::Node;
use crate::proto::{Protocol, RpcError};
use crate::router::{LookupKind, LookupResult, Router, RpcErrorHandler};
use crate::{Contact, Id};

/// Outcome of a value lookup.
#[derive(Clone, Debug)]
pub struct FindValueOutcome {
    pub found: bool,
    pub contacts: Vec<Contact>,
    pub value: Option<String>,
}

/// The DHT façade: composes the local node with the lookup engine and
/// exposes store, find_value and bootstrap. These operations never fail
/// outright; per-peer trouble goes to the error handler and the rest of
/// the batch proceeds.
pub struct Dht {
    config: SystemConfig,
    node: Arc<Node>,
    router: Router,
    error_handler: RpcErrorHandler,
}

impl Dht {
    /// Default error handling: log the failure and evict peers that do
    /// not answer within the deadline.
    pub fn new(config: SystemConfig, node: Arc<Node>) -> Self {
        let handler_node = node.clone();
        let handler: RpcErrorHandler = Arc::new(move |contact, err| {
            warn!(peer = %contact, %err, "rpc failed");
            if matches!(err, RpcError::Timeout) {
                handler_node
                    .bucket_list()
                    .lock()
                    .unwrap()
                    .remove_contact(contact.id);
            }
        });
        Self::with_error_handler(config, node, handler)
    }

    pub fn with_error_handler(
        config: SystemConfig,
        node: Arc<Node>,
        error_handler: RpcErrorHandler,
    ) -> Self {
        let router = Router::new(node.clone(), config.routing.clone(), error_handler.clone());
        Dht {
            config,
            node,
            router,
            error_handler,
        }
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn self_contact(&self) -> Contact {
        self.node.our_contact().clone()
    }

    /// Store locally, then replicate towards the k nodes closest to the
    /// key. Returns the number of replicas written, the local one
    /// included.
    pub async fn store(&self, key: Id, value: String) -> usize {
        let lifetime = self.config.storage.publish_lifetime;
        if let Err(err) = self
            .node
            .storage()
            .write()
            .unwrap()
            .set(key, value.clone(), lifetime)
        {
            warn!(%key, %err, "local store failed");
            return 0;
        }

        info!(%key, "publishing value");
        1 + self.publish(key, value).await
    }

    /// Publish to the closest known contacts when the owning bucket is
    /// fresh, otherwise discover the current closest nodes first.
    async fn publish(&self, key: Id, value: String) -> usize {
        let fresh_contacts = {
            let list = self.node.bucket_list().lock().unwrap();
            let bucket = list.get_kbucket(key);
            if bucket.last_touched().elapsed() < self.config.routing.bucket_refresh_interval {
                Some(list.get_close_contacts(key, self.node.id()))
            } else {
                None
            }
        };
        let contacts = match fresh_contacts {
            Some(contacts) => contacts,
            None => {
                self.router
                    .lookup(key, LookupKind::Nodes, false)
                    .await
                    .contacts
            }
        };

        self.store_to_contacts(&contacts, key, value).await
    }

    async fn store_to_contacts(&self, contacts: &[Contact], key: Id, value: String) -> usize {
        let our = self.self_contact();
        let exp_time = self.config.storage.publish_lifetime.as_secs();
        let mut pending: FuturesUnordered<_> = contacts
            .iter()
            .filter(|c| c.id != our.id)
            .map(|contact| {
                let fut = contact
                    .protocol
                    .store(our.clone(), key, value.clone(), exp_time);
                async move { (contact, fut.await) }
            })
            .collect();

        let mut stored = 0;
        while let Some((contact, res)) = pending.next().await {
            match res {
                Ok(()) => stored += 1,
                Err(err) => (self.error_handler)(contact, &err),
            }
        }
        stored
    }

    /// Fetch a value, local storage first, then the network. A remote hit
    /// is cached on the closest contact that did not have it.
    pub async fn find_value(&self, key: Id) -> FindValueOutcome {
        let local = self.node.storage().read().unwrap().get(key).map(str::to_owned);
        if let Some(value) = local {
            return FindValueOutcome {
                found: true,
                contacts: Vec::new(),
                value: Some(value),
            };
        }

        let LookupResult {
            contacts,
            found_by,
            value,
            ..
        } = self.router.lookup(key, LookupKind::Value, false).await;

        if let (Some(found_by), Some(value)) = (found_by, value) {
            self.cache_at_closest(key, &value, &found_by, &contacts).await;
            FindValueOutcome {
                found: true,
                contacts,
                value: Some(value),
            }
        } else {
            FindValueOutcome {
                found: false,
                contacts,
                value: None,
            }
        }
    }

    /// Read-path caching: replicate a fetched value onto the closest
    /// candidate that answered without it.
    async fn cache_at_closest(
        &self,
        key: Id,
        value: &str,
        found_by: &Contact,
        contacts: &[Contact],
    ) {
        let our_id = self.node.id();
        let target = contacts
            .iter()
            .filter(|c| c.id != found_by.id && c.id != our_id)
            .min_by_key(|c| c.id ^ key);
        let target = match target {
            Some(target) => target,
            None => return,
        };

        debug!(peer = %target, %key, "caching value");
        let exp_time = self.config.storage.publish_lifetime.as_secs();
        if let Err(err) = target
            .protocol
            .store(self.self_contact(), key, value.to_owned(), exp_time)
            .await
        {
            (self.error_handler)(target, &err);
        }
    }

    /// Join the network through one known peer: learn its neighbourhood,
    /// then refresh every other bucket to reach regions of the id space
    /// the peer does not cover.
    pub async fn bootstrap<R: Rng>(&self, known_peer: Contact, rng: &mut R) -> Result<(), RpcError> {
        info!(peer = %known_peer, "bootstrapping");
        self.node
            .bucket_list()
            .lock()
            .unwrap()
            .add_contact(known_peer.clone());

        let our = self.self_contact();
        let contacts = match known_peer.protocol.find_node(our.clone(), our.id).await {
            Ok(contacts) => contacts,
            Err(err) => {
                (self.error_handler)(&known_peer, &err);
                return Err(err);
            }
        };

        {
            let mut list = self.node.bucket_list().lock().unwrap();
            for contact in contacts {
                list.add_contact(contact);
            }
        }

        // Snapshot the refresh targets under the lock, query outside it.
        let refreshes: Vec<(Id, Vec<Contact>)> = {
            let list = self.node.bucket_list().lock().unwrap();
            list.buckets()
                .iter()
                .filter(|b| !b.has_in_range(known_peer.id))
                .map(|b| (b.random_id_in_range(rng), b.contacts().to_vec()))
                .collect()
        };

        let mut pending: FuturesUnordered<_> = refreshes
            .into_iter()
            .map(|(target, contacts)| self.refresh_bucket(our.clone(), target, contacts))
            .collect();
        while pending.next().await.is_some() {}

        Ok(())
    }

    /// Ask every contact already in a bucket for nodes near a random id in
    /// its range, folding whatever comes back into the table.
    async fn refresh_bucket(&self, our: Contact, target: Id, contacts: Vec<Contact>) {
        for contact in contacts {
            match contact.protocol.find_node(our.clone(), target).await {
                Ok(found) => {
                    let mut list = self.node.bucket_list().lock().unwrap();
                    for discovered in found {
                        list.add_contact(discovered);
                    }
                }
                Err(err) => (self.error_handler)(&contact, &err),
            }
        }
    }
}
