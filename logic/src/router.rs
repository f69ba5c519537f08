use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, instrument};

use crate::config::RoutingConfig;
use crate::node::Node;
use crate::proto::{Protocol, RpcError};
use crate::{Contact, Id};

/// Invoked for every failed RPC with the contact that did not answer.
pub type RpcErrorHandler = Arc<dyn Fn(&Contact, &RpcError) + Send + Sync>;

/// Which remote query a lookup drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKind {
    Nodes,
    Value,
}

#[derive(Clone, Debug)]
pub struct LookupResult {
    pub found: bool,
    pub contacts: Vec<Contact>,
    pub found_by: Option<Contact>,
    pub value: Option<String>,
}

/// Iterative lookup engine.
///
/// A lookup seeds itself with the first `lookup_width` contacts of the
/// bucket owning the key and partitions everything it learns into contacts
/// closer to the key than the local node and contacts at least as far.
/// Rounds of at most `lookup_width` concurrent queries then drain the
/// uncontacted candidates, closer ones first. Peers reported by a response
/// are classified against the responding contact's own distance, which
/// keeps the boundary stable while responses race each other. The first
/// response carrying a value ends the lookup at once; otherwise it ends
/// when `bucket_size` closer contacts have accumulated or nothing
/// uncontacted remains.
pub struct Router {
    node: Arc<Node>,
    config: RoutingConfig,
    error_handler: RpcErrorHandler,
}

impl Router {
    pub fn new(node: Arc<Node>, config: RoutingConfig, error_handler: RpcErrorHandler) -> Self {
        Router {
            node,
            config,
            error_handler,
        }
    }

    #[instrument(skip(self), fields(node = %self.node.id()))]
    pub async fn lookup(&self, key: Id, kind: LookupKind, give_all: bool) -> LookupResult {
        let our = self.node.our_contact().clone();
        let our_distance = our.id ^ key;
        let width = self.config.lookup_width.max(1);

        let seed: Vec<Contact> = {
            let list = self.node.bucket_list().lock().unwrap();
            list.get_kbucket(key)
                .contacts()
                .iter()
                .take(width)
                .cloned()
                .collect()
        };
        debug!(seeds = seed.len(), "lookup starting");

        let mut closer: Vec<Contact> = Vec::new();
        let mut farther: Vec<Contact> = Vec::new();
        for contact in &seed {
            if contact.id ^ key < our_distance {
                closer.push(contact.clone());
            } else {
                farther.push(contact.clone());
            }
        }

        let mut contacted: HashSet<Id> = seed.iter().map(|c| c.id).collect();
        let mut ret: Vec<Contact> = Vec::new();
        let mut batch = seed;

        while !batch.is_empty() {
            let hit = self
                .query_round(key, kind, &our, batch, &mut closer, &mut farther)
                .await;
            if let Some((found_by, value)) = hit {
                let mut contacts = closer;
                contacts.extend(farther);
                return LookupResult {
                    found: true,
                    contacts,
                    found_by: Some(found_by),
                    value: Some(value),
                };
            }

            for contact in &closer {
                if !ret.iter().any(|c| c.id == contact.id) {
                    ret.push(contact.clone());
                }
            }
            if ret.len() >= self.config.bucket_size {
                break;
            }

            batch = next_batch(&closer, &contacted, width);
            if batch.is_empty() {
                batch = next_batch(&farther, &contacted, width);
            }
            contacted.extend(batch.iter().map(|c| c.id));
        }

        ret.sort_unstable_by_key(|c| c.id ^ key);
        if !give_all {
            ret.truncate(self.config.bucket_size);
        }
        LookupResult {
            found: false,
            contacts: ret,
            found_by: None,
            value: None,
        }
    }

    /// Query one batch concurrently, folding answers into the candidate
    /// sets as they arrive. Returns the winning peer and value on a hit;
    /// remaining in-flight queries are dropped with the stream.
    async fn query_round(
        &self,
        key: Id,
        kind: LookupKind,
        our: &Contact,
        batch: Vec<Contact>,
        closer: &mut Vec<Contact>,
        farther: &mut Vec<Contact>,
    ) -> Option<(Contact, String)> {
        let mut pending: FuturesUnordered<_> = batch
            .into_iter()
            .map(|peer| {
                let our = our.clone();
                async move {
                    let res = match kind {
                        LookupKind::Nodes => peer
                            .protocol
                            .find_node(our, key)
                            .await
                            .map(|peers| (peers, None)),
                        LookupKind::Value => peer
                            .protocol
                            .find_value(our, key)
                            .await
                            .map(|reply| (reply.contacts, reply.value)),
                    };
                    (peer, res)
                }
            })
            .collect();

        while let Some((peer, res)) = pending.next().await {
            match res {
                Err(err) => {
                    debug!(peer = %peer, %err, "lookup query failed");
                    (self.error_handler)(&peer, &err);
                }
                Ok((_, Some(value))) => {
                    debug!(peer = %peer, "value found");
                    return Some((peer, value));
                }
                Ok((peers, None)) => merge(key, our, &peer, peers, closer, farther),
            }
        }
        None
    }
}

/// Fold a peer's answer into the candidate sets, skipping ourselves, the
/// queried peer and anything already known. The boundary is the queried
/// contact's own distance to the key.
fn merge(
    key: Id,
    our: &Contact,
    queried: &Contact,
    peers: Vec<Contact>,
    closer: &mut Vec<Contact>,
    farther: &mut Vec<Contact>,
) {
    let boundary = queried.id ^ key;
    for peer in peers {
        if peer.id == our.id || peer.id == queried.id {
            continue;
        }
        if closer.iter().chain(farther.iter()).any(|c| c.id == peer.id) {
            continue;
        }
        if peer.id ^ key < boundary {
            closer.push(peer);
        } else {
            farther.push(peer);
        }
    }
}

fn next_batch(candidates: &[Contact], contacted: &HashSet<Id>, width: usize) -> Vec<Contact> {
    candidates
        .iter()
        .filter(|c| !contacted.contains(&c.id))
        .take(width)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::loopback::{create_node, silent_contact};

    fn router(node: Arc<Node>) -> Router {
        Router::new(node, Default::default(), Arc::new(|_, _| {}))
    }

    #[tokio::test]
    async fn lookup_discovers_contacts_of_contacts() {
        let our = create_node(Default::default(), Id::MAX, "h", 1);
        let relay = create_node(Default::default(), Id::from_u64(3), "h", 2);
        let hidden = create_node(Default::default(), Id::from_u64(1), "h", 3);

        relay
            .bucket_list()
            .lock()
            .unwrap()
            .add_contact(hidden.our_contact().clone());
        our.bucket_list()
            .lock()
            .unwrap()
            .add_contact(relay.our_contact().clone());

        let res = router(our)
            .lookup(Id::ZERO, LookupKind::Nodes, false)
            .await;
        assert!(!res.found);
        let ids: Vec<Id> = res.contacts.iter().map(|c| c.id).collect();
        // Sorted by distance to zero: the hidden node is closest.
        assert_eq!(ids, vec![Id::from_u64(1), Id::from_u64(3)]);
    }

    #[tokio::test]
    async fn value_hit_ends_the_lookup() {
        let our = create_node(Default::default(), Id::MAX, "h", 1);
        let holder = create_node(Default::default(), Id::from_u64(4), "h", 2);
        holder
            .storage()
            .write()
            .unwrap()
            .set(Id::ZERO, "Test".to_owned(), std::time::Duration::ZERO)
            .unwrap();
        our.bucket_list()
            .lock()
            .unwrap()
            .add_contact(holder.our_contact().clone());

        let res = router(our)
            .lookup(Id::ZERO, LookupKind::Value, false)
            .await;
        assert!(res.found);
        assert_eq!(res.value.as_deref(), Some("Test"));
        assert_eq!(res.found_by.unwrap().id, Id::from_u64(4));
    }

    #[tokio::test]
    async fn give_all_suppresses_the_k_truncation() {
        let config = RoutingConfig {
            bucket_size: 1,
            ..Default::default()
        };
        let our = create_node(
            crate::config::SystemConfig {
                routing: config.clone(),
                ..Default::default()
            },
            Id::MAX,
            "h",
            1,
        );
        let relay = create_node(Default::default(), Id::from_u64(4), "h", 2);
        let hidden = create_node(Default::default(), Id::from_u64(2), "h", 3);
        relay
            .bucket_list()
            .lock()
            .unwrap()
            .add_contact(hidden.our_contact().clone());
        our.bucket_list()
            .lock()
            .unwrap()
            .add_contact(relay.our_contact().clone());

        let handler: RpcErrorHandler = Arc::new(|_, _| {});
        let router = Router::new(our, config, handler);
        let trimmed = router.lookup(Id::ZERO, LookupKind::Nodes, false).await;
        assert_eq!(trimmed.contacts.len(), 1);
        assert_eq!(trimmed.contacts[0].id, Id::from_u64(2));

        let all = router.lookup(Id::ZERO, LookupKind::Nodes, true).await;
        assert_eq!(all.contacts.len(), 2);
    }

    #[tokio::test]
    async fn failed_queries_reach_the_handler_and_the_lookup_continues() {
        let our = create_node(Default::default(), Id::MAX, "h", 1);
        let dead = silent_contact(Id::from_u64(2), "h", 2);
        let alive = create_node(Default::default(), Id::from_u64(3), "h", 3);
        let hidden = create_node(Default::default(), Id::from_u64(1), "h", 4);
        alive
            .bucket_list()
            .lock()
            .unwrap()
            .add_contact(hidden.our_contact().clone());

        {
            let mut list = our.bucket_list().lock().unwrap();
            list.add_contact(dead.clone());
            list.add_contact(alive.our_contact().clone());
        }

        let failures = Arc::new(AtomicUsize::new(0));
        let counted = failures.clone();
        let handler: RpcErrorHandler = Arc::new(move |contact, err| {
            assert_eq!(contact.id, Id::from_u64(2));
            assert!(matches!(err, RpcError::Timeout));
            counted.fetch_add(1, Ordering::SeqCst);
        });

        let router = Router::new(our, Default::default(), handler);
        let res = router.lookup(Id::ZERO, LookupKind::Nodes, false).await;

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let ids: Vec<Id> = res.contacts.iter().map(|c| c.id).collect();
        // The dead peer stays a candidate; the hidden node was still found.
        assert_eq!(
            ids,
            vec![Id::from_u64(1), Id::from_u64(2), Id::from_u64(3)]
        );
    }
}
