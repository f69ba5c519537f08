use tracing::debug;

use crate::config::RoutingConfig;
use crate::kbucket::KBucket;
use crate::{Contact, Id};

/// What [`BucketList::add_contact`] did with the candidate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddResult {
    Added,
    Refreshed,
    /// The owning bucket was full and not splittable; the oldest entries
    /// win and the newcomer is dropped.
    Rejected,
}

/// Ordered partition of the whole identifier space into k-buckets.
///
/// Ranges ascend, consecutive buckets share an edge and their union covers
/// the space. The list starts as one bucket over everything and splits on
/// demand: a full bucket splits while it covers the local id, and along
/// foreign branches while the common prefix of its contacts is not a
/// multiple of the split stride. Mutations are serialized by the mutex the
/// owning node wraps around the list.
#[derive(Debug)]
pub struct BucketList {
    id: Id,
    config: RoutingConfig,
    buckets: Vec<KBucket>,
}

impl BucketList {
    pub fn new(id: Id, config: RoutingConfig) -> Self {
        BucketList {
            id,
            config,
            buckets: vec![KBucket::whole_range()],
        }
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn buckets(&self) -> &[KBucket] {
        &self.buckets
    }

    pub fn contact_count(&self) -> usize {
        self.buckets.iter().map(|b| b.len()).sum()
    }

    fn bucket_index(&self, id: Id) -> usize {
        self.buckets.partition_point(|b| b.high() < id)
    }

    /// The bucket whose range owns the given id.
    pub fn get_kbucket(&self, id: Id) -> &KBucket {
        &self.buckets[self.bucket_index(id)]
    }

    pub fn add_contact(&mut self, mut contact: Contact) -> AddResult {
        if contact.id == self.id {
            return AddResult::Rejected;
        }
        contact.touch();

        loop {
            let index = self.bucket_index(contact.id);
            let bucket = &mut self.buckets[index];

            if bucket.contains(contact.id) {
                debug!(contact = %contact, "refreshing known contact");
                bucket.replace(contact);
                return AddResult::Refreshed;
            }

            if !bucket.is_full(self.config.bucket_size) {
                bucket.add(contact, self.config.bucket_size);
                return AddResult::Added;
            }

            if !self.can_split(index) {
                debug!(contact = %contact, "bucket full, dropping newcomer");
                return AddResult::Rejected;
            }

            let (left, right) = self.buckets.remove(index).split();
            self.buckets.insert(index, right);
            self.buckets.insert(index, left);
        }
    }

    fn can_split(&self, index: usize) -> bool {
        let bucket = &self.buckets[index];
        bucket.low() < bucket.high()
            && (bucket.has_in_range(self.id)
                || bucket.depth() % self.config.split_stride != 0)
    }

    pub fn remove_contact(&mut self, id: Id) -> bool {
        let index = self.bucket_index(id);
        self.buckets[index].remove(id)
    }

    /// Up to k contacts from the whole table, closest to `key` first,
    /// skipping the excluded id.
    pub fn get_close_contacts(&self, key: Id, exclude: Id) -> Vec<Contact> {
        let mut contacts: Vec<Contact> = self
            .buckets
            .iter()
            .flat_map(|b| b.contacts().iter())
            .filter(|c| c.id != exclude)
            .cloned()
            .collect();
        contacts.sort_unstable_by_key(|c| c.id ^ key);
        contacts.truncate(self.config.bucket_size);
        contacts
    }
}
