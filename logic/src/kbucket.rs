use instant::Instant;
use rand::Rng;

use crate::consts::ID_LEN_BITS;
use crate::{Contact, Id};

/// Bounded contact cache for one slice of the identifier space.
///
/// Contacts are kept in freshness order, oldest first and newest last.
#[derive(Clone, Debug)]
pub struct KBucket {
    low: Id,
    high: Id,
    contacts: Vec<Contact>,
    last_touched: Instant,
}

impl KBucket {
    pub fn new(low: Id, high: Id) -> Self {
        debug_assert!(low <= high);
        KBucket {
            low,
            high,
            contacts: Vec::new(),
            last_touched: Instant::now(),
        }
    }

    /// Bucket covering the whole identifier space.
    pub fn whole_range() -> Self {
        Self::new(Id::ZERO, Id::MAX)
    }

    pub fn low(&self) -> Id {
        self.low
    }

    pub fn high(&self) -> Id {
        self.high
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    pub fn last_touched(&self) -> Instant {
        self.last_touched
    }

    pub fn touch(&mut self) {
        self.last_touched = Instant::now();
    }

    pub fn contains(&self, id: Id) -> bool {
        self.contacts.iter().any(|c| c.id == id)
    }

    pub fn has_in_range(&self, id: Id) -> bool {
        self.low <= id && id <= self.high
    }

    pub fn is_full(&self, bucket_size: usize) -> bool {
        self.contacts.len() >= bucket_size
    }

    /// Append a contact at the freshest slot. Refuses when the bucket
    /// already holds `bucket_size` entries.
    pub fn add(&mut self, contact: Contact, bucket_size: usize) -> bool {
        if self.is_full(bucket_size) {
            return false;
        }
        debug_assert!(self.has_in_range(contact.id));
        debug_assert!(!self.contains(contact.id));
        self.contacts.push(contact);
        self.touch();
        true
    }

    /// Substitute the entry with the same id and move it to the freshest
    /// slot.
    pub fn replace(&mut self, contact: Contact) -> bool {
        match self.contacts.iter().position(|c| c.id == contact.id) {
            Some(index) => {
                self.contacts.remove(index);
                self.contacts.push(contact);
                self.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: Id) -> bool {
        match self.contacts.iter().position(|c| c.id == id) {
            Some(index) => {
                self.contacts.remove(index);
                true
            }
            None => false,
        }
    }

    /// Length of the binary prefix shared by every contained id, zero for
    /// an empty bucket.
    pub fn depth(&self) -> u32 {
        let first = match self.contacts.first() {
            Some(c) => c.id,
            None => return 0,
        };
        self.contacts[1..]
            .iter()
            .map(|c| (first ^ c.id).leading_zeros())
            .min()
            .unwrap_or(ID_LEN_BITS as u32)
    }

    /// Split at the range midpoint, partitioning contacts while keeping
    /// their freshness order. Consumes the bucket; both halves are stamped
    /// as active now.
    pub fn split(self) -> (KBucket, KBucket) {
        debug_assert!(self.low < self.high);
        let mid = self.low.midpoint(self.high);
        let mut left = KBucket::new(self.low, mid);
        let mut right = KBucket::new(mid.succ(), self.high);
        for contact in self.contacts {
            if contact.id <= mid {
                left.contacts.push(contact);
            } else {
                right.contacts.push(contact);
            }
        }
        (left, right)
    }

    /// Uniform identifier inside this bucket's range.
    ///
    /// Ranges produced by repeated splitting sit on power-of-two
    /// boundaries, so masking random bits into the varying suffix is
    /// exact.
    pub fn random_id_in_range<R: Rng>(&self, rng: &mut R) -> Id {
        self.low | (rng.gen::<Id>() & (self.low ^ self.high))
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::test_util::contact_u64;

    #[test]
    fn add_and_contains() {
        let mut bucket = KBucket::whole_range();
        assert!(bucket.add(contact_u64(1), 2));
        assert!(bucket.add(contact_u64(2), 2));
        assert!(bucket.contains(Id::from_u64(1)));
        assert!(!bucket.contains(Id::from_u64(3)));
        // Full bucket refuses the newcomer.
        assert!(!bucket.add(contact_u64(3), 2));
        assert_eq!(bucket.len(), 2);
    }

    #[test]
    fn replace_moves_to_tail() {
        let mut bucket = KBucket::whole_range();
        for i in 1..=3 {
            bucket.add(contact_u64(i), 20);
        }
        assert!(bucket.replace(contact_u64(1)));
        let order: Vec<Id> = bucket.contacts().iter().map(|c| c.id).collect();
        assert_eq!(
            order,
            vec![Id::from_u64(2), Id::from_u64(3), Id::from_u64(1)]
        );
        assert!(!bucket.replace(contact_u64(9)));
    }

    #[test]
    fn split_partitions_range_and_contacts() {
        let mut bucket = KBucket::whole_range();
        let low_id = Id::from_u64(17);
        let high_id = Id::set_bit(159) | Id::from_u64(3);
        bucket.add(contact_u64(17), 20);
        bucket.add(crate::test_util::contact(high_id), 20);

        let (left, right) = bucket.split();
        assert_eq!(left.low(), Id::ZERO);
        assert_eq!(right.high(), Id::MAX);
        assert_eq!(left.high().succ(), right.low());
        assert_eq!(right.low(), Id::set_bit(159));

        assert!(left.contains(low_id));
        assert!(!left.contains(high_id));
        assert!(right.contains(high_id));
    }

    #[test]
    fn depth_is_common_prefix_length() {
        let mut bucket = KBucket::whole_range();
        assert_eq!(bucket.depth(), 0);

        bucket.add(contact_u64(0b1000), 20);
        assert_eq!(bucket.depth(), 160);

        // 0b1000 and 0b1001 share all but the last bit.
        bucket.add(contact_u64(0b1001), 20);
        assert_eq!(bucket.depth(), 159);

        // 0b0100 diverges three bits earlier.
        bucket.add(contact_u64(0b0100), 20);
        assert_eq!(bucket.depth(), 156);
    }

    #[test]
    fn random_id_stays_in_range() {
        let (low, _) = KBucket::whole_range().split();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let id = low.random_id_in_range(&mut rng);
            assert!(low.has_in_range(id));
        }
    }
}
