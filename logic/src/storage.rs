use std::cmp::Reverse;
use std::collections::HashMap;
use std::time::Duration;

use instant::Instant;
use priority_queue::PriorityQueue;
use thiserror::Error;
use tracing::debug;

use crate::config::StorageConfig;
use crate::Id;

#[derive(Error, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    #[error("too many entries stored")]
    TooManyEntries,
    #[error("value lifetime exceeds the configured maximum")]
    LifetimeTooLong,
    #[error("value exceeds the configured maximum size")]
    ValueTooLarge,
}

#[derive(Clone, Debug)]
struct Entry {
    value: String,
    deadline: Option<Instant>,
}

/// In-memory key/value store with per-entry expiration.
///
/// A zero lifetime means the entry never expires. Expired entries are
/// invisible to reads even before a purge drops them.
#[derive(Clone, Debug)]
pub struct Storage {
    config: StorageConfig,
    entries: HashMap<Id, Entry>,
    deadlines: PriorityQueue<Id, Reverse<Instant>>,
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Storage {
            config,
            entries: Default::default(),
            deadlines: Default::default(),
        }
    }

    pub fn check_entry(
        config: &StorageConfig,
        _key: Id,
        lifetime: Duration,
        value: &str,
    ) -> Result<(), Error> {
        if value.len() > config.max_value_size {
            Err(Error::ValueTooLarge)
        } else if !config.max_lifetime.is_zero()
            && (lifetime.is_zero() || lifetime > config.max_lifetime)
        {
            Err(Error::LifetimeTooLong)
        } else {
            Ok(())
        }
    }

    pub fn set(&mut self, key: Id, value: String, lifetime: Duration) -> Result<(), Error> {
        Self::check_entry(&self.config, key, lifetime, &value)?;
        self.purge_expired();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.config.max_entries {
            debug!(%key, "store refused, entry budget exhausted");
            return Err(Error::TooManyEntries);
        }

        let deadline = if lifetime.is_zero() {
            None
        } else {
            Some(
                Instant::now()
                    .checked_add(lifetime)
                    .ok_or(Error::LifetimeTooLong)?,
            )
        };
        match deadline {
            Some(d) => {
                self.deadlines.push(key, Reverse(d));
            }
            None => {
                self.deadlines.remove(&key);
            }
        }
        self.entries.insert(key, Entry { value, deadline });
        Ok(())
    }

    pub fn get(&self, key: Id) -> Option<&str> {
        self.entries
            .get(&key)
            .filter(|e| e.deadline.map_or(true, |d| d > Instant::now()))
            .map(|e| e.value.as_str())
    }

    pub fn contains(&self, key: Id) -> bool {
        self.get(key).is_some()
    }

    pub fn remove(&mut self, key: Id) -> bool {
        self.deadlines.remove(&key);
        self.entries.remove(&key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry whose deadline has passed.
    pub fn purge_expired(&mut self) {
        let now = Instant::now();
        while let Some((&key, &Reverse(deadline))) = self.deadlines.peek() {
            if deadline > now {
                break;
            }
            debug!(%key, "expiring stored value");
            self.deadlines.pop();
            self.entries.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_contains() {
        let mut storage = Storage::new(Default::default());
        let key = Id::from_u64(4);
        assert!(!storage.contains(key));

        storage.set(key, "Test".to_owned(), Duration::ZERO).unwrap();
        assert!(storage.contains(key));
        assert_eq!(storage.get(key), Some("Test"));
        assert_eq!(storage.get(Id::from_u64(5)), None);
    }

    #[test]
    fn replace_keeps_one_entry() {
        let mut storage = Storage::new(Default::default());
        let key = Id::from_u64(9);
        storage.set(key, "one".to_owned(), Duration::ZERO).unwrap();
        storage.set(key, "two".to_owned(), Duration::ZERO).unwrap();
        assert_eq!(storage.len(), 1);
        assert_eq!(storage.get(key), Some("two"));
    }

    #[test]
    fn expired_entries_are_invisible() {
        let mut storage = Storage::new(Default::default());
        let key = Id::from_u64(1);
        storage
            .set(key, "short".to_owned(), Duration::from_millis(10))
            .unwrap();
        assert!(storage.contains(key));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!storage.contains(key));
        assert_eq!(storage.get(key), None);

        storage.purge_expired();
        assert!(storage.is_empty());
    }

    #[test]
    fn zero_lifetime_never_expires() {
        let mut storage = Storage::new(Default::default());
        let key = Id::from_u64(2);
        storage.set(key, "keep".to_owned(), Duration::ZERO).unwrap();
        storage.purge_expired();
        assert_eq!(storage.get(key), Some("keep"));
    }

    #[test]
    fn oversized_values_are_refused() {
        let config = StorageConfig {
            max_value_size: 4,
            ..Default::default()
        };
        let mut storage = Storage::new(config);
        let err = storage
            .set(Id::from_u64(1), "too big".to_owned(), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, Error::ValueTooLarge);
    }

    #[test]
    fn lifetime_cap_applies_when_configured() {
        let config = StorageConfig {
            max_lifetime: Duration::from_secs(60),
            ..Default::default()
        };
        let mut storage = Storage::new(config);
        let key = Id::from_u64(1);

        storage
            .set(key, "ok".to_owned(), Duration::from_secs(30))
            .unwrap();
        let err = storage
            .set(key, "late".to_owned(), Duration::from_secs(120))
            .unwrap_err();
        assert_eq!(err, Error::LifetimeTooLong);
        // With a cap in place an unbounded lifetime is refused too.
        let err = storage
            .set(key, "forever".to_owned(), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, Error::LifetimeTooLong);
    }

    #[test]
    fn entry_budget_is_enforced() {
        let config = StorageConfig {
            max_entries: 2,
            ..Default::default()
        };
        let mut storage = Storage::new(config);
        storage
            .set(Id::from_u64(1), "a".to_owned(), Duration::ZERO)
            .unwrap();
        storage
            .set(Id::from_u64(2), "b".to_owned(), Duration::ZERO)
            .unwrap();
        let err = storage
            .set(Id::from_u64(3), "c".to_owned(), Duration::ZERO)
            .unwrap_err();
        assert_eq!(err, Error::TooManyEntries);
        // Replacing an existing key is still allowed.
        storage
            .set(Id::from_u64(2), "b2".to_owned(), Duration::ZERO)
            .unwrap();
    }
}
