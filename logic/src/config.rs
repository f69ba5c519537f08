use std::time::Duration;

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct SystemConfig {
    pub routing: RoutingConfig,
    pub storage: StorageConfig,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RoutingConfig {
    // Also called k in the original paper
    pub bucket_size: usize,

    // Concurrent outbound queries per lookup round, alpha in the paper
    pub lookup_width: usize,

    // A full bucket not covering the local id may still split while the
    // common prefix of its contacts is not a multiple of this stride
    pub split_stride: u32,

    // Publishing trusts the owning bucket only when it has been active
    // within this window, otherwise a fresh lookup runs first
    pub bucket_refresh_interval: Duration,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            bucket_size: 20,
            lookup_width: 3,
            split_stride: 5,
            bucket_refresh_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct StorageConfig {
    // Maximum stored value size (in bytes)
    pub max_value_size: usize,

    // Maximum number of stored entries
    pub max_entries: usize,

    // Cap on requested value lifetimes, zero accepts anything
    pub max_lifetime: Duration,

    // Lifetime attached to published and cached values, zero never expires
    pub publish_lifetime: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            max_value_size: 128 * 1024, // 128 KiB
            max_entries: 1024,
            max_lifetime: Duration::ZERO,
            publish_lifetime: Duration::ZERO,
        }
    }
}
