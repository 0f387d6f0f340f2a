//! Local balance cache
//!
//! Holds the last streamed max float per sender together with the last time
//! it was read or written. Only the stream receive loop writes values; reads
//! create an empty entry so a sender being asked about is tracked for
//! eviction like any other.
//!
//! # Blocking Lock Usage
//!
//! Uses `parking_lot::Mutex` because the sweep enumerates and deletes in one
//! step. The lock is scoped to each method and never held across `.await`.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use relay_core::{Address, U256};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    max_float: Option<U256>,
    last_access: Instant,
}

/// Sender → (max float, last access)
#[derive(Debug, Default)]
pub struct BalanceCache {
    entries: Mutex<HashMap<Address, CacheEntry>>,
}

impl BalanceCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached value for `sender`, refreshing its last access.
    ///
    /// Returns `None` when nothing has been streamed for the sender yet.
    pub fn get(&self, sender: Address, now: Instant) -> Option<U256> {
        let mut entries = self.entries.lock();
        let entry = entries.entry(sender).or_insert(CacheEntry {
            max_float: None,
            last_access: now,
        });
        entry.last_access = now;
        entry.max_float
    }

    /// Store a streamed value
    pub fn update(&self, sender: Address, max_float: Option<U256>, now: Instant) {
        self.entries.lock().insert(
            sender,
            CacheEntry {
                max_float,
                last_access: now,
            },
        );
    }

    /// Remove entries whose last access plus `window` is before `now`
    pub fn evict_stale(&self, now: Instant, window: Duration) -> Vec<Address> {
        let mut evicted = Vec::new();
        self.entries.lock().retain(|sender, entry| {
            let stale = entry
                .last_access
                .checked_add(window)
                .is_some_and(|expires| expires < now);
            if stale {
                evicted.push(*sender);
            }
            !stale
        });
        evicted
    }

    /// Whether `sender` has an entry
    pub fn contains(&self, sender: &Address) -> bool {
        self.entries.lock().contains_key(sender)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sender(seed: u8) -> Address {
        Address::repeat_byte(seed)
    }

    #[test]
    fn test_miss_creates_empty_entry() {
        let cache = BalanceCache::new();
        let now = Instant::now();

        assert_eq!(cache.get(sender(1), now), None);
        assert!(cache.contains(&sender(1)));
    }

    #[test]
    fn test_update_then_hit() {
        let cache = BalanceCache::new();
        let now = Instant::now();
        cache.update(sender(1), Some(U256::from(500u64)), now);

        assert_eq!(cache.get(sender(1), now), Some(U256::from(500u64)));
        cache.update(sender(1), None, now);
        assert_eq!(cache.get(sender(1), now), None);
    }

    #[test]
    fn test_read_refreshes_last_access() {
        let window = Duration::from_secs(60);
        let cache = BalanceCache::new();
        let t0 = Instant::now();
        cache.update(sender(1), Some(U256::from(1u64)), t0);
        cache.update(sender(2), Some(U256::from(2u64)), t0);

        let t1 = t0 + Duration::from_secs(50);
        cache.get(sender(1), t1);

        let evicted = cache.evict_stale(t0 + Duration::from_secs(61), window);
        assert_eq!(evicted, vec![sender(2)]);
        assert!(cache.contains(&sender(1)));
        assert_eq!(cache.len(), 1);
    }
}
