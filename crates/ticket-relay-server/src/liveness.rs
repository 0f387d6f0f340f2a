//! Sender liveness tracking
//!
//! Maps each sender to the last time a ticket arrived for it. Every entry
//! owns the stop trigger of that sender's balance monitor, so evicting an
//! idle sender also stops its monitor.
//!
//! A sweep racing with a `touch` may evict an entry that was just
//! refreshed; the next ticket simply recreates it and monitoring restarts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use relay_core::{Address, ShutdownSignal, ShutdownTrigger};
use tokio::time::Instant;

struct LivenessEntry {
    last_access: Instant,
    generation: u64,
    monitor_stop: ShutdownTrigger,
}

/// Outcome of recording activity for a sender
#[derive(Debug)]
pub enum Touch {
    /// First activity in this liveness period; the caller must start a monitor
    Started(MonitorLease),
    /// The sender was already tracked; only its last access moved
    Refreshed,
}

/// Handed to the monitor started for a newly tracked sender
#[derive(Debug)]
pub struct MonitorLease {
    /// Sender being monitored
    pub sender: Address,
    /// Identifies this liveness period for [`LivenessTracker::release`]
    pub generation: u64,
    /// Fires when the entry is evicted
    pub stop: ShutdownSignal,
}

/// Concurrent sender → last access map with TTL eviction
pub struct LivenessTracker {
    window: Duration,
    entries: RwLock<HashMap<Address, LivenessEntry>>,
    next_generation: AtomicU64,
}

impl LivenessTracker {
    /// Create a tracker evicting senders idle for longer than `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// The liveness window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record activity for `sender` at `now`.
    ///
    /// Exactly one of any number of concurrent first touches gets
    /// [`Touch::Started`].
    pub fn touch(&self, sender: Address, now: Instant) -> Touch {
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get_mut(&sender) {
            entry.last_access = now;
            return Touch::Refreshed;
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (monitor_stop, stop) = ShutdownTrigger::new();
        entries.insert(
            sender,
            LivenessEntry {
                last_access: now,
                generation,
                monitor_stop,
            },
        );
        Touch::Started(MonitorLease {
            sender,
            generation,
            stop,
        })
    }

    /// Evict every sender whose last access plus the window is before `now`,
    /// stopping their monitors. Returns the evicted senders.
    pub fn sweep(&self, now: Instant) -> Vec<Address> {
        let mut evicted = Vec::new();
        self.entries.write().retain(|sender, entry| {
            let stale = entry
                .last_access
                .checked_add(self.window)
                .is_some_and(|expires| expires < now);
            if stale {
                entry.monitor_stop.fire();
                evicted.push(*sender);
            }
            !stale
        });
        evicted
    }

    /// Drop the entry for `sender` if it still belongs to `generation`.
    ///
    /// Called by a monitor that ended on its own so the next ticket starts a
    /// fresh one. A newer entry for the same sender is left alone.
    pub fn release(&self, sender: Address, generation: u64) -> bool {
        let mut entries = self.entries.write();
        match entries.get(&sender) {
            Some(entry) if entry.generation == generation => {
                entries.remove(&sender);
                true
            }
            _ => false,
        }
    }

    /// Last access recorded for a sender
    pub fn last_access(&self, sender: &Address) -> Option<Instant> {
        self.entries.read().get(sender).map(|e| e.last_access)
    }

    /// Whether a sender is tracked
    pub fn contains(&self, sender: &Address) -> bool {
        self.entries.read().contains_key(sender)
    }

    /// Number of tracked senders
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no sender is tracked
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Evict everything, stopping every monitor
    pub fn clear(&self) {
        for (_, entry) in self.entries.write().drain() {
            entry.monitor_stop.fire();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn sender(seed: u8) -> Address {
        Address::repeat_byte(seed)
    }

    #[test]
    fn test_first_touch_starts_then_refreshes() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(matches!(tracker.touch(sender(1), t0), Touch::Started(_)));
        let later = t0 + Duration::from_secs(5);
        assert!(matches!(tracker.touch(sender(1), later), Touch::Refreshed));
        assert_eq!(tracker.last_access(&sender(1)), Some(later));
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_sweep_evicts_only_stale_entries() {
        let window = Duration::from_secs(60);
        let tracker = LivenessTracker::new(window);
        let t0 = Instant::now();

        let Touch::Started(stale_lease) = tracker.touch(sender(1), t0) else {
            panic!("expected a new entry");
        };
        let sweep_at = t0 + window + Duration::from_secs(1);
        let Touch::Started(fresh_lease) = tracker.touch(sender(2), sweep_at - Duration::from_millis(1))
        else {
            panic!("expected a new entry");
        };

        assert_eq!(tracker.sweep(sweep_at), vec![sender(1)]);
        assert!(!tracker.contains(&sender(1)));
        assert!(tracker.contains(&sender(2)));
        assert!(stale_lease.stop.is_fired());
        assert!(!fresh_lease.stop.is_fired());
    }

    #[test]
    fn test_entry_at_exact_window_boundary_survives() {
        let window = Duration::from_secs(60);
        let tracker = LivenessTracker::new(window);
        let t0 = Instant::now();
        tracker.touch(sender(1), t0);

        assert!(tracker.sweep(t0 + window).is_empty());
        assert!(tracker.contains(&sender(1)));
    }

    #[test]
    fn test_release_ignores_newer_generation() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let Touch::Started(old) = tracker.touch(sender(1), t0) else {
            panic!("expected a new entry");
        };
        assert!(tracker.release(sender(1), old.generation));

        let Touch::Started(new) = tracker.touch(sender(1), t0) else {
            panic!("expected a new entry");
        };
        assert_ne!(old.generation, new.generation);
        assert!(!tracker.release(sender(1), old.generation));
        assert!(tracker.contains(&sender(1)));
    }

    #[test]
    fn test_concurrent_first_touches_start_exactly_once() {
        let tracker = Arc::new(LivenessTracker::new(Duration::from_secs(60)));
        let now = Instant::now();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let tracker = tracker.clone();
                std::thread::spawn(move || matches!(tracker.touch(sender(9), now), Touch::Started(_)))
            })
            .collect();

        let started = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|started| *started)
            .count();
        assert_eq!(started, 1);
    }

    #[test]
    fn test_clear_stops_every_monitor() {
        let tracker = LivenessTracker::new(Duration::from_secs(60));
        let t0 = Instant::now();
        let Touch::Started(lease) = tracker.touch(sender(1), t0) else {
            panic!("expected a new entry");
        };
        tracker.clear();
        assert!(tracker.is_empty());
        assert!(lease.stop.is_fired());
    }
}
