//! Subscription fan-out registry
//!
//! Maps a subscriber identity (the peer address of its streaming
//! connection) to a bounded mailbox. Every balance change for every sender
//! goes to every mailbox; subscribers filter by sender themselves.
//!
//! Broadcast works on a snapshot of the registry taken under a short read
//! lock, and each delivery is a non-blocking push into the subscriber's own
//! mailbox, so a slow subscriber never holds up the others. A subscriber
//! whose mailbox is full has stalled and is dropped like a closed one; its
//! mailbox then drains and ends. A subscriber removed mid-broadcast may or
//! may not receive that update.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use relay_core::MaxFloatUpdate;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Mutex};

/// Identity of a streaming subscriber
pub type SubscriberId = String;

/// Receiving end of a subscriber's updates.
///
/// Held by the streaming handler; once every holder drops it the registry
/// prunes the entry on the next broadcast.
#[derive(Debug)]
pub struct Mailbox {
    receiver: Mutex<mpsc::Receiver<MaxFloatUpdate>>,
}

impl Mailbox {
    /// Wait for the next update; `None` once the registry dropped this
    /// subscriber and the backlog is drained. Cancel-safe.
    pub async fn recv(&self) -> Option<MaxFloatUpdate> {
        self.receiver.lock().await.recv().await
    }
}

struct Subscriber {
    sender: mpsc::Sender<MaxFloatUpdate>,
    mailbox: Weak<Mailbox>,
}

/// Concurrent subscriber registry with unfiltered broadcast
pub struct FanoutRegistry {
    capacity: usize,
    subscribers: RwLock<HashMap<SubscriberId, Subscriber>>,
}

impl FanoutRegistry {
    /// Create an empty registry whose mailboxes hold `capacity` updates
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// Mailbox for `id`, reusing a live one if the identity is registered.
    ///
    /// The flag is `true` when a new mailbox was created.
    pub fn subscribe(&self, id: &str) -> (Arc<Mailbox>, bool) {
        let mut subscribers = self.subscribers.write();
        if let Some(mailbox) = subscribers.get(id).and_then(|s| s.mailbox.upgrade()) {
            return (mailbox, false);
        }

        let (sender, receiver) = mpsc::channel(self.capacity);
        let mailbox = Arc::new(Mailbox {
            receiver: Mutex::new(receiver),
        });
        subscribers.insert(
            id.to_string(),
            Subscriber {
                sender,
                mailbox: Arc::downgrade(&mailbox),
            },
        );
        (mailbox, true)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: &str) -> bool {
        self.subscribers.write().remove(id).is_some()
    }

    /// Deliver `update` to every registered subscriber.
    ///
    /// Returns the number of mailboxes the update was pushed into.
    pub fn broadcast(&self, update: MaxFloatUpdate) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<MaxFloatUpdate>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, s)| (id.clone(), s.sender.clone()))
            .collect();

        let mut delivered = 0;
        let mut gone = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(update) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(subscriber = %id, "max float subscriber stalled, dropping it");
                    gone.push((id, sender));
                }
                Err(TrySendError::Closed(_)) => gone.push((id, sender)),
            }
        }

        if !gone.is_empty() {
            let mut subscribers = self.subscribers.write();
            for (id, sender) in gone {
                // Only prune the entry we failed on, not a fresh re-subscription
                if subscribers
                    .get(&id)
                    .is_some_and(|s| s.sender.same_channel(&sender))
                {
                    subscribers.remove(&id);
                    tracing::debug!(subscriber = %id, "pruned max float subscriber");
                }
            }
        }
        delivered
    }

    /// Whether `id` is registered
    pub fn contains(&self, id: &str) -> bool {
        self.subscribers.read().contains_key(id)
    }

    /// Number of registered subscribers
    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Whether no subscriber is registered
    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::{Address, U256};

    fn update(seed: u8, value: u64) -> MaxFloatUpdate {
        MaxFloatUpdate::new(Address::repeat_byte(seed), U256::from(value))
    }

    #[tokio::test]
    async fn test_every_subscriber_receives_every_update() {
        let registry = FanoutRegistry::new(8);
        let (a, _) = registry.subscribe("10.0.0.1:5000");
        let (b, _) = registry.subscribe("10.0.0.2:5000");

        assert_eq!(registry.broadcast(update(1, 100)), 2);
        assert_eq!(registry.broadcast(update(2, 200)), 2);

        for mailbox in [&a, &b] {
            assert_eq!(mailbox.recv().await, Some(update(1, 100)));
            assert_eq!(mailbox.recv().await, Some(update(2, 200)));
        }
    }

    #[tokio::test]
    async fn test_same_identity_reuses_mailbox() {
        let registry = FanoutRegistry::new(8);
        let (first, created) = registry.subscribe("10.0.0.1:5000");
        assert!(created);
        let (second, created) = registry.subscribe("10.0.0.1:5000");
        assert!(!created);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_leaves_others_untouched() {
        let registry = FanoutRegistry::new(8);
        let (_a, _) = registry.subscribe("a");
        let (b, _) = registry.subscribe("b");

        assert!(registry.unsubscribe("a"));
        assert!(!registry.unsubscribe("a"));
        assert_eq!(registry.broadcast(update(3, 1)), 1);
        assert_eq!(b.recv().await, Some(update(3, 1)));
    }

    #[tokio::test]
    async fn test_dropped_mailbox_is_pruned_on_broadcast() {
        let registry = FanoutRegistry::new(8);
        let (a, _) = registry.subscribe("a");
        let (_b, _) = registry.subscribe("b");
        drop(a);

        assert_eq!(registry.broadcast(update(4, 1)), 1);
        assert!(!registry.contains("a"));
        assert!(registry.contains("b"));

        // A dead identity gets a fresh mailbox
        let (_a, created) = registry.subscribe("a");
        assert!(created);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_is_dropped_when_mailbox_fills() {
        let registry = FanoutRegistry::new(2);
        let (stalled, _) = registry.subscribe("stalled");
        let (reading, _) = registry.subscribe("reading");

        assert_eq!(registry.broadcast(update(5, 1)), 2);
        assert_eq!(reading.recv().await, Some(update(5, 1)));
        assert_eq!(registry.broadcast(update(5, 2)), 2);
        assert_eq!(reading.recv().await, Some(update(5, 2)));

        // Third update overflows the stalled mailbox only
        assert_eq!(registry.broadcast(update(5, 3)), 1);
        assert!(!registry.contains("stalled"));
        assert_eq!(reading.recv().await, Some(update(5, 3)));

        // The backlog drains, then the mailbox ends
        assert_eq!(stalled.recv().await, Some(update(5, 1)));
        assert_eq!(stalled.recv().await, Some(update(5, 2)));
        assert_eq!(stalled.recv().await, None);
    }
}
