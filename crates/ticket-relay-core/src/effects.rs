//! Collaborator interfaces
//!
//! The relay wraps an external Float Authority and the proxy consults local
//! sender bookkeeping. Both sides see those collaborators only through the
//! traits in this module, so tests and deployments can plug in their own.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::RelayResult;
use crate::types::{SenderInfo, SignedTicket};

/// One event on a max float subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloatEvent {
    /// The sender's max float changed; `None` means no value is available
    Update(Option<U256>),
    /// A transient failure; the subscription stays open
    Error(String),
}

/// Producer half of a max float subscription
pub type FloatSink = mpsc::UnboundedSender<FloatEvent>;

/// Live stream of max float changes for one sender.
///
/// The stream ends when the producer drops its [`FloatSink`]. Dropping the
/// subscription runs its cancel hook, if any.
pub struct FloatSubscription {
    events: mpsc::UnboundedReceiver<FloatEvent>,
    on_cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FloatSubscription {
    /// Create a connected sink/subscription pair
    pub fn channel() -> (FloatSink, Self) {
        let (sink, events) = mpsc::unbounded_channel();
        (
            sink,
            Self {
                events,
                on_cancel: None,
            },
        )
    }

    /// Attach a hook that runs when the subscription is dropped
    pub fn with_cancel(mut self, on_cancel: impl FnOnce() + Send + 'static) -> Self {
        self.on_cancel = Some(Box::new(on_cancel));
        self
    }

    /// Wait for the next event; `None` once the producer is gone
    pub async fn recv(&mut self) -> Option<FloatEvent> {
        self.events.recv().await
    }
}

impl Drop for FloatSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.on_cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for FloatSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloatSubscription")
            .field("has_cancel", &self.on_cancel.is_some())
            .finish()
    }
}

/// Ticket submission and balance tracking for senders.
///
/// Implemented by the Float Authority the relay wraps, and by the client
/// proxy that reaches it over the wire.
#[async_trait]
pub trait SenderMonitor: Send + Sync {
    /// Submit a ticket for asynchronous redemption
    async fn queue_ticket(&self, ticket: SignedTicket) -> RelayResult<()>;

    /// Current max float for a sender
    async fn max_float(&self, sender: Address) -> RelayResult<U256>;

    /// Fail if the sender should not be accepted for new work
    async fn validate_sender(&self, sender: Address) -> RelayResult<()>;

    /// Subscribe to max float changes for a sender
    fn subscribe_max_float(&self, sender: Address) -> FloatSubscription;
}

/// Local source of sender deposit state
#[async_trait]
pub trait SenderInfoSource: Send + Sync {
    /// Look up deposit state for a sender
    async fn sender_info(&self, sender: Address) -> RelayResult<SenderInfo>;
}

/// Source of protocol round progress
pub trait RoundSource: Send + Sync {
    /// Most recently initialized round
    fn last_initialized_round(&self) -> U256;
}

/// Local per-sender bookkeeping that must not outlive cached balances
pub trait SenderStateStore: Send + Sync {
    /// Drop everything held for a sender
    fn clear(&self, sender: Address);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_subscription_ends_when_sink_dropped() {
        let (sink, mut sub) = FloatSubscription::channel();
        sink.send(FloatEvent::Update(Some(U256::from(5u64)))).unwrap();
        drop(sink);

        assert_eq!(sub.recv().await, Some(FloatEvent::Update(Some(U256::from(5u64)))));
        assert_eq!(sub.recv().await, None);
    }

    #[test]
    fn test_cancel_hook_runs_once_on_drop() {
        let cancelled = Arc::new(AtomicUsize::new(0));
        let counter = cancelled.clone();
        let (_sink, sub) = FloatSubscription::channel();
        let sub = sub.with_cancel(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        drop(sub);
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }
}
