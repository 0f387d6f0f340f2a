//! In-memory Float Authority

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    Address, FloatEvent, FloatSink, FloatSubscription, RelayError, RelayResult, SenderMonitor,
    SignedTicket, U256,
};

#[derive(Default)]
struct AuthorityState {
    max_floats: HashMap<Address, U256>,
    sinks: HashMap<Address, Vec<FloatSink>>,
    queued: Vec<SignedTicket>,
    reject: Option<String>,
}

/// Float Authority double driven directly by tests.
///
/// Balances change only when a test calls [`set_max_float`](Self::set_max_float);
/// every change is pushed to the sender's open subscriptions.
#[derive(Default)]
pub struct MemoryFloatAuthority {
    state: Mutex<AuthorityState>,
    subscribe_calls: AtomicUsize,
    max_float_calls: AtomicUsize,
    active_subscriptions: Arc<AtomicUsize>,
}

impl MemoryFloatAuthority {
    /// Create an authority with no senders
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear a sender's max float and notify its subscribers
    pub fn set_max_float(&self, sender: Address, max_float: Option<U256>) {
        let mut state = self.state.lock();
        match max_float {
            Some(value) => state.max_floats.insert(sender, value),
            None => state.max_floats.remove(&sender),
        };
        if let Some(sinks) = state.sinks.get_mut(&sender) {
            sinks.retain(|sink| sink.send(FloatEvent::Update(max_float)).is_ok());
        }
    }

    /// Push a transient error to a sender's subscribers
    pub fn push_error(&self, sender: Address, reason: impl Into<String>) {
        let reason = reason.into();
        let mut state = self.state.lock();
        if let Some(sinks) = state.sinks.get_mut(&sender) {
            sinks.retain(|sink| sink.send(FloatEvent::Error(reason.clone())).is_ok());
        }
    }

    /// End every open subscription for a sender
    pub fn close_subscriptions(&self, sender: Address) {
        self.state.lock().sinks.remove(&sender);
    }

    /// Reject every ticket with `reason`, or accept again with `None`
    pub fn reject_tickets(&self, reason: Option<String>) {
        self.state.lock().reject = reason;
    }

    /// Tickets accepted so far
    pub fn queued_tickets(&self) -> Vec<SignedTicket> {
        self.state.lock().queued.clone()
    }

    /// Number of `subscribe_max_float` calls
    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }

    /// Number of `max_float` calls
    pub fn max_float_calls(&self) -> usize {
        self.max_float_calls.load(Ordering::SeqCst)
    }

    /// Subscriptions not yet dropped by their holder
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SenderMonitor for MemoryFloatAuthority {
    async fn queue_ticket(&self, ticket: SignedTicket) -> RelayResult<()> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.reject {
            return Err(RelayError::delegated(reason.clone()));
        }
        state.queued.push(ticket);
        Ok(())
    }

    async fn max_float(&self, sender: Address) -> RelayResult<U256> {
        self.max_float_calls.fetch_add(1, Ordering::SeqCst);
        self.state
            .lock()
            .max_floats
            .get(&sender)
            .copied()
            .ok_or_else(|| RelayError::delegated(format!("no max float known for {sender}")))
    }

    async fn validate_sender(&self, _sender: Address) -> RelayResult<()> {
        Ok(())
    }

    fn subscribe_max_float(&self, sender: Address) -> FloatSubscription {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        self.active_subscriptions.fetch_add(1, Ordering::SeqCst);

        let (sink, subscription) = FloatSubscription::channel();
        self.state.lock().sinks.entry(sender).or_default().push(sink);

        let active = self.active_subscriptions.clone();
        subscription.with_cancel(move || {
            active.fetch_sub(1, Ordering::SeqCst);
        })
    }
}
