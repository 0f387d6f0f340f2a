//! Doubles for the proxy's local collaborators

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use relay_core::{
    Address, RelayError, RelayResult, RoundSource, SenderInfo, SenderInfoSource,
    SenderStateStore, U256,
};

/// Sender info looked up from a fixed table; unknown senders fail
#[derive(Default)]
pub struct StaticSenderInfo {
    senders: Mutex<HashMap<Address, SenderInfo>>,
}

impl StaticSenderInfo {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the info returned for `sender`
    pub fn set(&self, sender: Address, info: SenderInfo) {
        self.senders.lock().insert(sender, info);
    }

    /// Builder-style [`set`](Self::set)
    pub fn with_sender(self, sender: Address, info: SenderInfo) -> Self {
        self.set(sender, info);
        self
    }
}

#[async_trait]
impl SenderInfoSource for StaticSenderInfo {
    async fn sender_info(&self, sender: Address) -> RelayResult<SenderInfo> {
        self.senders
            .lock()
            .get(&sender)
            .copied()
            .ok_or_else(|| RelayError::delegated("unknown sender"))
    }
}

/// Round source stuck at a settable round
pub struct FixedRounds {
    round: Mutex<U256>,
}

impl FixedRounds {
    /// Start at `round`
    pub fn new(round: u64) -> Self {
        Self {
            round: Mutex::new(U256::from(round)),
        }
    }

    /// Move to `round`
    pub fn set(&self, round: u64) {
        *self.round.lock() = U256::from(round);
    }
}

impl RoundSource for FixedRounds {
    fn last_initialized_round(&self) -> U256 {
        *self.round.lock()
    }
}

/// Sender state store that records every clear
#[derive(Default)]
pub struct RecordingStateStore {
    cleared: Mutex<Vec<Address>>,
}

impl RecordingStateStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Every cleared sender, in order
    pub fn cleared(&self) -> Vec<Address> {
        self.cleared.lock().clone()
    }

    /// How many times `sender` was cleared
    pub fn clear_count(&self, sender: &Address) -> usize {
        self.cleared.lock().iter().filter(|s| *s == sender).count()
    }
}

impl SenderStateStore for RecordingStateStore {
    fn clear(&self, sender: Address) {
        self.cleared.lock().push(sender);
    }
}
