//! Domain types for probabilistic micropayment tickets and sender balances

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

/// A signed probabilistic micropayment ticket.
///
/// Created by the issuer and never mutated afterwards; the relay only holds
/// one long enough to hand it to the Float Authority.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTicket {
    /// Payer whose deposit backs the ticket
    pub sender: Address,
    /// Payee allowed to redeem the ticket
    pub recipient: Address,
    /// Amount paid out if the ticket wins
    pub face_value: U256,
    /// Win probability as a fraction of `U256::MAX`
    pub win_prob: U256,
    /// Monotonic per-sender nonce
    pub sender_nonce: u32,
    /// Commitment to the recipient's secret random value
    pub recipient_rand_hash: B256,
    /// Round in which the ticket was created
    pub creation_round: i64,
    /// Block hash anchoring the creation round
    pub creation_round_block_hash: B256,
    /// Block after which the ticket parameters expire
    pub params_expiration_block: U256,
    /// Recipient random value revealed to prove a win
    pub recipient_rand: U256,
    /// Sender signature over the ticket fields
    pub sig: Vec<u8>,
}

/// Balance change for one sender, as broadcast to stream subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxFloatUpdate {
    /// Sender whose max float changed
    pub sender: Address,
    /// New max float, or `None` when no value is available
    pub max_float: Option<U256>,
}

impl MaxFloatUpdate {
    /// Create an update carrying a value
    pub fn new(sender: Address, max_float: U256) -> Self {
        Self {
            sender,
            max_float: Some(max_float),
        }
    }

    /// Create an update signalling that no value is available
    pub fn unavailable(sender: Address) -> Self {
        Self {
            sender,
            max_float: None,
        }
    }
}

/// Locally known deposit state for a sender
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Locked deposit
    pub deposit: U256,
    /// Round at which deposit and reserve unlock; zero when no unlock is pending
    pub withdraw_round: U256,
}
