//! Wire messages and the codec between them and the domain model
//!
//! Big-width integers travel as minimal big-endian byte strings, addresses
//! and hashes as fixed-size byte strings. Decoding never fails: missing
//! groups and malformed integers decode to zero values.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};

use crate::types::{MaxFloatUpdate, SignedTicket};

/// Ticket parameters group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketParams {
    /// Recipient address bytes
    pub recipient: Vec<u8>,
    /// Face value, big-endian
    pub face_value: Vec<u8>,
    /// Win probability, big-endian
    pub win_prob: Vec<u8>,
    /// Recipient random hash bytes
    pub recipient_rand_hash: Vec<u8>,
    /// Parameter expiration block, big-endian
    pub expiration_block: Vec<u8>,
}

/// Sender parameters group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSenderParams {
    /// Sender nonce
    pub sender_nonce: u32,
    /// Sender signature
    pub sig: Vec<u8>,
}

/// Expiration parameters group
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketExpirationParams {
    /// Creation round
    pub creation_round: i64,
    /// Creation round block hash bytes
    pub creation_round_block_hash: Vec<u8>,
}

/// A signed ticket as it travels on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketWire {
    /// Sender address bytes
    pub sender: Vec<u8>,
    /// Recipient random value, big-endian
    pub recipient_rand: Vec<u8>,
    /// Ticket parameters
    pub ticket_params: Option<TicketParams>,
    /// Sender parameters
    pub sender_params: Option<TicketSenderParams>,
    /// Expiration parameters
    pub expiration_params: Option<TicketExpirationParams>,
}

/// Point query for a sender's max float
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxFloatRequest {
    /// Sender address bytes
    pub sender: Vec<u8>,
}

/// Opens the max float update stream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorMaxFloatRequest {}

/// Acknowledges a queued ticket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueTicketAck {}

/// Max float value for a sender; an empty `max_float` means no value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxFloatValue {
    /// Sender address bytes
    pub sender: Vec<u8>,
    /// Max float bytes
    pub max_float: Vec<u8>,
}

// =============================================================================
// Primitive conversions
// =============================================================================

fn fixed_from_bytes<const N: usize>(bytes: &[u8]) -> [u8; N] {
    // Left-pad short input, keep the trailing N bytes of long input.
    let mut out = [0u8; N];
    let tail = &bytes[bytes.len().saturating_sub(N)..];
    out[N - tail.len()..].copy_from_slice(tail);
    out
}

/// Decode an address, left-padding or truncating to 20 bytes
pub fn address_from_bytes(bytes: &[u8]) -> Address {
    Address::from(fixed_from_bytes::<20>(bytes))
}

/// Decode a 32-byte hash, left-padding or truncating
pub fn hash_from_bytes(bytes: &[u8]) -> B256 {
    B256::from(fixed_from_bytes::<32>(bytes))
}

/// Decode a big-endian unsigned integer; empty or oversized input is zero
pub fn uint_from_be(bytes: &[u8]) -> U256 {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    let significant = &bytes[first..];
    if significant.is_empty() {
        return U256::ZERO;
    }
    U256::try_from_be_slice(significant).unwrap_or(U256::ZERO)
}

/// Encode an unsigned integer as minimal big-endian bytes (zero is empty)
pub fn uint_to_be(value: &U256) -> Vec<u8> {
    let bytes = value.to_be_bytes::<32>();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

/// Encode an optional max float.
///
/// `None` is the empty string. A present zero is a single `0x00` byte so it
/// stays distinct from "no value".
pub fn encode_max_float(value: Option<U256>) -> Vec<u8> {
    match value {
        None => Vec::new(),
        Some(v) if v.is_zero() => vec![0u8],
        Some(v) => uint_to_be(&v),
    }
}

/// Decode an optional max float; empty bytes mean no value
pub fn decode_max_float(bytes: &[u8]) -> Option<U256> {
    if bytes.is_empty() {
        None
    } else {
        Some(uint_from_be(bytes))
    }
}

// =============================================================================
// Ticket codec
// =============================================================================

/// Convert a wire ticket into the domain ticket
pub fn ticket_from_wire(wire: &TicketWire) -> SignedTicket {
    let params = wire.ticket_params.clone().unwrap_or_default();
    let sender_params = wire.sender_params.clone().unwrap_or_default();
    let expiration = wire.expiration_params.clone().unwrap_or_default();

    SignedTicket {
        sender: address_from_bytes(&wire.sender),
        recipient: address_from_bytes(&params.recipient),
        face_value: uint_from_be(&params.face_value),
        win_prob: uint_from_be(&params.win_prob),
        sender_nonce: sender_params.sender_nonce,
        recipient_rand_hash: hash_from_bytes(&params.recipient_rand_hash),
        creation_round: expiration.creation_round,
        creation_round_block_hash: hash_from_bytes(&expiration.creation_round_block_hash),
        params_expiration_block: uint_from_be(&params.expiration_block),
        recipient_rand: uint_from_be(&wire.recipient_rand),
        sig: sender_params.sig,
    }
}

/// Convert a domain ticket into its wire form
pub fn ticket_to_wire(ticket: &SignedTicket) -> TicketWire {
    TicketWire {
        sender: ticket.sender.to_vec(),
        // Carries the revealed random value; the recipient address travels
        // in the params group.
        recipient_rand: uint_to_be(&ticket.recipient_rand),
        ticket_params: Some(TicketParams {
            recipient: ticket.recipient.to_vec(),
            face_value: uint_to_be(&ticket.face_value),
            win_prob: uint_to_be(&ticket.win_prob),
            recipient_rand_hash: ticket.recipient_rand_hash.to_vec(),
            expiration_block: uint_to_be(&ticket.params_expiration_block),
        }),
        sender_params: Some(TicketSenderParams {
            sender_nonce: ticket.sender_nonce,
            sig: ticket.sig.clone(),
        }),
        expiration_params: Some(TicketExpirationParams {
            creation_round: ticket.creation_round,
            creation_round_block_hash: ticket.creation_round_block_hash.to_vec(),
        }),
    }
}

/// Convert a wire max float value into a domain update
pub fn update_from_wire(wire: &MaxFloatValue) -> MaxFloatUpdate {
    MaxFloatUpdate {
        sender: address_from_bytes(&wire.sender),
        max_float: decode_max_float(&wire.max_float),
    }
}

/// Convert a domain update into its wire form
pub fn update_to_wire(update: &MaxFloatUpdate) -> MaxFloatValue {
    MaxFloatValue {
        sender: update.sender.to_vec(),
        max_float: encode_max_float(update.max_float),
    }
}
