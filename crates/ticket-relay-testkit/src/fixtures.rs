//! Deterministic addresses and tickets

use relay_core::{Address, SignedTicket, B256, U256};

/// Address with every byte set to `seed`
pub fn address(seed: u8) -> Address {
    Address::repeat_byte(seed)
}

/// Recipient used by every harness relay
pub fn recipient() -> Address {
    address(0xee)
}

/// Win probability representing 50%
pub fn half_win_prob() -> U256 {
    U256::MAX / U256::from(2u64)
}

/// Fully populated ticket from `sender` worth `face_value`
pub fn sample_ticket(sender: Address, face_value: u64) -> SignedTicket {
    SignedTicket {
        sender,
        recipient: recipient(),
        face_value: U256::from(face_value),
        win_prob: half_win_prob(),
        sender_nonce: 1,
        recipient_rand_hash: B256::repeat_byte(0x5a),
        creation_round: 100,
        creation_round_block_hash: B256::repeat_byte(0xa5),
        params_expiration_block: U256::from(10_000u64),
        recipient_rand: U256::from(0x1234_5678u64),
        sig: vec![0x1b; 65],
    }
}
