//! Ticket relay testing infrastructure
//!
//! Doubles for every collaborator the relay and proxy consume, ticket
//! fixtures, and a harness that serves a relay on a loopback port.
//!
//! ```toml
//! [dev-dependencies]
//! relay-testkit = { package = "ticket-relay-testkit", path = "../ticket-relay-testkit" }
//! ```

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

pub mod authority;
pub mod collaborators;
pub mod fixtures;
pub mod harness;

pub use authority::MemoryFloatAuthority;
pub use collaborators::{FixedRounds, RecordingStateStore, StaticSenderInfo};
pub use fixtures::{address, half_win_prob, recipient, sample_ticket};
pub use harness::{
    connect_proxy, eventually, init_tracing, spawn_relay, spawn_relay_with, ProxyDoubles,
    RelayHarness,
};
