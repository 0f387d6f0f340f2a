//! Ticket relay server
//!
//! The server half of the ticket redemption relay. Many issuing nodes share
//! one relay process, which:
//! - accepts tickets and hands them to the Float Authority
//! - runs one balance monitor per recently active sender
//! - fans every max float change out to every streaming subscriber
//! - evicts senders that have gone idle, stopping their monitors
//!
//! Subscribers receive changes for all senders and filter on their side;
//! the registry keeps no per-subscriber interest list.

#![forbid(unsafe_code)]

pub mod liveness;
pub mod registry;
pub mod relay;
pub mod server;

pub use liveness::{LivenessTracker, MonitorLease, Touch};
pub use registry::{FanoutRegistry, Mailbox, SubscriberId};
pub use relay::{
    RedemptionRelay, RelayBuilder, RelayStatus, StreamEnd, StreamSendError, UpdateStream,
};
pub use server::RelayServer;
