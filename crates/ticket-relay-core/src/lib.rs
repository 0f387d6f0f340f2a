//! Ticket relay core
//!
//! Shared foundation for the ticket redemption relay and its client proxy:
//! the signed ticket model, the wire codec, length-prefixed RPC framing,
//! configuration, the unified error type, collaborator traits, and the
//! shutdown/task registry used by every background loop.

#![forbid(unsafe_code)]

pub mod config;
pub mod effects;
pub mod errors;
pub mod rpc;
pub mod tasks;
pub mod types;
pub mod wire;

pub use config::{ProxyConfig, ReconnectConfig, RelayConfig};
pub use effects::{
    FloatEvent, FloatSink, FloatSubscription, RoundSource, SenderInfoSource, SenderMonitor,
    SenderStateStore,
};
pub use errors::{RelayError, RelayResult};
pub use rpc::{RelayRequest, RelayResponse, RpcReply, RpcStatus, StatusCode};
pub use tasks::{ShutdownSignal, ShutdownTrigger, TaskRegistry};
pub use types::{MaxFloatUpdate, SenderInfo, SignedTicket};

// Chain primitives used across the public API
pub use alloy_primitives::{Address, B256, U256};
