//! Ticket relay client
//!
//! [`RedemptionProxy`] stands in for a local Float Authority on an issuing
//! node: tickets go to the shared relay, max float reads come from a cache
//! fed by the relay's update stream.

#![forbid(unsafe_code)]

pub mod cache;
pub mod proxy;
pub mod rpc;

pub use cache::BalanceCache;
pub use proxy::{ProxyBuilder, ProxyStatus, RedemptionProxy};
pub use rpc::{MonitorStream, RelayRpcClient};
