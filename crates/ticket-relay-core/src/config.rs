//! Relay and proxy configuration
//!
//! Durations are stored as integer milliseconds so the structs read cleanly
//! from TOML; accessors hand out [`Duration`]s.

use std::time::Duration;

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::errors::{RelayError, RelayResult};
use crate::rpc::DEFAULT_MAX_FRAME_SIZE;

const HOUR_MS: u64 = 60 * 60 * 1000;

/// Server-side relay configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address tickets must be redeemable by
    pub recipient: Address,

    /// Idle time after which a sender stops being tracked
    pub liveness_window_ms: u64,

    /// How often the liveness sweep runs
    pub cleanup_interval_ms: u64,

    /// Maximum frame payload in bytes
    pub max_frame_size: usize,

    /// Updates queued per stream subscriber before it is dropped as stalled
    pub subscriber_buffer: usize,

    /// Bound on writing one update to a stream subscriber
    pub stream_write_timeout_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            recipient: Address::ZERO,
            liveness_window_ms: HOUR_MS,
            cleanup_interval_ms: HOUR_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            subscriber_buffer: 1024,
            stream_write_timeout_ms: 10_000,
        }
    }
}

impl RelayConfig {
    /// Default configuration for a recipient
    pub fn new(recipient: Address) -> Self {
        Self {
            recipient,
            ..Default::default()
        }
    }

    /// Short windows for tests
    pub fn for_testing(recipient: Address) -> Self {
        Self {
            recipient,
            liveness_window_ms: 200,
            cleanup_interval_ms: 50,
            subscriber_buffer: 64,
            stream_write_timeout_ms: 1_000,
            ..Default::default()
        }
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(text: &str) -> RelayResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RelayError::config(format!("invalid relay config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Liveness window as a duration
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Cleanup interval as a duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Stream write timeout as a duration
    pub fn stream_write_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_write_timeout_ms)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> RelayResult<()> {
        if self.recipient == Address::ZERO {
            return Err(RelayError::config("must provide a recipient"));
        }
        if self.liveness_window_ms == 0 {
            return Err(RelayError::config("liveness_window_ms must be greater than 0"));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(RelayError::config("cleanup_interval_ms must be greater than 0"));
        }
        if self.max_frame_size == 0 {
            return Err(RelayError::config("max_frame_size must be greater than 0"));
        }
        if self.subscriber_buffer == 0 {
            return Err(RelayError::config("subscriber_buffer must be greater than 0"));
        }
        if self.stream_write_timeout_ms == 0 {
            return Err(RelayError::config(
                "stream_write_timeout_ms must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Backoff for re-opening the proxy's update stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound on the delay between retries
    pub max_delay_ms: u64,
    /// Backoff multiplier (e.g., 2.0 for doubling)
    pub backoff_multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(32) as i32);
        let delay = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

/// Client-side proxy configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Relay address as `host:port`
    pub relay_addr: String,

    /// Bound on establishing a connection
    pub connect_timeout_ms: u64,

    /// Bound on a whole unary call
    pub call_timeout_ms: u64,

    /// Idle time after which a cached balance is evicted
    pub liveness_window_ms: u64,

    /// How often the cache sweep runs
    pub cleanup_interval_ms: u64,

    /// Maximum frame payload in bytes
    pub max_frame_size: usize,

    /// Update stream reconnect behavior
    pub reconnect: ReconnectConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            relay_addr: String::new(),
            connect_timeout_ms: 3_000,
            call_timeout_ms: 8_000,
            liveness_window_ms: HOUR_MS,
            cleanup_interval_ms: HOUR_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ProxyConfig {
    /// Default configuration for a relay address
    pub fn new(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            ..Default::default()
        }
    }

    /// Short timeouts and windows for tests
    pub fn for_testing(relay_addr: impl Into<String>) -> Self {
        Self {
            relay_addr: relay_addr.into(),
            connect_timeout_ms: 1_000,
            call_timeout_ms: 2_000,
            liveness_window_ms: 200,
            cleanup_interval_ms: 50,
            reconnect: ReconnectConfig {
                base_delay_ms: 20,
                max_delay_ms: 200,
                backoff_multiplier: 2.0,
            },
            ..Default::default()
        }
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(text: &str) -> RelayResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RelayError::config(format!("invalid proxy config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Connect timeout as a duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Unary call timeout as a duration
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Liveness window as a duration
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    /// Cleanup interval as a duration
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Validate configuration settings
    pub fn validate(&self) -> RelayResult<()> {
        if self.relay_addr.is_empty() {
            return Err(RelayError::config("must provide a relay address"));
        }
        if self.connect_timeout_ms == 0 || self.call_timeout_ms == 0 {
            return Err(RelayError::config("timeouts must be greater than 0"));
        }
        if self.liveness_window_ms == 0 || self.cleanup_interval_ms == 0 {
            return Err(RelayError::config(
                "liveness_window_ms and cleanup_interval_ms must be greater than 0",
            ));
        }
        if self.max_frame_size == 0 {
            return Err(RelayError::config("max_frame_size must be greater than 0"));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(RelayError::config(
                "reconnect.base_delay_ms must not exceed reconnect.max_delay_ms",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_relay_defaults_use_one_hour_windows() {
        let config = RelayConfig::new(Address::repeat_byte(1));
        assert_eq!(config.liveness_window(), Duration::from_secs(3600));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_recipient_is_a_config_error() {
        let err = RelayConfig::default().validate().unwrap_err();
        assert_matches!(err, RelayError::Config { .. });
    }

    #[test]
    fn test_relay_config_from_toml() {
        let config = RelayConfig::from_toml_str(
            r#"
            recipient = "0x1111111111111111111111111111111111111111"
            liveness_window_ms = 60000
            "#,
        )
        .unwrap();
        assert_eq!(config.recipient, Address::repeat_byte(0x11));
        assert_eq!(config.liveness_window(), Duration::from_secs(60));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(3600));
        assert_eq!(config.subscriber_buffer, 1024);
    }

    #[test]
    fn test_zero_subscriber_buffer_is_rejected() {
        let config = RelayConfig {
            subscriber_buffer: 0,
            ..RelayConfig::for_testing(Address::repeat_byte(1))
        };
        assert_eq!(
            config.validate(),
            Err(RelayError::config("subscriber_buffer must be greater than 0"))
        );
    }

    #[test]
    fn test_proxy_config_from_toml() {
        let config = ProxyConfig::from_toml_str(
            r#"
            relay_addr = "127.0.0.1:8935"
            call_timeout_ms = 1000

            [reconnect]
            base_delay_ms = 100
            "#,
        )
        .unwrap();
        assert_eq!(config.relay_addr, "127.0.0.1:8935");
        assert_eq!(config.call_timeout(), Duration::from_secs(1));
        assert_eq!(config.connect_timeout(), Duration::from_secs(3));
        assert_eq!(config.reconnect.base_delay_ms, 100);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_proxy_config_requires_address() {
        let err = ProxyConfig::from_toml_str("call_timeout_ms = 10").unwrap_err();
        assert_matches!(err, RelayError::Config { .. });
    }

    #[test]
    fn test_reconnect_backoff_is_capped() {
        let config = ReconnectConfig {
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(1_000));
    }
}
