//! Behavior configuration.

use std::time::Duration;

use crate::error::{BehaviorError, BehaviorResult};

/// Default ping interval.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay before the first ping after attach.
pub const DEFAULT_FIRST_PING_DELAY: Duration = Duration::from_secs(5);

/// Configuration for the keepalive behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeepAliveConfig {
    /// Interval between ping messages.
    pub ping_interval: Duration,

    /// Delay before the first ping after attach.
    pub first_ping_delay: Duration,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            first_ping_delay: DEFAULT_FIRST_PING_DELAY,
        }
    }
}

impl KeepAliveConfig {
    /// Create a configuration with the specified ping interval.
    pub fn new(ping_interval: Duration) -> Self {
        Self {
            ping_interval,
            ..Default::default()
        }
    }

    /// Set the ping interval.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Set the delay before the first ping.
    pub fn with_first_ping_delay(mut self, delay: Duration) -> Self {
        self.first_ping_delay = delay;
        self
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> BehaviorResult<()> {
        if self.ping_interval.is_zero() {
            return Err(BehaviorError::InvalidArgument(
                "ping interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}
