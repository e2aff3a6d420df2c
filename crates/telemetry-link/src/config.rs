//! Client configuration and reconnect policy.

use std::time::Duration;

/// Reconnect policy for unexpected closes.
///
/// The attempt counter starts at zero and is reset to zero whenever a
/// connection opens successfully. Once `max_attempts` consecutive attempts
/// have been scheduled without a successful open, the client stops retrying
/// until the caller connects explicitly.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Maximum number of automatic reconnect attempts.
    pub max_attempts: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Cap on the computed delay in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
        }
    }
}

impl ReconnectPolicy {
    /// Calculate the backoff delay for a given attempt number (1-indexed).
    ///
    /// Delay for attempt `n` is `min(base * 2^n, cap)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Link client configuration.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Reconnect policy applied after unexpected closes.
    pub reconnect: ReconnectPolicy,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            event_capacity: 256,
        }
    }
}
