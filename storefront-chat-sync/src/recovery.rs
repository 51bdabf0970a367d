//! Reconnection Policy
//!
//! Bounded attempt count with a fixed delay between attempts. The strategy is
//! reset every time the channel reaches `Connected`.

use std::time::Duration;

use crate::config::{ChannelConfig, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY_MS};

/// Reconnection strategy with a fixed delay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectionStrategy {
    /// Attempts made since the last reset
    pub attempt: u32,
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Delay before each attempt
    pub delay: Duration,
}

impl Default for ReconnectionStrategy {
    fn default() -> Self {
        Self::new(
            DEFAULT_RECONNECT_ATTEMPTS,
            Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
        )
    }
}

impl From<&ChannelConfig> for ReconnectionStrategy {
    fn from(config: &ChannelConfig) -> Self {
        Self::new(config.reconnect_attempts, config.reconnect_delay())
    }
}

impl ReconnectionStrategy {
    /// Create a new reconnection strategy
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            delay,
        }
    }

    /// Reset the strategy
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Check if more attempts are available
    pub fn has_attempts_remaining(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Consume one attempt, returning the delay to wait before it
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.has_attempts_remaining() {
            return None;
        }

        self.attempt += 1;
        Some(self.delay)
    }

    /// Get human-readable status
    pub fn status(&self) -> String {
        format!(
            "Attempt {}/{}, delay: {:?}",
            self.attempt, self.max_attempts, self.delay
        )
    }
}
