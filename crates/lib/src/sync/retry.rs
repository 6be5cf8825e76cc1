//! Bounded exponential backoff for message loads.

use crate::config::SyncConfig;
use std::time::Duration;

/// Total attempts and the delay before the first retry; each further retry doubles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    /// `attempts` below 1 is treated as 1 (a single try, no retry).
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(config.load_attempts, config.retry_base_delay())
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Delay to wait after `attempt` (0-based) failed, or `None` when it was the last one.
    pub fn delay_after(&self, attempt: u32) -> Option<Duration> {
        if attempt.saturating_add(1) >= self.attempts {
            return None;
        }
        let factor = 1u32 << attempt.min(16);
        Some(self.base_delay.saturating_mul(factor))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}
