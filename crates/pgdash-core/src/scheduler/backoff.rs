//! Reconnect delay policy.

use std::time::Duration;

use crate::config::MonitorConfig;

/// Exponential backoff: `base * 2^n`, capped, with an optional attempt limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
    max_attempts: Option<u32>,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            base,
            cap,
            max_attempts,
        }
    }

    pub fn from_config(config: &MonitorConfig) -> Self {
        Self::new(config.backoff_base, config.backoff_cap, config.reconnect_limit())
    }

    /// Delay before retry number `retry` (0-based).
    pub fn delay(&self, retry: u32) -> Duration {
        self.base
            .saturating_mul(2u32.saturating_pow(retry))
            .min(self.cap)
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt <= max)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}
