use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const MAX_RETRIES: u32 = 3;

/// Exponential backoff with a bounded number of retries.
///
/// The delay before retry `n + 1` is `base * 2^n`; after `max_retries`
/// retries the item is given up. An always-failing item is therefore
/// attempted `max_retries + 1` times.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            base_delay_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay_ms: base_delay.as_millis() as u64,
        }
    }

    /// Delay before the next attempt of an item that has already been
    /// retried `retry_count` times, or `None` once the budget is spent.
    pub fn next_delay(&self, retry_count: u32) -> Option<Duration> {
        if retry_count >= self.max_retries {
            return None;
        }
        let factor = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        Some(Duration::from_millis(self.base_delay_ms.saturating_mul(factor)))
    }
}
