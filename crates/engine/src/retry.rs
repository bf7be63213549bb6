//! Bounded exponential-backoff retry policy for dispatch attempts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Attempt `k` (0-indexed) that fails recoverably is followed by a wait of
/// `min(max_delay, base_delay * 2^k)` before attempt `k + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total dispatch attempts, the initial one included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `retry` (0-indexed).
    pub fn delay_for(&self, retry: u32) -> Duration {
        // 2^31 already dwarfs any sane cap; clamp the shift to avoid overflow.
        let factor = 1u32.checked_shl(retry.min(31)).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether another attempt is allowed after `attempts_made` attempts.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Rejects policies that could never dispatch or whose base exceeds the cap.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("max_attempts must be at least 1".into());
        }
        if self.base_delay > self.max_delay {
            return Err(format!(
                "backoff base {:?} exceeds cap {:?}",
                self.base_delay, self.max_delay
            ));
        }
        Ok(())
    }
}
