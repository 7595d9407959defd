use derive_more::Constructor;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default delay before the first reconnect attempt.
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_secs(1);

/// Default upper bound on any reconnect delay.
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_secs(30);

/// Exponential reconnect backoff: `delay(n) = min(max, base * 2^(n-1))` for the n'th
/// consecutive failed attempt (n >= 1).
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize, Constructor)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_RECONNECT_BASE, DEFAULT_RECONNECT_MAX)
    }
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base
            .checked_mul(1_u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }
}
