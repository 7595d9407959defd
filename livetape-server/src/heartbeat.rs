use serde::{Deserialize, Serialize};
use tokio::time::Instant;

const BUCKET_MS: i64 = 1_000;

/// Latest known price, re-emitted by the heartbeat.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct PriceTick {
    pub price: f64,
    /// Epoch milliseconds.
    pub ts: i64,
}

/// Re-emits the latest price at most once per one-second bucket.
#[derive(Copy, Clone, Debug, Default)]
pub struct PriceHeartbeat {
    last_bucket: Option<i64>,
}

impl PriceHeartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a [`PriceTick`] if a price is known and the second bucket of `now_ms` differs from
    /// the last emission.
    pub fn tick(&mut self, now_ms: i64, price: Option<f64>) -> Option<PriceTick> {
        let price = price?;
        let bucket = now_ms.div_euclid(BUCKET_MS);

        if self.last_bucket == Some(bucket) {
            return None;
        }

        self.last_bucket = Some(bucket);
        Some(PriceTick { price, ts: now_ms })
    }
}

/// Wall clock anchored once and advanced by tokio's monotonic clock, so epoch milliseconds
/// follow [`tokio::time::pause`] / [`tokio::time::advance`] in tests.
#[derive(Copy, Clone, Debug)]
pub struct MonotonicClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::starting_at(chrono::Utc::now().timestamp_millis())
    }

    pub fn starting_at(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }

    pub fn now_ms(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.anchor_ms.saturating_add(elapsed)
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
