use livetape_data::{Candle, Trade};

/// Result of applying one trade to a [`CandleSeries`].
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum TradeOutcome {
    /// A candle was created for the trade's bucket.
    Opened(Candle),
    /// The candle already covering the trade's bucket was extended.
    Extended(Candle),
    /// The trade's bucket is older than every retained candle of a full series.
    Expired,
}

/// Bounded candle series, always sorted ascending by `start_time` with unique buckets.
///
/// Only the most recent `capacity` candles are retained, the oldest being evicted first.
#[derive(Clone, Debug)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    capacity: usize,
}

impl CandleSeries {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            candles: Vec::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// The most recent `limit` candles, oldest first.
    pub fn tail(&self, limit: usize) -> &[Candle] {
        &self.candles[self.candles.len().saturating_sub(limit)..]
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// Replace the whole series with authoritative candles, sorted by `start_time` and
    /// trimmed to capacity. Where the input repeats a bucket, its later entry wins.
    ///
    /// Returns true if the last candle changed materially (`start_time`, `close` or `volume`).
    pub fn resync_from_authoritative<I>(&mut self, series: I) -> bool
    where
        I: IntoIterator<Item = Candle>,
    {
        let previous = self.last().copied();

        let mut candles = series.into_iter().collect::<Vec<_>>();
        candles.sort_by_key(|candle| candle.start_time);
        candles.dedup_by(|next, kept| {
            if next.start_time == kept.start_time {
                *kept = *next;
                true
            } else {
                false
            }
        });

        self.candles = candles;
        self.trim();

        materially_changed(previous.as_ref(), self.last())
    }

    /// Replace the candle with an equal `start_time`, otherwise insert it and re-sort.
    pub fn upsert(&mut self, candle: Candle) {
        match self
            .candles
            .iter_mut()
            .rev()
            .find(|existing| existing.start_time == candle.start_time)
        {
            Some(existing) => *existing = candle,
            None => {
                self.candles.push(candle);
                self.candles.sort_by_key(|candle| candle.start_time);
                self.trim();
            }
        }
    }

    /// Fold a trade into the candle for bucket `floor(ts / interval_ms) * interval_ms`.
    ///
    /// A trade for a bucket newer than the last candle closes the last candle and opens a new
    /// one seeded at the trade price. A trade for an existing bucket extends it. A late trade
    /// for a missing bucket inserts a candle at its sorted position.
    pub fn apply_trade(&mut self, trade: &Trade, interval_ms: i64) -> TradeOutcome {
        let bucket = bucket_start(trade.ts, interval_ms);

        let last_start = match self.candles.last() {
            Some(last) => last.start_time,
            None => return self.push_seeded(bucket, trade),
        };

        if bucket > last_start {
            if let Some(last) = self.candles.last_mut() {
                last.is_closed = true;
            }
            return self.push_seeded(bucket, trade);
        }

        match self.candles.binary_search_by_key(&bucket, |candle| candle.start_time) {
            Ok(index) => {
                let existing = &mut self.candles[index];
                extend(existing, trade);
                TradeOutcome::Extended(*existing)
            }
            Err(0) if self.candles.len() >= self.capacity => TradeOutcome::Expired,
            Err(index) => {
                let candle = Candle::seeded(bucket, trade.price, trade.qty);
                self.candles.insert(index, candle);
                self.trim();
                TradeOutcome::Opened(candle)
            }
        }
    }

    fn push_seeded(&mut self, bucket: i64, trade: &Trade) -> TradeOutcome {
        let candle = Candle::seeded(bucket, trade.price, trade.qty);
        self.candles.push(candle);
        self.trim();
        TradeOutcome::Opened(candle)
    }

    fn trim(&mut self) {
        if self.candles.len() > self.capacity {
            let excess = self.candles.len() - self.capacity;
            self.candles.drain(..excess);
        }
    }
}

/// Align an epoch millisecond timestamp to the start of its bucket.
pub fn bucket_start(ts: i64, interval_ms: i64) -> i64 {
    let interval_ms = interval_ms.max(1);
    ts.div_euclid(interval_ms) * interval_ms
}

fn extend(candle: &mut Candle, trade: &Trade) {
    candle.high = candle.high.max(trade.price);
    candle.low = candle.low.min(trade.price);
    candle.close = trade.price;
    candle.volume += trade.qty;
}

fn materially_changed(previous: Option<&Candle>, current: Option<&Candle>) -> bool {
    match (previous, current) {
        (None, None) => false,
        (Some(previous), Some(current)) => {
            previous.start_time != current.start_time
                || previous.close != current.close
                || previous.volume != current.volume
        }
        _ => true,
    }
}
