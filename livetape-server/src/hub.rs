//! Owned aggregates plus the fan-out broadcaster.
//!
//! Lock order for anything that takes more than one aggregate lock:
//! `tape → liquidations → top_buyers → markets → sentiment → news`.

use crate::{
    candles::{CandleSeries, TradeOutcome},
    config::ServerConfig,
    event::{Envelope, OutboundEvent},
    feeds::{markets::MarketTicker, news::NewsItem, sentiment::FearGreed},
    heartbeat::{PriceHeartbeat, PriceTick},
    liquidations::LiquidationFeed,
    top_buyers::TopBuyersSnapshot,
};
use livetape_data::{Candle, Liquidation, MarketEvent, Trade};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error};

/// Candle series plus everything derived from the trade tape.
#[derive(Debug)]
struct Tape {
    series: CandleSeries,
    interval_ms: i64,
    last_trade: Option<PriceTick>,
    heartbeat: PriceHeartbeat,
}

impl Tape {
    /// Last traded price, falling back to the close of the last candle.
    fn price(&self) -> Option<PriceTick> {
        self.last_trade.or_else(|| {
            self.series.last().map(|candle| PriceTick {
                price: candle.close,
                ts: candle.start_time,
            })
        })
    }
}

/// A new subscriber's bootstrap batch and its incremental event receiver.
///
/// Every event in `events` was published after the state captured in `bootstrap`.
#[derive(Debug)]
pub struct Subscription {
    pub bootstrap: Vec<Envelope>,
    pub events: broadcast::Receiver<Envelope>,
}

/// In-memory aggregates, each behind its own single-writer lock, and the broadcaster that
/// fans their incremental events out to every subscriber.
#[derive(Debug)]
pub struct MarketHub {
    tape: Mutex<Tape>,
    liquidations: Mutex<LiquidationFeed>,
    top_buyers: Mutex<Option<TopBuyersSnapshot>>,
    markets: Mutex<Vec<MarketTicker>>,
    sentiment: Mutex<Option<FearGreed>>,
    news: Mutex<Vec<NewsItem>>,
    tx: broadcast::Sender<Envelope>,
}

impl MarketHub {
    pub fn new(config: &ServerConfig) -> Self {
        let (tx, _) = broadcast::channel(config.ws_buffer_size.max(1));

        Self {
            tape: Mutex::new(Tape {
                series: CandleSeries::new(config.candle_capacity),
                interval_ms: config.candle_interval_ms,
                last_trade: None,
                heartbeat: PriceHeartbeat::new(),
            }),
            liquidations: Mutex::new(LiquidationFeed::new(
                config.liquidation_capacity,
                config.liquidation_min_notional,
            )),
            top_buyers: Mutex::new(None),
            markets: Mutex::new(Vec::new()),
            sentiment: Mutex::new(None),
            news: Mutex::new(Vec::new()),
            tx,
        }
    }

    /// Encode and broadcast `event`. Callers hold the lock of the aggregate it describes.
    fn publish(&self, event: OutboundEvent) {
        match Envelope::encode(&event) {
            Ok(envelope) => {
                // Err only means nobody is subscribed
                let _ = self.tx.send(envelope);
            }
            Err(error) => error!(event = event.name(), %error, "failed to encode outbound event"),
        }
    }

    /// Apply one normalised streaming event to its aggregate.
    pub fn apply(&self, event: MarketEvent) {
        match event {
            MarketEvent::Trade(trade) => self.apply_trade(trade),
            MarketEvent::Kline(candle) => self.upsert_kline(candle),
            MarketEvent::Liquidation(liquidation) => {
                self.ingest_liquidation(liquidation);
            }
        }
    }

    /// Fold a trade into the candle series and publish `trade` followed by the touched `kline`.
    pub fn apply_trade(&self, trade: Trade) {
        let mut tape = self.tape.lock();
        let interval_ms = tape.interval_ms;

        if tape.last_trade.is_none_or(|last| trade.ts >= last.ts) {
            tape.last_trade = Some(PriceTick {
                price: trade.price,
                ts: trade.ts,
            });
        }

        let outcome = tape.series.apply_trade(&trade, interval_ms);
        self.publish(OutboundEvent::Trade(trade));

        match outcome {
            TradeOutcome::Opened(candle) | TradeOutcome::Extended(candle) => {
                self.publish(OutboundEvent::Kline(candle))
            }
            TradeOutcome::Expired => debug!(ts = trade.ts, "trade older than retained candles"),
        }
    }

    /// Upsert a streamed kline and publish it if it is retained.
    pub fn upsert_kline(&self, candle: Candle) {
        let mut tape = self.tape.lock();
        tape.series.upsert(candle);

        let retained = tape
            .series
            .candles()
            .iter()
            .any(|existing| existing.start_time == candle.start_time);

        if retained {
            self.publish(OutboundEvent::Kline(candle));
        }
    }

    /// Replace the candle series with authoritative history, publishing `history` only if the
    /// last candle changed materially.
    pub fn resync_candles(&self, candles: Vec<Candle>) -> bool {
        let mut tape = self.tape.lock();
        let changed = tape.series.resync_from_authoritative(candles);

        if changed {
            let history = tape.series.candles().to_vec();
            self.publish(OutboundEvent::History(history));
        }

        changed
    }

    /// Retain and publish a liquidation if it meets the notional floor.
    pub fn ingest_liquidation(&self, liquidation: Liquidation) -> bool {
        let mut feed = self.liquidations.lock();
        let accepted = feed.ingest(liquidation.clone());

        if accepted {
            self.publish(OutboundEvent::Liquidation(liquidation));
        }

        accepted
    }

    /// Replace the top-buyers slot wholesale and publish it.
    pub fn replace_top_buyers(&self, snapshot: TopBuyersSnapshot) {
        let mut slot = self.top_buyers.lock();
        self.publish(OutboundEvent::TopBuyers(snapshot.clone()));
        *slot = Some(snapshot);
    }

    pub fn replace_markets(&self, markets: Vec<MarketTicker>) -> bool {
        let mut slot = self.markets.lock();
        if *slot == markets {
            return false;
        }

        self.publish(OutboundEvent::Markets(markets.clone()));
        *slot = markets;
        true
    }

    pub fn replace_sentiment(&self, reading: FearGreed) -> bool {
        let mut slot = self.sentiment.lock();
        if slot.as_ref() == Some(&reading) {
            return false;
        }

        self.publish(OutboundEvent::FearGreed(reading.clone()));
        *slot = Some(reading);
        true
    }

    pub fn replace_news(&self, news: Vec<NewsItem>) -> bool {
        let mut slot = self.news.lock();
        if *slot == news {
            return false;
        }

        self.publish(OutboundEvent::News(news.clone()));
        *slot = news;
        true
    }

    /// Re-emit the latest price if the one-second bucket of `now_ms` has not been emitted yet.
    pub fn heartbeat(&self, now_ms: i64) -> Option<PriceTick> {
        let mut tape = self.tape.lock();
        let price = tape.price().map(|tick| tick.price);
        let tick = tape.heartbeat.tick(now_ms, price)?;

        self.publish(OutboundEvent::Price(tick));
        Some(tick)
    }

    /// Capture a consistent bootstrap of every aggregate and register for incremental events.
    ///
    /// All aggregate locks are held while the receiver is registered, so no publish can land
    /// between the captured state and the first received event.
    pub fn subscribe(&self) -> Subscription {
        let (bootstrap, events) = {
            let tape = self.tape.lock();
            let liquidations = self.liquidations.lock();
            let top_buyers = self.top_buyers.lock();
            let markets = self.markets.lock();
            let sentiment = self.sentiment.lock();
            let news = self.news.lock();

            let mut bootstrap = Vec::with_capacity(7);
            if !tape.series.is_empty() {
                bootstrap.push(OutboundEvent::History(tape.series.candles().to_vec()));
            }
            if let Some(tick) = tape.price() {
                bootstrap.push(OutboundEvent::Price(tick));
            }
            if let Some(snapshot) = top_buyers.as_ref() {
                bootstrap.push(OutboundEvent::TopBuyers(snapshot.clone()));
            }
            if !liquidations.is_empty() {
                bootstrap.push(OutboundEvent::Liquidations(liquidations.to_vec()));
            }
            if !markets.is_empty() {
                bootstrap.push(OutboundEvent::Markets(markets.clone()));
            }
            if let Some(reading) = sentiment.as_ref() {
                bootstrap.push(OutboundEvent::FearGreed(reading.clone()));
            }
            if !news.is_empty() {
                bootstrap.push(OutboundEvent::News(news.clone()));
            }

            (bootstrap, self.tx.subscribe())
        };

        let bootstrap = bootstrap
            .into_iter()
            .filter_map(|event| {
                Envelope::encode(&event)
                    .inspect_err(|error| {
                        error!(event = event.name(), %error, "failed to encode bootstrap event")
                    })
                    .ok()
            })
            .collect();

        Subscription { bootstrap, events }
    }

    /// Release a subscription's receiver.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
        debug!(subscribers = self.subscriber_count(), "subscriber removed");
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn latest_price(&self) -> Option<f64> {
        self.tape.lock().price().map(|tick| tick.price)
    }

    /// The most recent `limit` candles, oldest first.
    pub fn candles(&self, limit: usize) -> Vec<Candle> {
        self.tape.lock().series.tail(limit).to_vec()
    }

    pub fn top_buyers(&self) -> Option<TopBuyersSnapshot> {
        self.top_buyers.lock().clone()
    }

    /// Retained liquidations, most recent first.
    pub fn liquidations(&self) -> Vec<Liquidation> {
        self.liquidations.lock().to_vec()
    }

    pub fn markets(&self) -> Vec<MarketTicker> {
        self.markets.lock().clone()
    }

    pub fn sentiment(&self) -> Option<FearGreed> {
        self.sentiment.lock().clone()
    }

    pub fn news(&self) -> Vec<NewsItem> {
        self.news.lock().clone()
    }
}
