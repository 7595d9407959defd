use crate::{
    error::ServerError,
    feeds::{markets::MarketTicker, news::NewsItem, sentiment::FearGreed},
    heartbeat::PriceTick,
    top_buyers::TopBuyersSnapshot,
};
use livetape_data::{Candle, Liquidation, Trade};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Named event delivered to subscribers, encoded as `{"type": "<name>", "data": ...}`.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum OutboundEvent {
    History(Vec<Candle>),
    Kline(Candle),
    Trade(Trade),
    Price(PriceTick),
    TopBuyers(TopBuyersSnapshot),
    Liquidation(Liquidation),
    Liquidations(Vec<Liquidation>),
    Markets(Vec<MarketTicker>),
    FearGreed(FearGreed),
    News(Vec<NewsItem>),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::History(_) => "history",
            OutboundEvent::Kline(_) => "kline",
            OutboundEvent::Trade(_) => "trade",
            OutboundEvent::Price(_) => "price",
            OutboundEvent::TopBuyers(_) => "topBuyers",
            OutboundEvent::Liquidation(_) => "liquidation",
            OutboundEvent::Liquidations(_) => "liquidations",
            OutboundEvent::Markets(_) => "markets",
            OutboundEvent::FearGreed(_) => "fearGreed",
            OutboundEvent::News(_) => "news",
        }
    }
}

/// An [`OutboundEvent`] encoded once and shared by every subscriber it is delivered to.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub name: &'static str,
    pub frame: Utf8Bytes,
}

impl Envelope {
    pub fn encode(event: &OutboundEvent) -> Result<Self, ServerError> {
        Ok(Self {
            name: event.name(),
            frame: Utf8Bytes::from(serde_json::to_string(event)?),
        })
    }
}
