use super::{is_response, unwrap_combined};
use crate::{
    DataError,
    de::de_str,
    event::{MarketEvent, MarketIter, Side, Trade, VenueId},
    exchange::{parse_json, validate_price, validate_qty},
};
use serde::{Deserialize, Serialize};

/// [`Binance`](super::Binance) aggregated trade message.
///
/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Aggregate-Trade-Streams>
/// ```json
/// {
///     "e":"aggTrade","E":1649324825173,"s":"BTCUSDT","a":1000,
///     "p":"64000.10","q":"0.015","f":100,"l":105,"T":1649324825170,"m":true
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceAggTrade {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p", deserialize_with = "de_str")]
    pub price: f64,
    #[serde(rename = "q", deserialize_with = "de_str")]
    pub qty: f64,
    #[serde(rename = "T")]
    pub trade_time: Option<i64>,
    #[serde(rename = "E")]
    pub event_time: Option<i64>,
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl BinanceAggTrade {
    /// When the buyer is the maker, the aggressor sold into the bid.
    pub fn side(&self) -> Side {
        if self.buyer_is_maker {
            Side::Sell
        } else {
            Side::Buy
        }
    }
}

impl TryFrom<BinanceAggTrade> for Trade {
    type Error = DataError;

    fn try_from(trade: BinanceAggTrade) -> Result<Self, Self::Error> {
        Ok(Trade {
            price: validate_price(trade.price)?,
            qty: validate_qty(trade.qty)?,
            ts: trade
                .trade_time
                .or(trade.event_time)
                .ok_or_else(|| crate::exchange::missing(VenueId::Binance, "T"))?,
            side: trade.side(),
        })
    }
}

pub fn normalise(payload: &str) -> MarketIter {
    let value = match parse_json(VenueId::Binance, payload) {
        Ok(value) => unwrap_combined(value),
        Err(error) => return error.into(),
    };

    if is_response(&value) {
        return MarketIter::empty();
    }

    match value.get("e").and_then(serde_json::Value::as_str) {
        Some("aggTrade" | "trade") => {}
        other => {
            return DataError::payload(
                VenueId::Binance,
                format!("unexpected trade stream event: {other:?}"),
            )
            .into();
        }
    }

    let trade = serde_json::from_value::<BinanceAggTrade>(value)
        .map_err(|error| DataError::payload(VenueId::Binance, error))
        .and_then(Trade::try_from)
        .map(MarketEvent::Trade);

    MarketIter(vec![trade])
}
