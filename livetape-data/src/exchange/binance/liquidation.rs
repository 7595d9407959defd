use super::{is_response, unwrap_combined};
use crate::{
    DataError,
    de::{first_integer, first_positive, first_str},
    event::{Liquidation, MarketEvent, MarketIter, Side, VenueId},
    exchange::{missing, parse_json, validate_price, validate_qty},
};
use serde_json::Value;

/// Normalise a [`Binance`](super::Binance) force order message.
///
/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/All-Market-Liquidation-Order-Streams>
/// ```json
/// {
///     "e":"forceOrder","E":1568014460893,
///     "o":{"s":"BTCUSDT","S":"SELL","o":"LIMIT","f":"IOC","q":"0.014","p":"9910",
///          "ap":"9910","X":"FILLED","l":"0.014","z":"0.014","T":1568014460893}
/// }
/// ```
///
/// The average fill price is preferred over the order price, and the accumulated filled
/// quantity over the last fill and the original quantity.
pub fn normalise(payload: &str) -> MarketIter {
    let value = match parse_json(VenueId::Binance, payload) {
        Ok(value) => unwrap_combined(value),
        Err(error) => return error.into(),
    };

    if is_response(&value) {
        return MarketIter::empty();
    }

    MarketIter(vec![liquidation(&value).map(MarketEvent::Liquidation)])
}

fn liquidation(value: &Value) -> Result<Liquidation, DataError> {
    let order = value.get("o").ok_or_else(|| missing(VenueId::Binance, "o"))?;

    let symbol = first_str(order, &["s"]).ok_or_else(|| missing(VenueId::Binance, "o.s"))?;

    let side = first_str(order, &["S"]).ok_or_else(|| missing(VenueId::Binance, "o.S"))?;
    let side = Side::parse(side).ok_or_else(|| DataError::Rejected(format!("unknown side: {side}")))?;

    let price = first_positive(order, &["ap", "p"]).ok_or_else(|| missing(VenueId::Binance, "o.ap"))?;
    let qty = first_positive(order, &["z", "l", "q"]).ok_or_else(|| missing(VenueId::Binance, "o.z"))?;

    let ts = first_integer(order, &["T"])
        .or_else(|| first_integer(value, &["E"]))
        .ok_or_else(|| missing(VenueId::Binance, "o.T"))?;

    Ok(Liquidation::new(
        VenueId::Binance,
        symbol,
        side,
        validate_price(price)?,
        validate_qty(qty)?,
        ts,
    ))
}
