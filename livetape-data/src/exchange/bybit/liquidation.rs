use crate::{
    DataError,
    de::{first_integer, first_positive, first_str},
    event::{Liquidation, MarketEvent, MarketIter, Side, VenueId},
    exchange::{missing, parse_json, validate_price, validate_qty},
};
use serde_json::Value;

/// Normalise a [`Bybit`](super::Bybit) liquidation message.
///
/// Both the v5 `allLiquidation.{symbol}` topic and the legacy `liquidation.{symbol}` topic are
/// accepted. Messages without a `topic` (subscription acks, pongs) carry no events.
///
/// ### Raw Payload Examples
/// See docs: <https://bybit-exchange.github.io/docs/v5/websocket/public/all-liquidation>
/// ```json
/// {
///     "topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502303204,
///     "data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"0.003","p":"97327.80"}]
/// }
/// ```
/// Legacy:
/// ```json
/// {
///     "topic":"liquidation.BTCUSDT","type":"snapshot","ts":1703485237953,
///     "data":{"updatedTime":1703485237953,"symbol":"BTCUSDT","side":"Sell","size":"0.003","price":"43511.70"}
/// }
/// ```
pub fn normalise(payload: &str) -> MarketIter {
    let value = match parse_json(VenueId::Bybit, payload) {
        Ok(value) => value,
        Err(error) => return error.into(),
    };

    let Some(topic) = value.get("topic").and_then(Value::as_str) else {
        return match value.get("success").and_then(Value::as_bool) {
            Some(false) => DataError::payload(
                VenueId::Bybit,
                format!(
                    "subscription failed: {}",
                    value.get("ret_msg").and_then(Value::as_str).unwrap_or_default()
                ),
            )
            .into(),
            _ => MarketIter::empty(),
        };
    };

    let topic_symbol = topic.rsplit('.').next().filter(|symbol| *symbol != topic);
    let fallback_ts = first_integer(&value, &["ts"]);

    match value.get("data") {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| liquidation(entry, topic_symbol, fallback_ts).map(MarketEvent::Liquidation))
            .collect(),
        Some(entry @ Value::Object(_)) => MarketIter(vec![
            liquidation(entry, topic_symbol, fallback_ts).map(MarketEvent::Liquidation),
        ]),
        _ => missing(VenueId::Bybit, "data").into(),
    }
}

fn liquidation(
    entry: &Value,
    topic_symbol: Option<&str>,
    fallback_ts: Option<i64>,
) -> Result<Liquidation, DataError> {
    let symbol = first_str(entry, &["s", "symbol"])
        .or(topic_symbol)
        .ok_or_else(|| missing(VenueId::Bybit, "s"))?;

    let side = first_str(entry, &["S", "side"]).ok_or_else(|| missing(VenueId::Bybit, "S"))?;
    let side = Side::parse(side).ok_or_else(|| DataError::Rejected(format!("unknown side: {side}")))?;

    let price = first_positive(entry, &["p", "price"]).ok_or_else(|| missing(VenueId::Bybit, "p"))?;
    let qty = first_positive(entry, &["v", "size", "qty"]).ok_or_else(|| missing(VenueId::Bybit, "v"))?;

    let ts = first_integer(entry, &["T", "updatedTime", "ts"])
        .or(fallback_ts)
        .ok_or_else(|| missing(VenueId::Bybit, "T"))?;

    Ok(Liquidation::new(
        VenueId::Bybit,
        symbol,
        side,
        validate_price(price)?,
        validate_qty(qty)?,
        ts,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bybit_liquidation_normalise() {
        struct TestCase {
            input: &'static str,
            expected: MarketIter,
        }

        let tests = vec![
            TestCase {
                // TC0: v5 allLiquidation with array data
                input: r#"{"topic":"allLiquidation.BTCUSDT","type":"snapshot","ts":1739502303204,"data":[{"T":1739502302929,"s":"BTCUSDT","S":"Sell","v":"0.5","p":"97000"},{"T":1739502302930,"s":"BTCUSDT","S":"Buy","v":"0.1","p":"97010"}]}"#,
                expected: MarketIter(vec![
                    Ok(MarketEvent::Liquidation(Liquidation::new(
                        VenueId::Bybit,
                        "BTCUSDT",
                        Side::Sell,
                        97000.0,
                        0.5,
                        1739502302929,
                    ))),
                    Ok(MarketEvent::Liquidation(Liquidation::new(
                        VenueId::Bybit,
                        "BTCUSDT",
                        Side::Buy,
                        97010.0,
                        0.1,
                        1739502302930,
                    ))),
                ]),
            },
            TestCase {
                // TC1: legacy object data with long field names
                input: r#"{"topic":"liquidation.ETHUSDT","type":"snapshot","ts":1703485237953,"data":{"updatedTime":1703485237950,"symbol":"ETHUSDT","side":"Buy","size":"2","price":"2300.5"}}"#,
                expected: MarketIter(vec![Ok(MarketEvent::Liquidation(Liquidation::new(
                    VenueId::Bybit,
                    "ETHUSDT",
                    Side::Buy,
                    2300.5,
                    2.0,
                    1703485237950,
                )))]),
            },
            TestCase {
                // TC2: symbol from topic & ts from envelope
                input: r#"{"topic":"allLiquidation.SOLUSDT","ts":42,"data":[{"S":"Sell","v":10,"p":150}]}"#,
                expected: MarketIter(vec![Ok(MarketEvent::Liquidation(Liquidation::new(
                    VenueId::Bybit,
                    "SOLUSDT",
                    Side::Sell,
                    150.0,
                    10.0,
                    42,
                )))]),
            },
            TestCase {
                // TC3: one bad entry does not discard its sibling
                input: r#"{"topic":"allLiquidation.BTCUSDT","ts":1,"data":[{"s":"BTCUSDT","S":"Sell","v":"1","p":"abc"},{"s":"BTCUSDT","S":"Buy","v":"1","p":"2"}]}"#,
                expected: MarketIter(vec![
                    Err(missing(VenueId::Bybit, "p")),
                    Ok(MarketEvent::Liquidation(Liquidation::new(
                        VenueId::Bybit,
                        "BTCUSDT",
                        Side::Buy,
                        2.0,
                        1.0,
                        1,
                    ))),
                ]),
            },
            TestCase {
                // TC4: subscription ack
                input: r#"{"success":true,"ret_msg":"","conn_id":"abc","req_id":"","op":"subscribe"}"#,
                expected: MarketIter::empty(),
            },
            TestCase {
                // TC5: pong
                input: r#"{"success":true,"ret_msg":"pong","conn_id":"abc","op":"ping"}"#,
                expected: MarketIter::empty(),
            },
            TestCase {
                // TC6: failed subscription surfaces as an error
                input: r#"{"success":false,"ret_msg":"Invalid topic","op":"subscribe"}"#,
                expected: MarketIter(vec![Err(DataError::payload(
                    VenueId::Bybit,
                    "subscription failed: Invalid topic",
                ))]),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(normalise(test.input), test.expected, "TC{} failed", index);
        }
    }
}
