use super::ContractValue;
use crate::{
    DataError,
    de::{first_integer, first_positive, first_str},
    event::{Liquidation, MarketEvent, MarketIter, Side, VenueId},
    exchange::{missing, parse_json, validate_price, validate_qty},
};
use serde_json::Value;

/// Normalise an [`Okx`](super::Okx) liquidation orders message.
///
/// Each `data[]` entry carries one instrument and a list of `details[]` fills; every detail
/// becomes one [`Liquidation`] with its contract size converted into base currency.
///
/// ### Raw Payload Examples
/// See docs: <https://www.okx.com/docs-v5/en/#public-data-websocket-liquidation-orders-channel>
/// ```json
/// {
///     "arg":{"channel":"liquidation-orders","instType":"SWAP"},
///     "data":[{"details":[{"bkLoss":"0","bkPx":"64000.5","ccy":"","posSide":"short",
///              "side":"buy","sz":"13","ts":"1692266434010"}],
///              "instFamily":"BTC-USDT","instId":"BTC-USDT-SWAP","instType":"SWAP","uly":"BTC-USDT"}]
/// }
/// ```
pub fn normalise(payload: &str) -> MarketIter {
    // Keep-alive replies are bare text
    if payload.trim() == "pong" {
        return MarketIter::empty();
    }

    let value = match parse_json(VenueId::Okx, payload) {
        Ok(value) => value,
        Err(error) => return error.into(),
    };

    match value.get("event").and_then(Value::as_str) {
        Some("error") => {
            return DataError::payload(
                VenueId::Okx,
                format!(
                    "code {}: {}",
                    first_str(&value, &["code"]).unwrap_or_default(),
                    first_str(&value, &["msg"]).unwrap_or_default()
                ),
            )
            .into();
        }
        Some(_) => return MarketIter::empty(),
        None => {}
    }

    let Some(entries) = value.get("data").and_then(Value::as_array) else {
        return missing(VenueId::Okx, "data").into();
    };

    entries
        .iter()
        .flat_map(|entry| {
            let inst_id = first_str(entry, &["instId"]);
            let details = entry
                .get("details")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let missing_details = details
                .is_empty()
                .then(|| Err(missing(VenueId::Okx, "details")));

            details
                .iter()
                .map(move |detail| liquidation(inst_id, detail).map(MarketEvent::Liquidation))
                .chain(missing_details)
        })
        .collect()
}

fn liquidation(inst_id: Option<&str>, detail: &Value) -> Result<Liquidation, DataError> {
    let inst_id = inst_id.ok_or_else(|| missing(VenueId::Okx, "instId"))?;

    let side = first_str(detail, &["side"]).ok_or_else(|| missing(VenueId::Okx, "side"))?;
    let side = Side::parse(side).ok_or_else(|| DataError::Rejected(format!("unknown side: {side}")))?;

    let price = validate_price(
        first_positive(detail, &["bkPx", "px"]).ok_or_else(|| missing(VenueId::Okx, "bkPx"))?,
    )?;
    let contracts = first_positive(detail, &["sz"]).ok_or_else(|| missing(VenueId::Okx, "sz"))?;
    let qty = validate_qty(ContractValue::of(inst_id).base_qty(contracts, price))?;

    let ts = first_integer(detail, &["ts"]).ok_or_else(|| missing(VenueId::Okx, "ts"))?;

    Ok(Liquidation::new(VenueId::Okx, inst_id, side, price, qty, ts))
}
