use super::{BASE_URL_BINANCE_FUTURES_REST, is_response, unwrap_combined};
use crate::{
    DataError,
    de::{de_str, integer, number},
    event::{Candle, MarketEvent, MarketIter, VenueId},
    exchange::{Instrument, parse_json, snapshot::url_with_query, validate_price},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// [`Binance`](super::Binance) kline stream message.
///
/// ### Raw Payload Examples
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams/Kline-Candlestick-Streams>
/// ```json
/// {
///     "e":"kline","E":1638747660000,"s":"BTCUSDT",
///     "k":{"t":1638747660000,"T":1638747719999,"s":"BTCUSDT","i":"1m","o":"10","c":"11",
///          "h":"12","l":"9","v":"1000","n":100,"x":false,"q":"1.0","V":"500","Q":"0.5"}
/// }
/// ```
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKlineMessage {
    #[serde(rename = "k")]
    pub kline: BinanceKline,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct BinanceKline {
    #[serde(rename = "t")]
    pub start_time: i64,
    #[serde(rename = "o", deserialize_with = "de_str")]
    pub open: f64,
    #[serde(rename = "h", deserialize_with = "de_str")]
    pub high: f64,
    #[serde(rename = "l", deserialize_with = "de_str")]
    pub low: f64,
    #[serde(rename = "c", deserialize_with = "de_str")]
    pub close: f64,
    #[serde(rename = "v", deserialize_with = "de_str")]
    pub volume: f64,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

impl TryFrom<BinanceKline> for Candle {
    type Error = DataError;

    fn try_from(kline: BinanceKline) -> Result<Self, Self::Error> {
        validate_ohlc(kline.open, kline.high, kline.low, kline.close)?;
        if !kline.volume.is_finite() || kline.volume < 0.0 {
            return Err(DataError::Rejected(format!(
                "invalid volume: {}",
                kline.volume
            )));
        }

        Ok(Candle {
            start_time: kline.start_time,
            open: kline.open,
            high: kline.high,
            low: kline.low,
            close: kline.close,
            volume: kline.volume,
            is_closed: kline.is_closed,
        })
    }
}

fn validate_ohlc(open: f64, high: f64, low: f64, close: f64) -> Result<(), DataError> {
    for price in [open, high, low, close] {
        validate_price(price)?;
    }
    if low > high {
        return Err(DataError::Rejected(format!(
            "low {low} above high {high}"
        )));
    }
    Ok(())
}

pub fn normalise(payload: &str) -> MarketIter {
    let value = match parse_json(VenueId::Binance, payload) {
        Ok(value) => unwrap_combined(value),
        Err(error) => return error.into(),
    };

    if is_response(&value) {
        return MarketIter::empty();
    }

    let candle = serde_json::from_value::<BinanceKlineMessage>(value)
        .map_err(|error| DataError::payload(VenueId::Binance, error))
        .and_then(|message| Candle::try_from(message.kline))
        .map(MarketEvent::Kline);

    MarketIter(vec![candle])
}

/// REST kline history url, used to resync the candle series from the authoritative source.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Kline-Candlestick-Data>
pub fn history_url(instrument: &Instrument, interval: &str, limit: usize) -> Result<Url, DataError> {
    url_with_query(
        VenueId::Binance,
        &format!("{BASE_URL_BINANCE_FUTURES_REST}/fapi/v1/klines"),
        &[
            ("symbol", instrument.concatenated().as_str()),
            ("interval", interval),
            ("limit", &limit.to_string()),
        ],
    )
}

/// Parse a REST kline history body:
/// `[[openTime, "o", "h", "l", "c", "v", closeTime, ...], ...]`.
///
/// A row whose close time has passed (`closeTime < now_ms`) is marked closed. Malformed rows
/// are skipped; a body that is not an array is rejected.
pub fn parse_history(body: &str, now_ms: i64) -> Result<Vec<Candle>, DataError> {
    let value = parse_json(VenueId::Binance, body)?;
    let rows = value
        .as_array()
        .ok_or_else(|| DataError::payload(VenueId::Binance, "kline history is not an array"))?;

    Ok(rows.iter().filter_map(|row| history_row(row, now_ms)).collect())
}

fn history_row(row: &Value, now_ms: i64) -> Option<Candle> {
    let row = row.as_array()?;
    let field = |index: usize| row.get(index).and_then(number);

    let (open, high, low, close) = (field(1)?, field(2)?, field(3)?, field(4)?);
    validate_ohlc(open, high, low, close).ok()?;

    let close_time = row.get(6).and_then(integer)?;

    Some(Candle {
        start_time: row.first().and_then(integer)?,
        open,
        high,
        low,
        close,
        volume: field(5).filter(|volume| *volume >= 0.0)?,
        is_closed: close_time < now_ms,
    })
}

/// Length of a Binance USD-M futures kline interval (eg/ "1m", "15m", "4h", "1d", "1w") in
/// milliseconds. Intervals the futures kline stream does not offer, such as "1s" or the
/// variable-length "1M", are `None`.
pub fn interval_ms(interval: &str) -> Option<i64> {
    let ms = match interval.trim() {
        "1m" => 60_000,
        "3m" => 180_000,
        "5m" => 300_000,
        "15m" => 900_000,
        "30m" => 1_800_000,
        "1h" => 3_600_000,
        "2h" => 7_200_000,
        "4h" => 14_400_000,
        "6h" => 21_600_000,
        "8h" => 28_800_000,
        "12h" => 43_200_000,
        "1d" => 86_400_000,
        "3d" => 259_200_000,
        "1w" => 604_800_000,
        _ => return None,
    };

    Some(ms)
}
