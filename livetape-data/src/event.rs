use crate::error::DataError;
use derive_more::{Constructor, Display};
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Unique identifier for an upstream venue.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum VenueId {
    #[display("binance")]
    Binance,
    #[display("bybit")]
    Bybit,
    #[display("okx")]
    Okx,
    #[display("kraken")]
    Kraken,
}

impl std::str::FromStr for VenueId {
    type Err = DataError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_ascii_lowercase().as_str() {
            "binance" => Ok(VenueId::Binance),
            "bybit" => Ok(VenueId::Bybit),
            "okx" => Ok(VenueId::Okx),
            "kraken" => Ok(VenueId::Kraken),
            other => Err(DataError::Rejected(format!("unknown venue: {other}"))),
        }
    }
}

/// Streaming channel carried by a single venue connection.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[display("trade")]
    Trade,
    #[display("kline")]
    Kline,
    #[display("liquidation")]
    Liquidation,
}

/// Key of one persistent upstream connection: a (venue, channel) pair.
#[derive(
    Copy,
    Clone,
    Eq,
    PartialEq,
    Ord,
    PartialOrd,
    Hash,
    Debug,
    Deserialize,
    Serialize,
    Display,
    Constructor,
)]
#[display("{venue}/{channel}")]
pub struct ConnectionId {
    pub venue: VenueId,
    pub channel: Channel,
}

/// Aggressor side of a trade, or the side of a liquidation order.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Deserialize, Serialize, Display,
)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    #[display("buy")]
    Buy,
    #[display("sell")]
    Sell,
}

impl Side {
    /// Parse the side spellings used across venues ("buy", "BUY", "Buy", "sell", ...).
    pub fn parse(input: &str) -> Option<Self> {
        if input.eq_ignore_ascii_case("buy") {
            Some(Side::Buy)
        } else if input.eq_ignore_ascii_case("sell") {
            Some(Side::Sell)
        } else {
            None
        }
    }
}

/// Normalised public trade. Consumed immediately to update candles and the last price.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
pub struct Trade {
    pub price: f64,
    pub qty: f64,
    /// Epoch milliseconds.
    pub ts: i64,
    pub side: Side,
}

/// OHLCV summary of one bucket.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Candle {
    /// Bucket aligned epoch milliseconds.
    pub start_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// Open a new candle seeded from a single trade (`o = h = l = c = price`).
    pub fn seeded(start_time: i64, price: f64, qty: f64) -> Self {
        Self {
            start_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: qty,
            is_closed: false,
        }
    }
}

/// Normalised forced-closure event.
///
/// `notional` is always `price * qty`; construct via [`Liquidation::new`].
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Liquidation {
    pub exchange_id: VenueId,
    pub symbol: SmolStr,
    pub side: Side,
    pub price: f64,
    pub qty: f64,
    pub notional: f64,
    pub ts: i64,
}

impl Liquidation {
    pub fn new(
        exchange_id: VenueId,
        symbol: impl Into<SmolStr>,
        side: Side,
        price: f64,
        qty: f64,
        ts: i64,
    ) -> Self {
        Self {
            exchange_id,
            symbol: symbol.into(),
            side,
            price,
            qty,
            notional: price * qty,
            ts,
        }
    }
}

/// One resting order book level.
#[derive(Clone, Copy, PartialEq, Debug, Deserialize, Serialize, Constructor)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Canonical event produced by a streaming normaliser.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub enum MarketEvent {
    Trade(Trade),
    Kline(Candle),
    Liquidation(Liquidation),
}

/// Output of normalising one raw payload.
///
/// A single payload may carry zero (acks, pongs), one, or many events. Each entry is either a
/// canonical event or the reason that entry was rejected, so one bad entry never discards its
/// siblings.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct MarketIter(pub Vec<Result<MarketEvent, DataError>>);

impl MarketIter {
    pub fn empty() -> Self {
        Self(Vec::new())
    }
}

impl From<DataError> for MarketIter {
    fn from(error: DataError) -> Self {
        Self(vec![Err(error)])
    }
}

impl From<MarketEvent> for MarketIter {
    fn from(event: MarketEvent) -> Self {
        Self(vec![Ok(event)])
    }
}

impl FromIterator<Result<MarketEvent, DataError>> for MarketIter {
    fn from_iter<I: IntoIterator<Item = Result<MarketEvent, DataError>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for MarketIter {
    type Item = Result<MarketEvent, DataError>;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parse() {
        struct TestCase {
            input: &'static str,
            expected: Option<Side>,
        }

        let tests = vec![
            TestCase {
                // TC0: Binance upper case
                input: "BUY",
                expected: Some(Side::Buy),
            },
            TestCase {
                // TC1: Bybit title case
                input: "Sell",
                expected: Some(Side::Sell),
            },
            TestCase {
                // TC2: OKX lower case
                input: "buy",
                expected: Some(Side::Buy),
            },
            TestCase {
                // TC3: unknown
                input: "long",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(Side::parse(test.input), test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_venue_id_from_str() {
        assert_eq!("binance".parse::<VenueId>(), Ok(VenueId::Binance));
        assert_eq!(" OKX ".parse::<VenueId>(), Ok(VenueId::Okx));
        assert!("coinbase".parse::<VenueId>().is_err());
    }

    #[test]
    fn test_liquidation_notional() {
        let liquidation = Liquidation::new(VenueId::Okx, "BTC-USDT-SWAP", Side::Sell, 60_000.0, 0.5, 1);
        assert_eq!(liquidation.notional, 30_000.0);
    }

    #[test]
    fn test_display_matches_wire_names() {
        struct TestCase {
            input: String,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: ConnectionId::new(VenueId::Bybit, Channel::Liquidation).to_string(),
                expected: "bybit/liquidation",
            },
            TestCase {
                // TC1
                input: ConnectionId::new(VenueId::Binance, Channel::Kline).to_string(),
                expected: "binance/kline",
            },
            TestCase {
                // TC2
                input: VenueId::Kraken.to_string(),
                expected: "kraken",
            },
            TestCase {
                // TC3
                input: Side::Sell.to_string(),
                expected: "sell",
            },
            TestCase {
                // TC4: Display agrees with the serialised form
                input: serde_json::to_string(&VenueId::Okx).unwrap().trim_matches('"').to_string(),
                expected: "okx",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            assert_eq!(test.input, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_candle_serialises_camel_case() {
        let candle = Candle::seeded(60_000, 10.0, 2.0);
        let json = serde_json::to_value(candle).unwrap();
        assert_eq!(json["startTime"], 60_000);
        assert_eq!(json["isClosed"], false);
        assert_eq!(json["open"], 10.0);
    }
}
