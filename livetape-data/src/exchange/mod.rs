use crate::{
    DataError,
    event::{BookLevel, Channel, ConnectionId, MarketIter, VenueId},
};
use smol_str::{SmolStr, format_smolstr};
use std::time::Duration;
use url::Url;

/// `Binance` USD-M futures streams (trades, klines, liquidations) & REST (depth, klines).
pub mod binance;

/// `Bybit` linear perpetual liquidation stream & REST order book.
pub mod bybit;

/// `Okx` SWAP liquidation stream & REST order book.
pub mod okx;

/// `Kraken` spot REST order book.
pub mod kraken;

/// Pull-based resting-bid snapshot sources.
pub mod snapshot;

pub use snapshot::{BidBookSource, RestBidBook};

/// Quote currencies recognised when splitting a venue-neutral symbol (eg/ "BTCUSDT").
const QUOTES: [&str; 4] = ["USDT", "USDC", "BUSD", "USD"];

/// Venue-neutral perpetual instrument, used to derive each venue's symbol spelling.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Instrument {
    pub base: SmolStr,
    pub quote: SmolStr,
}

impl Instrument {
    /// Split a concatenated symbol such as "BTCUSDT" into base & quote.
    pub fn parse(symbol: &str) -> Result<Self, DataError> {
        let symbol = symbol.trim().to_ascii_uppercase();

        QUOTES
            .iter()
            .find_map(|quote| {
                symbol
                    .strip_suffix(quote)
                    .filter(|base| !base.is_empty())
                    .map(|base| Self {
                        base: SmolStr::new(base),
                        quote: SmolStr::new(quote),
                    })
            })
            .ok_or_else(|| DataError::Rejected(format!("unrecognised symbol: {symbol:?}")))
    }

    /// eg/ "BTCUSDT" (Binance & Bybit).
    pub fn concatenated(&self) -> SmolStr {
        format_smolstr!("{}{}", self.base, self.quote)
    }

    /// eg/ "btcusdt" (Binance stream names).
    pub fn lowercase(&self) -> SmolStr {
        self.concatenated().to_lowercase().into()
    }

    /// eg/ "BTC-USDT-SWAP".
    pub fn okx_swap(&self) -> SmolStr {
        format_smolstr!("{}-{}-SWAP", self.base, self.quote)
    }

    /// eg/ "XBTUSDT". Kraken spells bitcoin "XBT".
    pub fn kraken(&self) -> SmolStr {
        let base = if self.base == "BTC" { "XBT" } else { self.base.as_str() };
        format_smolstr!("{}{}", base, self.quote)
    }
}

/// Parameters shared by every stream definition.
#[derive(Clone, Debug)]
pub struct StreamParams {
    pub instrument: Instrument,
    /// Candle interval, eg/ "1m".
    pub interval: SmolStr,
}

/// Application level keep-alive a venue expects from the client.
#[derive(Clone, Eq, PartialEq, Debug)]
pub struct PingInterval {
    pub every: Duration,
    pub payload: String,
}

/// Everything required to open one persistent venue connection.
#[derive(Clone, Debug)]
pub struct StreamSpec {
    pub id: ConnectionId,
    pub url: Url,
    /// Text frames sent immediately after the handshake.
    pub subscriptions: Vec<String>,
    pub ping: Option<PingInterval>,
}

/// Defines a venue: how to open each of its streams, how to normalise their payloads, and
/// where to fetch its resting bids from.
pub trait Venue {
    const ID: VenueId;

    fn stream(channel: Channel, params: &StreamParams) -> Result<StreamSpec, DataError>;

    fn normalise(channel: Channel, payload: &str) -> MarketIter;

    fn bid_book_url(instrument: &Instrument, depth: usize) -> Result<Url, DataError>;

    fn parse_bids(body: &str, instrument: &Instrument) -> Result<Vec<BookLevel>, DataError>;

    fn unsupported(channel: Channel) -> DataError {
        DataError::UnknownChannel {
            venue: Self::ID,
            channel,
        }
    }
}

/// Build the [`StreamSpec`] for a connection id.
pub fn stream_spec(id: ConnectionId, params: &StreamParams) -> Result<StreamSpec, DataError> {
    match id.venue {
        VenueId::Binance => binance::Binance::stream(id.channel, params),
        VenueId::Bybit => bybit::Bybit::stream(id.channel, params),
        VenueId::Okx => okx::Okx::stream(id.channel, params),
        VenueId::Kraken => kraken::Kraken::stream(id.channel, params),
    }
}

/// Normalise one raw payload received on a connection into canonical events.
pub fn normalise(id: &ConnectionId, payload: &str) -> MarketIter {
    match id.venue {
        VenueId::Binance => binance::Binance::normalise(id.channel, payload),
        VenueId::Bybit => bybit::Bybit::normalise(id.channel, payload),
        VenueId::Okx => okx::Okx::normalise(id.channel, payload),
        VenueId::Kraken => kraken::Kraken::normalise(id.channel, payload),
    }
}

/// Parse a text payload as JSON, mapping failures to [`DataError::Payload`].
pub(crate) fn parse_json(venue: VenueId, payload: &str) -> Result<serde_json::Value, DataError> {
    serde_json::from_str(payload).map_err(|error| DataError::payload(venue, error))
}

/// Reject prices that are non-finite or not strictly positive.
pub(crate) fn validate_price(price: f64) -> Result<f64, DataError> {
    if price.is_finite() && price > 0.0 {
        Ok(price)
    } else {
        Err(DataError::Rejected(format!("invalid price: {price}")))
    }
}

/// Reject quantities that are non-finite or not strictly positive.
pub(crate) fn validate_qty(qty: f64) -> Result<f64, DataError> {
    if qty.is_finite() && qty > 0.0 {
        Ok(qty)
    } else {
        Err(DataError::Rejected(format!("invalid quantity: {qty}")))
    }
}

/// Required field lookup error.
pub(crate) fn missing(venue: VenueId, field: &str) -> DataError {
    DataError::payload(venue, format!("missing field `{field}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_parse() {
        struct TestCase {
            input: &'static str,
            expected: Option<(&'static str, &'static str)>,
        }

        let tests = vec![
            TestCase {
                // TC0: USDT perpetual
                input: "BTCUSDT",
                expected: Some(("BTC", "USDT")),
            },
            TestCase {
                // TC1: lower case input
                input: "ethusdc",
                expected: Some(("ETH", "USDC")),
            },
            TestCase {
                // TC2: USD quote after the longer quotes are tried
                input: "SOLUSD",
                expected: Some(("SOL", "USD")),
            },
            TestCase {
                // TC3: quote only
                input: "USDT",
                expected: None,
            },
            TestCase {
                // TC4: unknown quote
                input: "BTCEUR",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = Instrument::parse(test.input)
                .ok()
                .map(|instrument| (instrument.base, instrument.quote));
            let expected = test
                .expected
                .map(|(base, quote)| (SmolStr::new(base), SmolStr::new(quote)));
            assert_eq!(actual, expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_instrument_venue_symbols() {
        let instrument = Instrument::parse("BTCUSDT").unwrap();
        assert_eq!(instrument.concatenated(), "BTCUSDT");
        assert_eq!(instrument.lowercase(), "btcusdt");
        assert_eq!(instrument.okx_swap(), "BTC-USDT-SWAP");
        assert_eq!(instrument.kraken(), "XBTUSDT");

        let instrument = Instrument::parse("ETHUSDT").unwrap();
        assert_eq!(instrument.kraken(), "ETHUSDT");
    }

    #[test]
    fn test_stream_spec_unsupported_channel() {
        let params = StreamParams {
            instrument: Instrument::parse("BTCUSDT").unwrap(),
            interval: SmolStr::new("1m"),
        };

        let actual = stream_spec(ConnectionId::new(VenueId::Kraken, Channel::Trade), &params);
        assert_eq!(
            actual.unwrap_err(),
            DataError::UnknownChannel {
                venue: VenueId::Kraken,
                channel: Channel::Trade
            }
        );
    }
}
