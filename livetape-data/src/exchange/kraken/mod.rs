use super::{Instrument, StreamParams, StreamSpec, Venue, snapshot::url_with_query};
use crate::{
    DataError,
    de::book_levels,
    event::{BookLevel, Channel, MarketIter, VenueId},
};
use serde_json::Value;
use url::Url;

/// [`Kraken`] REST base url.
pub const BASE_URL_KRAKEN_REST: &str = "https://api.kraken.com";

/// [`Kraken`] spot venue. Only contributes resting-bid snapshots.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Kraken;

impl Venue for Kraken {
    const ID: VenueId = VenueId::Kraken;

    fn stream(channel: Channel, _: &StreamParams) -> Result<StreamSpec, DataError> {
        Err(Self::unsupported(channel))
    }

    fn normalise(channel: Channel, _: &str) -> MarketIter {
        Self::unsupported(channel).into()
    }

    fn bid_book_url(instrument: &Instrument, depth: usize) -> Result<Url, DataError> {
        url_with_query(
            Self::ID,
            &format!("{BASE_URL_KRAKEN_REST}/0/public/Depth"),
            &[
                ("pair", instrument.kraken().as_str()),
                ("count", &depth.min(500).to_string()),
            ],
        )
    }

    /// The result is keyed by Kraken's canonical pair name, which may differ from the
    /// requested alias (eg/ "XBTUSDT" => "XBTUSDT", "XBTUSD" => "XXBTZUSD"), so the single
    /// entry is taken whatever its key.
    ///
    /// See docs: <https://docs.kraken.com/api/docs/rest-api/get-order-book>
    fn parse_bids(body: &str, _: &Instrument) -> Result<Vec<BookLevel>, DataError> {
        let value = super::parse_json(Self::ID, body)?;

        if let Some(errors) = value
            .get("error")
            .and_then(Value::as_array)
            .filter(|errors| !errors.is_empty())
        {
            let errors = errors
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DataError::payload(Self::ID, errors));
        }

        value
            .get("result")
            .and_then(Value::as_object)
            .and_then(|result| result.values().next())
            .and_then(|book| book.get("bids"))
            .and_then(book_levels)
            .ok_or_else(|| super::missing(Self::ID, "result.<pair>.bids"))
    }
}
