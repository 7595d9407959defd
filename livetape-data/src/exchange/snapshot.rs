use super::{Instrument, Venue, binance::Binance, bybit::Bybit, kraken::Kraken, okx::Okx};
use crate::{
    DataError,
    event::{BookLevel, VenueId},
    rest,
};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Pull-based source of one venue's resting bids.
#[async_trait]
pub trait BidBookSource: Send + Sync {
    fn venue(&self) -> VenueId;

    async fn fetch_bids(&self) -> Result<Vec<BookLevel>, DataError>;
}

type BidParser = fn(&str, &Instrument) -> Result<Vec<BookLevel>, DataError>;

/// [`BidBookSource`] backed by a venue's public REST order book endpoint.
#[derive(Clone, Debug)]
pub struct RestBidBook {
    venue: VenueId,
    client: Client,
    instrument: Instrument,
    url: Url,
    timeout: Duration,
    parse: BidParser,
}

impl RestBidBook {
    pub fn new(
        venue: VenueId,
        client: Client,
        instrument: Instrument,
        depth: usize,
        timeout: Duration,
    ) -> Result<Self, DataError> {
        let (url, parse): (Url, BidParser) = match venue {
            VenueId::Binance => (
                Binance::bid_book_url(&instrument, depth)?,
                Binance::parse_bids,
            ),
            VenueId::Bybit => (Bybit::bid_book_url(&instrument, depth)?, Bybit::parse_bids),
            VenueId::Okx => (Okx::bid_book_url(&instrument, depth)?, Okx::parse_bids),
            VenueId::Kraken => (
                Kraken::bid_book_url(&instrument, depth)?,
                Kraken::parse_bids,
            ),
        };

        Ok(Self {
            venue,
            client,
            instrument,
            url,
            timeout,
            parse,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl BidBookSource for RestBidBook {
    fn venue(&self) -> VenueId {
        self.venue
    }

    async fn fetch_bids(&self) -> Result<Vec<BookLevel>, DataError> {
        let body = rest::get_text(&self.client, self.venue, &self.url, self.timeout).await?;
        (self.parse)(&body, &self.instrument)
    }
}

/// Build a URL from a base and query pairs.
pub(crate) fn url_with_query(
    venue: VenueId,
    base: &str,
    query: &[(&str, &str)],
) -> Result<Url, DataError> {
    Url::parse_with_params(base, query).map_err(|error| DataError::payload(venue, error))
}
