use super::{Instrument, StreamParams, StreamSpec, Venue, snapshot::url_with_query};
use crate::{
    DataError,
    de::book_levels,
    event::{BookLevel, Channel, ConnectionId, MarketIter, VenueId},
};
use url::Url;

/// Aggregated public trade stream.
pub mod trade;

/// Kline stream & REST kline history.
pub mod kline;

/// Force order (liquidation) stream.
pub mod liquidation;

/// [`Binance`] USD-M futures WebSocket base url.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/websocket-market-streams>
pub const BASE_URL_BINANCE_FUTURES_WS: &str = "wss://fstream.binance.com/ws";

/// [`Binance`] USD-M futures REST base url.
pub const BASE_URL_BINANCE_FUTURES_REST: &str = "https://fapi.binance.com";

/// Depth limits accepted by `/fapi/v1/depth`.
const DEPTH_LIMITS: [usize; 7] = [5, 10, 20, 50, 100, 500, 1000];

/// Snap `depth` to the nearest accepted depth limit, the larger one on a tie.
fn depth_limit(depth: usize) -> usize {
    DEPTH_LIMITS
        .into_iter()
        .min_by_key(|limit| (limit.abs_diff(depth), std::cmp::Reverse(*limit)))
        .unwrap_or(100)
}

/// [`Binance`] USD-M futures venue.
///
/// Streams are selected entirely by URL path, so no subscription frames are sent, and the
/// server drives keep-alive with protocol pings.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Binance;

impl Venue for Binance {
    const ID: VenueId = VenueId::Binance;

    fn stream(channel: Channel, params: &StreamParams) -> Result<StreamSpec, DataError> {
        let path = match channel {
            Channel::Trade => format!("{}@aggTrade", params.instrument.lowercase()),
            Channel::Kline => format!(
                "{}@kline_{}",
                params.instrument.lowercase(),
                params.interval
            ),
            Channel::Liquidation => "!forceOrder@arr".to_string(),
        };

        let url = Url::parse(&format!("{BASE_URL_BINANCE_FUTURES_WS}/{path}"))
            .map_err(|error| DataError::payload(Self::ID, error))?;

        Ok(StreamSpec {
            id: ConnectionId::new(Self::ID, channel),
            url,
            subscriptions: Vec::new(),
            ping: None,
        })
    }

    fn normalise(channel: Channel, payload: &str) -> MarketIter {
        match channel {
            Channel::Trade => trade::normalise(payload),
            Channel::Kline => kline::normalise(payload),
            Channel::Liquidation => liquidation::normalise(payload),
        }
    }

    fn bid_book_url(instrument: &Instrument, depth: usize) -> Result<Url, DataError> {
        url_with_query(
            Self::ID,
            &format!("{BASE_URL_BINANCE_FUTURES_REST}/fapi/v1/depth"),
            &[
                ("symbol", instrument.concatenated().as_str()),
                ("limit", &depth_limit(depth).to_string()),
            ],
        )
    }

    /// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/Order-Book>
    fn parse_bids(body: &str, _: &Instrument) -> Result<Vec<BookLevel>, DataError> {
        let value = super::parse_json(Self::ID, body)?;
        value
            .get("bids")
            .and_then(book_levels)
            .ok_or_else(|| super::missing(Self::ID, "bids"))
    }
}

/// Combined streams (`/stream?streams=`) wrap each payload as `{"stream": .., "data": ..}`.
pub(crate) fn unwrap_combined(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut object) if object.contains_key("stream") => {
            object.remove("data").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

/// Subscription responses look like `{"result": null, "id": 1}`.
pub(crate) fn is_response(value: &serde_json::Value) -> bool {
    value.get("result").is_some() && value.get("id").is_some()
}
