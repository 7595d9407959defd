use super::{Instrument, PingInterval, StreamParams, StreamSpec, Venue, snapshot::url_with_query};
use crate::{
    DataError,
    de::book_levels,
    event::{BookLevel, Channel, ConnectionId, MarketIter, VenueId},
};
use serde_json::json;
use std::time::Duration;
use url::Url;

/// All-liquidation stream.
pub mod liquidation;

/// [`Bybit`] linear perpetual public WebSocket url.
///
/// See docs: <https://bybit-exchange.github.io/docs/v5/ws/connect>
pub const BASE_URL_BYBIT_LINEAR_WS: &str = "wss://stream.bybit.com/v5/public/linear";

/// [`Bybit`] REST base url.
pub const BASE_URL_BYBIT_REST: &str = "https://api.bybit.com";

/// [`Bybit`] recommends an application ping every 20 seconds.
pub const PING_INTERVAL_BYBIT: Duration = Duration::from_secs(20);

/// [`Bybit`] linear perpetual venue.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Bybit;

impl Venue for Bybit {
    const ID: VenueId = VenueId::Bybit;

    fn stream(channel: Channel, params: &StreamParams) -> Result<StreamSpec, DataError> {
        if channel != Channel::Liquidation {
            return Err(Self::unsupported(channel));
        }

        let url =
            Url::parse(BASE_URL_BYBIT_LINEAR_WS).map_err(|error| DataError::payload(Self::ID, error))?;

        let subscribe = json!({
            "op": "subscribe",
            "args": [format!("allLiquidation.{}", params.instrument.concatenated())],
        });

        Ok(StreamSpec {
            id: ConnectionId::new(Self::ID, channel),
            url,
            subscriptions: vec![subscribe.to_string()],
            ping: Some(PingInterval {
                every: PING_INTERVAL_BYBIT,
                payload: json!({ "op": "ping" }).to_string(),
            }),
        })
    }

    fn normalise(channel: Channel, payload: &str) -> MarketIter {
        match channel {
            Channel::Liquidation => liquidation::normalise(payload),
            other => Self::unsupported(other).into(),
        }
    }

    fn bid_book_url(instrument: &Instrument, depth: usize) -> Result<Url, DataError> {
        url_with_query(
            Self::ID,
            &format!("{BASE_URL_BYBIT_REST}/v5/market/orderbook"),
            &[
                ("category", "linear"),
                ("symbol", instrument.concatenated().as_str()),
                ("limit", &depth.min(500).to_string()),
            ],
        )
    }

    /// See docs: <https://bybit-exchange.github.io/docs/v5/market/orderbook>
    fn parse_bids(body: &str, _: &Instrument) -> Result<Vec<BookLevel>, DataError> {
        let value = super::parse_json(Self::ID, body)?;

        match value.get("retCode").and_then(serde_json::Value::as_i64) {
            Some(0) | None => {}
            Some(code) => {
                let message = value
                    .get("retMsg")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or_default();
                return Err(DataError::payload(
                    Self::ID,
                    format!("retCode {code}: {message}"),
                ));
            }
        }

        value
            .get("result")
            .and_then(|result| result.get("b"))
            .and_then(book_levels)
            .ok_or_else(|| super::missing(Self::ID, "result.b"))
    }
}
