use super::{Instrument, PingInterval, StreamParams, StreamSpec, Venue, snapshot::url_with_query};
use crate::{
    DataError,
    de::book_levels,
    event::{BookLevel, Channel, ConnectionId, MarketIter, VenueId},
};
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

/// Liquidation orders stream.
pub mod liquidation;

/// [`Okx`] public WebSocket url.
///
/// See docs: <https://www.okx.com/docs-v5/en/#overview-api-resources-and-support>
pub const BASE_URL_OKX_WS: &str = "wss://ws.okx.com:8443/ws/v5/public";

/// [`Okx`] REST base url.
pub const BASE_URL_OKX_REST: &str = "https://www.okx.com";

/// [`Okx`] closes connections idle for 30 seconds, so ping a little sooner.
///
/// See docs: <https://www.okx.com/docs-v5/en/#websocket-api-connect>
pub const PING_INTERVAL_OKX: Duration = Duration::from_secs(25);

/// [`Okx`] SWAP venue.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Default)]
pub struct Okx;

/// Size of one [`Okx`] SWAP contract.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ContractValue {
    /// Base currency units per contract (USDT margined).
    Linear(f64),
    /// Quote currency (USD) per contract (coin margined).
    Inverse(f64),
}

impl ContractValue {
    /// Contract value for an instrument id, eg/ "BTC-USDT-SWAP" => `Linear(0.01)`.
    ///
    /// Unlisted linear swaps assume one base unit per contract.
    pub fn of(inst_id: &str) -> Self {
        let mut parts = inst_id.split('-');
        let base = parts.next().unwrap_or_default();
        let quote = parts.next().unwrap_or_default();

        match (base, quote) {
            ("BTC", "USD") => Self::Inverse(100.0),
            (_, "USD") => Self::Inverse(10.0),
            ("BTC", _) => Self::Linear(0.01),
            ("ETH", _) => Self::Linear(0.1),
            _ => Self::Linear(1.0),
        }
    }

    /// Convert a contract count into base currency quantity at `price`.
    pub fn base_qty(&self, contracts: f64, price: f64) -> f64 {
        match self {
            Self::Linear(per_contract) => contracts * per_contract,
            Self::Inverse(usd_per_contract) => contracts * usd_per_contract / price,
        }
    }
}

impl Venue for Okx {
    const ID: VenueId = VenueId::Okx;

    fn stream(channel: Channel, _: &StreamParams) -> Result<StreamSpec, DataError> {
        if channel != Channel::Liquidation {
            return Err(Self::unsupported(channel));
        }

        let url = Url::parse(BASE_URL_OKX_WS).map_err(|error| DataError::payload(Self::ID, error))?;

        let subscribe = json!({
            "op": "subscribe",
            "args": [{ "channel": "liquidation-orders", "instType": "SWAP" }],
        });

        Ok(StreamSpec {
            id: ConnectionId::new(Self::ID, channel),
            url,
            subscriptions: vec![subscribe.to_string()],
            ping: Some(PingInterval {
                every: PING_INTERVAL_OKX,
                payload: "ping".to_string(),
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
            &format!("{BASE_URL_OKX_REST}/api/v5/market/books"),
            &[
                ("instId", instrument.okx_swap().as_str()),
                ("sz", &depth.min(400).to_string()),
            ],
        )
    }

    /// Sizes are reported in contracts and converted into base currency.
    ///
    /// See docs: <https://www.okx.com/docs-v5/en/#order-book-trading-market-data-get-order-book>
    fn parse_bids(body: &str, instrument: &Instrument) -> Result<Vec<BookLevel>, DataError> {
        let value = super::parse_json(Self::ID, body)?;
        check_code(&value)?;

        let contract = ContractValue::of(&instrument.okx_swap());

        value
            .get("data")
            .and_then(|data| data.get(0))
            .and_then(|book| book.get("bids"))
            .and_then(book_levels)
            .map(|levels| {
                levels
                    .into_iter()
                    .map(|level| {
                        BookLevel::new(level.price, contract.base_qty(level.size, level.price))
                    })
                    .collect()
            })
            .ok_or_else(|| super::missing(Self::ID, "data[0].bids"))
    }
}

/// REST responses carry `"code": "0"` on success.
fn check_code(value: &Value) -> Result<(), DataError> {
    match value.get("code").and_then(Value::as_str) {
        Some("0") | None => Ok(()),
        Some(code) => Err(DataError::payload(
            VenueId::Okx,
            format!(
                "code {code}: {}",
                value.get("msg").and_then(Value::as_str).unwrap_or_default()
            ),
        )),
    }
}
