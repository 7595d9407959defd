use crate::{error::ServerError, hub::MarketHub};
use livetape_data::{
    VenueId,
    de::de_str,
    exchange::binance::BASE_URL_BINANCE_FUTURES_REST,
    rest,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use smol_str::SmolStr;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// One row of the market list.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketTicker {
    pub symbol: SmolStr,
    pub last_price: f64,
    pub change_pct: f64,
    pub quote_volume: f64,
}

/// Binance futures 24h rolling window ticker.
///
/// See docs: <https://developers.binance.com/docs/derivatives/usds-margined-futures/market-data/rest-api/24hr-Ticker-Price-Change-Statistics>
#[derive(Clone, PartialEq, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker24h {
    symbol: SmolStr,
    #[serde(deserialize_with = "de_str")]
    last_price: f64,
    #[serde(deserialize_with = "de_str")]
    price_change_percent: f64,
    #[serde(deserialize_with = "de_str")]
    quote_volume: f64,
}

impl From<BinanceTicker24h> for MarketTicker {
    fn from(ticker: BinanceTicker24h) -> Self {
        Self {
            symbol: ticker.symbol,
            last_price: ticker.last_price,
            change_pct: ticker.price_change_percent,
            quote_volume: ticker.quote_volume,
        }
    }
}

/// Parse a `/fapi/v1/ticker/24hr` body, keeping `symbols` in their configured order.
///
/// Malformed rows and symbols absent from the body are skipped.
pub fn parse_tickers(body: &str, symbols: &[SmolStr]) -> Result<Vec<MarketTicker>, ServerError> {
    let rows = serde_json::from_str::<Vec<Value>>(body).map_err(|error| ServerError::feed("markets", error))?;

    let tickers = symbols
        .iter()
        .filter_map(|symbol| {
            let row = rows
                .iter()
                .find(|row| row.get("symbol").and_then(Value::as_str) == Some(symbol.as_str()))?;

            serde_json::from_value::<BinanceTicker24h>(row.clone())
                .inspect_err(|error| debug!(%symbol, %error, "skipping malformed ticker"))
                .ok()
        })
        .filter(|ticker| ticker.last_price.is_finite() && ticker.last_price > 0.0)
        .map(MarketTicker::from)
        .collect();

    Ok(tickers)
}

#[derive(Clone, Debug)]
pub struct MarketsFeed {
    client: Client,
    url: Url,
    symbols: Vec<SmolStr>,
    timeout: Duration,
}

impl MarketsFeed {
    pub fn new(client: Client, symbols: Vec<SmolStr>, timeout: Duration) -> Result<Self, ServerError> {
        let url = Url::parse(&format!("{BASE_URL_BINANCE_FUTURES_REST}/fapi/v1/ticker/24hr"))
            .map_err(|error| ServerError::feed("markets", error))?;

        Ok(Self {
            client,
            url,
            symbols,
            timeout,
        })
    }

    pub async fn poll(&self, hub: &MarketHub) -> Result<(), ServerError> {
        let body = rest::get_text(&self.client, VenueId::Binance, &self.url, self.timeout).await?;
        let tickers = parse_tickers(&body, &self.symbols)?;

        if tickers.is_empty() {
            return Err(ServerError::feed("markets", "no configured symbol present"));
        }

        hub.replace_markets(tickers);
        Ok(())
    }
}
