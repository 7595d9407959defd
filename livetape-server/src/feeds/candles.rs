use crate::{config::ServerConfig, error::ServerError, hub::MarketHub};
use livetape_data::{VenueId, exchange::binance::kline, rest};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Periodic correction of the streaming candle series against Binance REST klines.
#[derive(Clone, Debug)]
pub struct CandleHistory {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl CandleHistory {
    pub fn new(client: Client, config: &ServerConfig) -> Result<Self, ServerError> {
        let url = kline::history_url(&config.instrument, &config.candle_interval, config.candle_capacity)?;

        Ok(Self {
            client,
            url,
            timeout: config.fetch_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Replace the hub's candle series with the authoritative history.
    ///
    /// Returns true if the series' last candle changed (and `history` was published).
    pub async fn resync(&self, hub: &MarketHub) -> Result<bool, ServerError> {
        let body = rest::get_text(&self.client, VenueId::Binance, &self.url, self.timeout).await?;
        let candles = kline::parse_history(&body, chrono::Utc::now().timestamp_millis())?;

        let received = candles.len();
        let changed = hub.resync_candles(candles);
        debug!(received, changed, "candle history resynced");

        Ok(changed)
    }
}
