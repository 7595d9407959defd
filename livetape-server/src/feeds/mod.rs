use crate::error::ServerError;
use reqwest::Client;
use std::{future::Future, time::Duration};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

/// Authoritative REST candle history used to resync the candle series.
pub mod candles;

/// Binance futures 24h tickers for the configured market list.
pub mod markets;

/// Fear & Greed sentiment reading.
pub mod sentiment;

/// Headline news list.
pub mod news;

const MIN_PERIOD: Duration = Duration::from_millis(100);

/// Run `task` immediately and then every `every` until `shutdown` flips to true (or its
/// sender is dropped). A failed run is logged and leaves the previously published value in
/// place; the next tick simply tries again.
pub async fn run_every<F, Fut>(
    feed: &'static str,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ServerError>>,
{
    let mut timer = tokio::time::interval(every.max(MIN_PERIOD));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(feed, every_ms = every.as_millis() as u64, "poller started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {
                if let Err(error) = task().await {
                    warn!(feed, %error, "poll failed, keeping previous value");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!(feed, "poller stopped");
}

/// GET `url` as text for a non-venue feed, bounded by `timeout`.
pub(crate) async fn fetch_text(
    client: &Client,
    feed: &'static str,
    url: &Url,
    timeout: Duration,
) -> Result<String, ServerError> {
    debug!(feed, %url, "sending HTTP GET");

    let request = async {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| ServerError::feed(feed, error))?;

        let response = response
            .error_for_status()
            .map_err(|error| ServerError::feed(feed, error))?;

        response.text().await.map_err(|error| ServerError::feed(feed, error))
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| ServerError::feed(feed, format!("no response within {}ms", timeout.as_millis())))?
}
