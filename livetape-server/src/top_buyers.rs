//! Cross-venue top-buyers aggregation.
//!
//! Every venue's resting bids are fetched concurrently and each fetch settles on its own, so a
//! slow or failing venue only removes its own rows and marks its own status as `error`.

use futures::future::join_all;
use itertools::Itertools;
use livetape_data::{BookLevel, DataError, VenueId, exchange::BidBookSource};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, warn};

/// Aggregation limits.
#[derive(Clone, Debug)]
pub struct TopBuyersConfig {
    /// Minimum resting bid size (base units) for a level to qualify.
    pub min_size: f64,
    /// Rows kept per venue before the merge.
    pub per_venue: usize,
    /// Rows kept after the merge.
    pub limit: usize,
    /// Per-venue fetch timeout.
    pub timeout: Duration,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopBuyerRow {
    pub exchange_id: VenueId,
    pub price: f64,
    pub size: f64,
    pub notional: f64,
}

#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VenueHealth {
    Ok,
    Error,
}

#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeStatus {
    pub exchange_id: VenueId,
    pub status: VenueHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// Result of one aggregation cycle, replacing the previous one wholesale.
#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopBuyersSnapshot {
    pub rows: Vec<TopBuyerRow>,
    pub statuses: Vec<ExchangeStatus>,
    /// Epoch milliseconds.
    pub updated_at: i64,
}

/// Qualifying rows of one venue, ranked by notional descending and capped at `per_venue`.
pub fn venue_rows(venue: VenueId, bids: &[BookLevel], config: &TopBuyersConfig) -> Vec<TopBuyerRow> {
    bids.iter()
        .filter(|level| level.size >= config.min_size)
        .map(|level| TopBuyerRow {
            exchange_id: venue,
            price: level.price,
            size: level.size,
            notional: level.price * level.size,
        })
        .filter(|row| row.notional.is_finite())
        .sorted_by(|a, b| b.notional.total_cmp(&a.notional))
        .take(config.per_venue)
        .collect()
}

/// Merge per-venue fetch results into a snapshot: failed venues contribute no rows and an
/// `error` status, surviving rows are globally re-ranked and truncated to `limit`.
pub fn merge<I>(results: I, config: &TopBuyersConfig, now_ms: i64) -> TopBuyersSnapshot
where
    I: IntoIterator<Item = (VenueId, Result<Vec<BookLevel>, DataError>)>,
{
    let mut rows = Vec::new();
    let mut statuses = Vec::new();

    for (venue, result) in results {
        match result {
            Ok(bids) => {
                rows.extend(venue_rows(venue, &bids, config));
                statuses.push(ExchangeStatus {
                    exchange_id: venue,
                    status: VenueHealth::Ok,
                    error_message: None,
                });
            }
            Err(error) => {
                statuses.push(ExchangeStatus {
                    exchange_id: venue,
                    status: VenueHealth::Error,
                    error_message: Some(error.to_string()),
                });
            }
        }
    }

    let rows = rows
        .into_iter()
        .sorted_by(|a, b| b.notional.total_cmp(&a.notional))
        .take(config.limit)
        .collect();

    TopBuyersSnapshot {
        rows,
        statuses,
        updated_at: now_ms,
    }
}

/// Fetch every source concurrently, each bounded by `config.timeout`, and merge the outcomes.
pub async fn collect(sources: &[Arc<dyn BidBookSource>], config: &TopBuyersConfig) -> TopBuyersSnapshot {
    let fetches = sources.iter().map(|source| async move {
        let venue = source.venue();
        let result = match tokio::time::timeout(config.timeout, source.fetch_bids()).await {
            Ok(result) => result,
            Err(_) => Err(DataError::Timeout {
                venue,
                after_ms: u64::try_from(config.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        };

        match &result {
            Ok(bids) => debug!(%venue, levels = bids.len(), "fetched bid book"),
            Err(error) => warn!(%venue, %error, "bid book fetch failed"),
        }

        (venue, result)
    });

    let results = join_all(fetches).await;
    merge(results, config, chrono::Utc::now().timestamp_millis())
}
