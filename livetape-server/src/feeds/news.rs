use crate::{error::ServerError, feeds::fetch_text, hub::MarketHub};
use livetape_data::de::{first_integer, first_str};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

const NEWS_URL: &str = "https://min-api.cryptocompare.com/data/v2/news/?lang=EN";

/// One headline of the news list.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub id: String,
    pub title: String,
    pub url: String,
    pub source: String,
    /// Epoch milliseconds.
    pub published_at: i64,
}

/// Parse a CryptoCompare `/data/v2/news/` body into at most `limit` items, newest first.
///
/// Items without an id, title or url are skipped.
pub fn parse_news(body: &str, limit: usize) -> Result<Vec<NewsItem>, ServerError> {
    let value = serde_json::from_str::<Value>(body).map_err(|error| ServerError::feed("news", error))?;

    if value.get("Response").and_then(Value::as_str) == Some("Error") {
        let message = value.get("Message").and_then(Value::as_str).unwrap_or("unknown error");
        return Err(ServerError::feed("news", message));
    }

    let entries = value
        .get("Data")
        .and_then(Value::as_array)
        .ok_or_else(|| ServerError::feed("news", "missing Data array"))?;

    let mut items = entries.iter().filter_map(news_item).collect::<Vec<_>>();
    items.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    items.truncate(limit);

    debug!(received = entries.len(), kept = items.len(), "parsed news");
    Ok(items)
}

fn news_item(entry: &Value) -> Option<NewsItem> {
    let id = match entry.get("id")? {
        Value::String(id) if !id.is_empty() => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => return None,
    };

    let source = entry
        .get("source_info")
        .and_then(|info| first_str(info, &["name"]))
        .or_else(|| first_str(entry, &["source"]))
        .unwrap_or_default();

    Some(NewsItem {
        id,
        title: first_str(entry, &["title"])?.to_string(),
        url: first_str(entry, &["url", "guid"])?.to_string(),
        source: source.to_string(),
        published_at: first_integer(entry, &["published_on"])?.saturating_mul(1_000),
    })
}

#[derive(Clone, Debug)]
pub struct NewsFeed {
    client: Client,
    url: Url,
    limit: usize,
    timeout: Duration,
}

impl NewsFeed {
    pub fn new(client: Client, limit: usize, timeout: Duration) -> Result<Self, ServerError> {
        let url = Url::parse(NEWS_URL).map_err(|error| ServerError::feed("news", error))?;
        Ok(Self {
            client,
            url,
            limit,
            timeout,
        })
    }

    pub async fn poll(&self, hub: &MarketHub) -> Result<(), ServerError> {
        let body = fetch_text(&self.client, "news", &self.url, self.timeout).await?;
        hub.replace_news(parse_news(&body, self.limit)?);
        Ok(())
    }
}
