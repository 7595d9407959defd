use crate::{error::ServerError, feeds::fetch_text, hub::MarketHub};
use livetape_data::de::de_str;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const FEAR_GREED_URL: &str = "https://api.alternative.me/fng/?limit=1";

/// Latest Fear & Greed index reading.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct FearGreed {
    /// 0 (extreme fear) to 100 (extreme greed).
    pub value: u8,
    pub classification: String,
    /// Epoch milliseconds.
    pub ts: i64,
}

#[derive(Debug, Deserialize)]
struct FearGreedResponse {
    #[serde(default)]
    data: Vec<FearGreedEntry>,
}

#[derive(Debug, Deserialize)]
struct FearGreedEntry {
    #[serde(deserialize_with = "de_str")]
    value: u8,
    value_classification: String,
    /// Epoch seconds.
    #[serde(deserialize_with = "de_str")]
    timestamp: i64,
}

/// Parse an alternative.me `/fng/` body into its most recent reading.
pub fn parse_fear_greed(body: &str) -> Result<FearGreed, ServerError> {
    let response = serde_json::from_str::<FearGreedResponse>(body)
        .map_err(|error| ServerError::feed("fearGreed", error))?;

    let entry = response
        .data
        .into_iter()
        .next()
        .ok_or_else(|| ServerError::feed("fearGreed", "empty data"))?;

    if entry.value > 100 {
        return Err(ServerError::feed("fearGreed", format!("value out of range: {}", entry.value)));
    }

    Ok(FearGreed {
        value: entry.value,
        classification: entry.value_classification,
        ts: entry.timestamp.saturating_mul(1_000),
    })
}

#[derive(Clone, Debug)]
pub struct FearGreedFeed {
    client: Client,
    url: Url,
    timeout: Duration,
}

impl FearGreedFeed {
    pub fn new(client: Client, timeout: Duration) -> Result<Self, ServerError> {
        let url = Url::parse(FEAR_GREED_URL).map_err(|error| ServerError::feed("fearGreed", error))?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }

    pub async fn poll(&self, hub: &MarketHub) -> Result<(), ServerError> {
        let body = fetch_text(&self.client, "fearGreed", &self.url, self.timeout).await?;
        hub.replace_sentiment(parse_fear_greed(&body)?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fear_greed() {
        struct TestCase {
            input: &'static str,
            expected: Option<FearGreed>,
        }

        let tests = vec![
            TestCase {
                // TC0: valid
                input: r#"{
                    "name": "Fear and Greed Index",
                    "data": [{"value": "40", "value_classification": "Fear", "timestamp": "1551157200", "time_until_update": "68499"}],
                    "metadata": {"error": null}
                }"#,
                expected: Some(FearGreed {
                    value: 40,
                    classification: "Fear".to_string(),
                    ts: 1_551_157_200_000,
                }),
            },
            TestCase {
                // TC1: empty data
                input: r#"{"name": "Fear and Greed Index", "data": [], "metadata": {"error": "busy"}}"#,
                expected: None,
            },
            TestCase {
                // TC2: value out of range
                input: r#"{"data": [{"value": "140", "value_classification": "Greed", "timestamp": "1"}]}"#,
                expected: None,
            },
            TestCase {
                // TC3: not json
                input: "<html>",
                expected: None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = parse_fear_greed(test.input).ok();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
