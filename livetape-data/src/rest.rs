use crate::{DataError, event::VenueId};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Fetch `url` as text, mapping transport failures, non-2xx statuses and timeouts into
/// [`DataError`]s attributed to `venue`.
pub async fn get_text(
    client: &Client,
    venue: VenueId,
    url: &Url,
    timeout: Duration,
) -> Result<String, DataError> {
    debug!(%venue, %url, "sending HTTP GET");

    let request = async {
        let response = client
            .get(url.clone())
            .send()
            .await
            .map_err(|error| DataError::Request {
                venue,
                reason: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(DataError::Http {
                venue,
                status: status.as_u16(),
            });
        }

        response.text().await.map_err(|error| DataError::Request {
            venue,
            reason: error.to_string(),
        })
    };

    tokio::time::timeout(timeout, request)
        .await
        .map_err(|_| DataError::Timeout {
            venue,
            after_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })?
}
