use crate::hub::MarketHub;
use livetape_data::{ConnectionId, exchange, streams::PayloadSink};
use std::sync::Arc;
use tracing::warn;

const EXCERPT_CHARS: usize = 200;

/// [`PayloadSink`] that normalises raw venue payloads and applies every accepted event to the
/// [`MarketHub`]. Rejected entries are logged and dropped; the connection is never affected.
#[derive(Clone, Debug)]
pub struct Ingestor {
    hub: Arc<MarketHub>,
}

impl Ingestor {
    pub fn new(hub: Arc<MarketHub>) -> Self {
        Self { hub }
    }
}

impl PayloadSink for Ingestor {
    fn on_payload(&self, id: &ConnectionId, payload: &str) {
        for result in exchange::normalise(id, payload) {
            match result {
                Ok(event) => self.hub.apply(event),
                Err(error) => warn!(
                    venue = %id.venue,
                    channel = %id.channel,
                    %error,
                    payload = excerpt(payload),
                    "rejected payload"
                ),
            }
        }
    }
}

/// The first 200 characters of `payload`, cut on a char boundary.
fn excerpt(payload: &str) -> &str {
    match payload.char_indices().nth(EXCERPT_CHARS) {
        Some((index, _)) => &payload[..index],
        None => payload,
    }
}
