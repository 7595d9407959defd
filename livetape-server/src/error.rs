use livetape_data::DataError;
use std::net::SocketAddr;
use thiserror::Error;

/// All errors generated in `livetape-server`.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind subscriber server to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("invalid configuration {key}: {reason}")]
    Config { key: &'static str, reason: String },

    #[error("{feed} feed failed: {reason}")]
    Feed { feed: &'static str, reason: String },

    #[error("failed to encode outbound event: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Data(#[from] DataError),
}

impl ServerError {
    pub fn feed(feed: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Feed {
            feed,
            reason: reason.to_string(),
        }
    }
}
