use crate::event::{Channel, ConnectionId, VenueId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors generated in `livetape-data`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Error)]
pub enum DataError {
    #[error("SocketError: {0}")]
    Socket(String),

    #[error("{venue} request failed: {reason}")]
    Request { venue: VenueId, reason: String },

    #[error("{venue} responded with HTTP status {status}")]
    Http { venue: VenueId, status: u16 },

    #[error("{venue} did not respond within {after_ms}ms")]
    Timeout { venue: VenueId, after_ms: u64 },

    #[error("{venue} payload malformed: {reason}")]
    Payload { venue: VenueId, reason: String },

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("unsupported channel {channel} for venue {venue}")]
    UnknownChannel { venue: VenueId, channel: Channel },

    #[error("no connection registered for {0}")]
    UnknownConnection(ConnectionId),

    #[error("supervisor is shut down")]
    Shutdown,
}

impl DataError {
    /// Determine if an error is a transient upstream failure that should be retried (via
    /// reconnect backoff or the next polling cycle), rather than a rejected payload.
    #[allow(clippy::match_like_matches_macro)]
    pub fn is_transient(&self) -> bool {
        match self {
            DataError::Socket(_)
            | DataError::Request { .. }
            | DataError::Http { .. }
            | DataError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Construct a [`DataError::Payload`] from anything displayable.
    pub fn payload(venue: VenueId, reason: impl std::fmt::Display) -> Self {
        Self::Payload {
            venue,
            reason: reason.to_string(),
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for DataError {
    fn from(value: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Socket(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_error_is_transient() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: socket drop is transient
                input: DataError::Socket("WebSocket error: ConnectionClosed".to_string()),
                expected: true,
            },
            TestCase {
                // TC1: non-2xx is transient
                input: DataError::Http {
                    venue: VenueId::Bybit,
                    status: 503,
                },
                expected: true,
            },
            TestCase {
                // TC2: timeout is transient
                input: DataError::Timeout {
                    venue: VenueId::Okx,
                    after_ms: 5000,
                },
                expected: true,
            },
            TestCase {
                // TC3: malformed payload is not transient
                input: DataError::payload(VenueId::Binance, "missing field `p`"),
                expected: false,
            },
            TestCase {
                // TC4: rejected event is not transient
                input: DataError::Rejected("price must be positive".to_string()),
                expected: false,
            },
            TestCase {
                // TC5: shutdown is not transient
                input: DataError::Shutdown,
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_transient();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
