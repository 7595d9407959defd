/// Exponential reconnect backoff policy.
pub mod backoff;

/// Idle read timeout stream wrapper.
pub mod timeout;

/// Transport seam for opening a stream of text frames from a [`StreamSpec`](crate::exchange::StreamSpec).
pub mod connector;

/// Per-connection lifecycle & reconnect supervision.
pub mod supervisor;

pub use backoff::ReconnectPolicy;
pub use connector::{Connector, FrameStream, WsConnector};
pub use supervisor::{ConnectionState, ConnectionStatus, PayloadSink, Supervisor};
