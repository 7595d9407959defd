#![forbid(unsafe_code)]
#![warn(unused, clippy::cognitive_complexity)]

//! # Livetape-Server
//! Maintains small bounded in-memory aggregates fed by [`livetape_data`] and republishes a
//! consistent live view to many concurrent WebSocket subscribers.
//!
//! ```text
//!  Supervisor ──► Ingestor ──► MarketHub ──┬──► broadcast ──► subscribers
//!  pollers (REST) ─────────────────┘       └──► queries
//! ```
//!
//! Every aggregate in the [`hub::MarketHub`] sits behind its own lock; incremental events are
//! published while that lock is held, and a new subscriber captures its bootstrap under all
//! of them, so a subscriber never sees an increment before the state it applies to.

/// Environment driven [`ServerConfig`](config::ServerConfig).
pub mod config;

/// All [`Error`](std::error::Error)s generated in Livetape-Server.
pub mod error;

/// Bounded, sorted candle series.
pub mod candles;

/// Most-recent-first liquidation list with a notional floor.
pub mod liquidations;

/// Cross-venue top-buyers aggregation.
pub mod top_buyers;

/// Once-per-second price heartbeat.
pub mod heartbeat;

/// Outbound event model and wire encoding.
pub mod event;

/// Single-writer aggregates, fan-out broadcaster and query interface.
pub mod hub;

/// [`PayloadSink`](livetape_data::streams::PayloadSink) feeding normalised events into the hub.
pub mod ingest;

/// Periodic REST pollers.
pub mod feeds;

/// Subscriber WebSocket server.
pub mod server;

/// Process wiring: startup, run & shutdown.
pub mod app;

pub use config::ServerConfig;
pub use error::ServerError;
pub use hub::MarketHub;
