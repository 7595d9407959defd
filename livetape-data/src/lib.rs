#![forbid(unsafe_code)]
#![warn(unused, clippy::cognitive_complexity)]

//! # Livetape-Data
//! Normalised market data ingestion from several heterogeneous venues.
//!
//! * **Supervised**: one persistent streaming connection per (venue, channel), each with its
//!   own reconnect backoff and failure isolation. See [`streams::supervisor::Supervisor`].
//! * **Normalised**: every venue wire schema is mapped into the shared [`event`] types
//!   ([`Trade`](event::Trade), [`Candle`](event::Candle), [`Liquidation`](event::Liquidation),
//!   [`BookLevel`](event::BookLevel)) by total functions that either produce events or reject.
//! * **Snapshots**: pull-based resting-bid snapshots via [`exchange::BidBookSource`].
//!
//! ```text
//!  venue ws ──► Connector ──► TimeoutStream ──► Supervisor ──► PayloadSink
//!                                                         (normalise + apply)
//! ```

/// All [`Error`](std::error::Error)s generated in Livetape-Data.
pub mod error;

/// Canonical event model shared by every venue.
pub mod event;

/// Field resolution & number parsing helpers for venue payloads.
pub mod de;

/// Venue specific stream definitions, normalisers and REST snapshot sources.
pub mod exchange;

/// Thin REST helpers shared by snapshot sources and pollers.
pub mod rest;

/// Reconnecting, supervised venue streams.
pub mod streams;

pub use error::DataError;
pub use event::{
    BookLevel, Candle, Channel, ConnectionId, Liquidation, MarketEvent, MarketIter, Side, Trade, VenueId,
};
