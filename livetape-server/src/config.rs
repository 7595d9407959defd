use crate::{error::ServerError, top_buyers::TopBuyersConfig};
use livetape_data::{
    Channel, ConnectionId, VenueId,
    exchange::{Instrument, StreamParams, binance::kline::interval_ms},
    streams::ReconnectPolicy,
};
use smol_str::SmolStr;
use std::{fmt::Display, net::SocketAddr, str::FromStr, time::Duration};
use tracing::warn;

/// Streaming connections supervised by the server, one per (venue, channel).
pub const CONNECTIONS: [ConnectionId; 5] = [
    ConnectionId {
        venue: VenueId::Binance,
        channel: Channel::Trade,
    },
    ConnectionId {
        venue: VenueId::Binance,
        channel: Channel::Kline,
    },
    ConnectionId {
        venue: VenueId::Binance,
        channel: Channel::Liquidation,
    },
    ConnectionId {
        venue: VenueId::Bybit,
        channel: Channel::Liquidation,
    },
    ConnectionId {
        venue: VenueId::Okx,
        channel: Channel::Liquidation,
    },
];

/// Process configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub ws_addr: SocketAddr,
    pub ws_buffer_size: usize,

    pub instrument: Instrument,
    pub candle_interval: SmolStr,
    pub candle_interval_ms: i64,
    pub candle_capacity: usize,
    pub candle_resync: Duration,

    pub liquidation_capacity: usize,
    pub liquidation_min_notional: f64,

    pub top_buyers_every: Duration,
    pub top_buyers_venues: Vec<VenueId>,
    pub top_buyers_depth: usize,
    pub top_buyers: TopBuyersConfig,

    pub fetch_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub read_timeout: Duration,

    pub markets: Vec<SmolStr>,
    pub markets_every: Duration,
    pub fear_greed_every: Duration,
    pub news_every: Duration,
    pub news_limit: usize,
}

impl ServerConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`, falling back to defaults for absent values and
    /// (with a warning) for values that do not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ws_addr = match lookup("WS_ADDR") {
            Some(addr) => addr.trim().parse::<SocketAddr>().map_err(|error| ServerError::Config {
                key: "WS_ADDR",
                reason: format!("{addr:?}: {error}"),
            })?,
            None => SocketAddr::from(([0, 0, 0, 0], 9001)),
        };

        let symbol = lookup("SYMBOL").unwrap_or_else(|| "BTCUSDT".to_string());
        let instrument = Instrument::parse(&symbol).map_err(|error| ServerError::Config {
            key: "SYMBOL",
            reason: error.to_string(),
        })?;

        let candle_interval = SmolStr::new(lookup("CANDLE_INTERVAL").unwrap_or_else(|| "1m".to_string()).trim());
        let candle_interval_ms = interval_ms(&candle_interval).ok_or_else(|| ServerError::Config {
            key: "CANDLE_INTERVAL",
            reason: format!("unsupported interval {candle_interval:?}"),
        })?;

        let top_buyers_venues = match lookup("TOP_BUYERS_VENUES") {
            Some(venues) => parse_list::<VenueId>(&venues).map_err(|reason| ServerError::Config {
                key: "TOP_BUYERS_VENUES",
                reason,
            })?,
            None => vec![
                VenueId::Binance,
                VenueId::Bybit,
                VenueId::Okx,
                VenueId::Kraken,
            ],
        };

        let markets = lookup("MARKETS")
            .unwrap_or_else(|| "BTCUSDT,ETHUSDT,SOLUSDT".to_string())
            .split(',')
            .map(|symbol| SmolStr::new(symbol.trim().to_ascii_uppercase()))
            .filter(|symbol| !symbol.is_empty())
            .collect();

        let fetch_timeout = Duration::from_millis(parse_where(&lookup, "FETCH_TIMEOUT_MS", 5_000, |ms: &u64| *ms > 0));
        let reconnect_base: u64 = parse_where(&lookup, "RECONNECT_BASE_MS", 1_000, |ms: &u64| *ms > 0);
        let reconnect_max: u64 =
            parse_where(&lookup, "RECONNECT_MAX_MS", reconnect_base.max(30_000), |ms: &u64| *ms >= reconnect_base);

        Ok(Self {
            ws_addr,
            ws_buffer_size: parse_where(&lookup, "WS_BUFFER_SIZE", 10_000, positive),
            instrument,
            candle_interval,
            candle_interval_ms,
            candle_capacity: parse_where(&lookup, "CANDLE_CAPACITY", 200, positive),
            candle_resync: Duration::from_secs(parse_or(&lookup, "CANDLE_RESYNC_SECS", 30)),
            liquidation_capacity: parse_where(&lookup, "LIQ_CAPACITY", 30, positive),
            liquidation_min_notional: parse_where(&lookup, "LIQ_MIN_NOTIONAL", 10_000.0, floor),
            top_buyers_every: Duration::from_secs(parse_or(&lookup, "TOP_BUYERS_SECS", 10)),
            top_buyers_venues,
            top_buyers_depth: parse_where(&lookup, "TOP_BUYERS_DEPTH", 100, positive),
            top_buyers: TopBuyersConfig {
                min_size: parse_where(&lookup, "TOP_BUYERS_MIN_SIZE", 1.0, floor),
                per_venue: parse_where(&lookup, "TOP_BUYERS_PER_VENUE", 10, positive),
                limit: parse_where(&lookup, "TOP_BUYERS_LIMIT", 20, positive),
                timeout: fetch_timeout,
            },
            fetch_timeout,
            reconnect: ReconnectPolicy::new(
                Duration::from_millis(reconnect_base),
                Duration::from_millis(reconnect_max),
            ),
            read_timeout: Duration::from_secs(parse_where(&lookup, "READ_TIMEOUT_SECS", 120, |secs: &u64| *secs > 0)),
            markets,
            markets_every: Duration::from_secs(parse_or(&lookup, "MARKETS_SECS", 15)),
            fear_greed_every: Duration::from_secs(parse_or(&lookup, "FEAR_GREED_SECS", 600)),
            news_every: Duration::from_secs(parse_or(&lookup, "NEWS_SECS", 300)),
            news_limit: parse_where(&lookup, "NEWS_LIMIT", 20, positive),
        })
    }

    pub fn stream_params(&self) -> StreamParams {
        StreamParams {
            instrument: self.instrument.clone(),
            interval: self.candle_interval.clone(),
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
{
    parse_where(lookup, key, default, |_| true)
}

/// Parse `key`, falling back to `default` with a warning when the value does not parse or
/// fails `valid`.
fn parse_where<F, T, V>(lookup: &F, key: &str, default: T, valid: V) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr + Display,
    T::Err: Display,
    V: Fn(&T) -> bool,
{
    let Some(raw) = lookup(key) else {
        return default;
    };

    match raw.trim().parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(_) => {
            warn!(key, value = %raw, %default, "config value out of range, using default");
            default
        }
        Err(error) => {
            warn!(key, value = %raw, %error, %default, "invalid config value, using default");
            default
        }
    }
}

fn positive(value: &usize) -> bool {
    *value > 0
}

/// Finite and non-negative.
fn floor(value: &f64) -> bool {
    value.is_finite() && *value >= 0.0
}

fn parse_list<T>(raw: &str) -> Result<Vec<T>, String>
where
    T: FromStr,
    T::Err: Display,
{
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<T>().map_err(|error| error.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.ws_addr, "0.0.0.0:9001".parse().unwrap());
        assert_eq!(config.ws_buffer_size, 10_000);
        assert_eq!(config.instrument.concatenated(), "BTCUSDT");
        assert_eq!(config.candle_interval_ms, 60_000);
        assert_eq!(config.candle_capacity, 200);
        assert_eq!(config.liquidation_capacity, 30);
        assert_eq!(config.liquidation_min_notional, 10_000.0);
        assert_eq!(config.top_buyers.limit, 20);
        assert_eq!(config.top_buyers.per_venue, 10);
        assert_eq!(config.top_buyers_venues.len(), 4);
        assert_eq!(
            config.reconnect,
            ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(30))
        );
        assert_eq!(config.markets, vec!["BTCUSDT", "ETHUSDT", "SOLUSDT"]);
    }

    #[test]
    fn test_server_config_overrides_and_fallbacks() {
        struct TestCase {
            input: Vec<(&'static str, &'static str)>,
            expected: (usize, i64, f64, f64, ReconnectPolicy),
        }

        let default_policy = ReconnectPolicy::new(Duration::from_secs(1), Duration::from_secs(30));

        let tests = vec![
            TestCase {
                // TC0: valid overrides
                input: vec![
                    ("CANDLE_CAPACITY", "500"),
                    ("CANDLE_INTERVAL", "5m"),
                    ("LIQ_MIN_NOTIONAL", "250000"),
                    ("RECONNECT_BASE_MS", "250"),
                    ("TOP_BUYERS_MIN_SIZE", "0.25"),
                ],
                expected: (
                    500,
                    300_000,
                    250_000.0,
                    0.25,
                    ReconnectPolicy::new(Duration::from_millis(250), Duration::from_secs(30)),
                ),
            },
            TestCase {
                // TC1: unparsable values fall back to defaults
                input: vec![
                    ("CANDLE_CAPACITY", "lots"),
                    ("LIQ_MIN_NOTIONAL", "ten"),
                    ("RECONNECT_BASE_MS", "-1"),
                ],
                expected: (200, 60_000, 10_000.0, 1.0, default_policy),
            },
            TestCase {
                // TC2: zero capacity falls back to default
                input: vec![("CANDLE_CAPACITY", "0")],
                expected: (200, 60_000, 10_000.0, 1.0, default_policy),
            },
            TestCase {
                // TC3: non-finite or negative floors fall back to defaults
                input: vec![("LIQ_MIN_NOTIONAL", "NaN"), ("TOP_BUYERS_MIN_SIZE", "-2")],
                expected: (200, 60_000, 10_000.0, 1.0, default_policy),
            },
            TestCase {
                // TC4: infinite floor falls back to default
                input: vec![("LIQ_MIN_NOTIONAL", "inf"), ("TOP_BUYERS_MIN_SIZE", "NaN")],
                expected: (200, 60_000, 10_000.0, 1.0, default_policy),
            },
            TestCase {
                // TC5: zero backoff base falls back to default
                input: vec![("RECONNECT_BASE_MS", "0")],
                expected: (200, 60_000, 10_000.0, 1.0, default_policy),
            },
            TestCase {
                // TC6: backoff cap below the base falls back to its default
                input: vec![("RECONNECT_BASE_MS", "5000"), ("RECONNECT_MAX_MS", "100")],
                expected: (
                    200,
                    60_000,
                    10_000.0,
                    1.0,
                    ReconnectPolicy::new(Duration::from_secs(5), Duration::from_secs(30)),
                ),
            },
            TestCase {
                // TC7: base above the default cap raises the cap default to the base
                input: vec![("RECONNECT_BASE_MS", "60000")],
                expected: (
                    200,
                    60_000,
                    10_000.0,
                    1.0,
                    ReconnectPolicy::new(Duration::from_secs(60), Duration::from_secs(60)),
                ),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let config = ServerConfig::from_lookup(lookup(&test.input)).unwrap();
            let actual = (
                config.candle_capacity,
                config.candle_interval_ms,
                config.liquidation_min_notional,
                config.top_buyers.min_size,
                config.reconnect,
            );
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_server_config_rejects_invalid_required_values() {
        struct TestCase {
            input: Vec<(&'static str, &'static str)>,
            expected: &'static str,
        }

        let tests = vec![
            TestCase {
                // TC0
                input: vec![("WS_ADDR", "not-an-addr")],
                expected: "WS_ADDR",
            },
            TestCase {
                // TC1
                input: vec![("SYMBOL", "BTCEUR")],
                expected: "SYMBOL",
            },
            TestCase {
                // TC2
                input: vec![("CANDLE_INTERVAL", "1M")],
                expected: "CANDLE_INTERVAL",
            },
            TestCase {
                // TC3
                input: vec![("TOP_BUYERS_VENUES", "binance,coinbase")],
                expected: "TOP_BUYERS_VENUES",
            },
            TestCase {
                // TC4: not offered by the futures kline stream
                input: vec![("CANDLE_INTERVAL", "1s")],
                expected: "CANDLE_INTERVAL",
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            match ServerConfig::from_lookup(lookup(&test.input)) {
                Err(ServerError::Config { key, .. }) => {
                    assert_eq!(key, test.expected, "TC{} failed", index)
                }
                other => panic!("TC{} failed: {:?}", index, other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_server_config_lists() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("MARKETS", " btcusdt , ethusdt,, "),
            ("TOP_BUYERS_VENUES", "okx, KRAKEN"),
        ]))
        .unwrap();

        assert_eq!(config.markets, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(config.top_buyers_venues, vec![VenueId::Okx, VenueId::Kraken]);
    }
}
