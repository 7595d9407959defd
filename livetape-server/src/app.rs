use crate::{
    config::{CONNECTIONS, ServerConfig},
    error::ServerError,
    feeds::{
        candles::CandleHistory, markets::MarketsFeed, news::NewsFeed, run_every,
        sentiment::FearGreedFeed,
    },
    heartbeat::MonotonicClock,
    hub::MarketHub,
    ingest::Ingestor,
    server, top_buyers,
};
use futures::future::join_all;
use livetape_data::{
    exchange::{self, BidBookSource, RestBidBook},
    streams::{Supervisor, WsConnector},
};
use reqwest::Client;
use std::{sync::Arc, time::Duration};
use tokio::{
    net::TcpListener,
    sync::watch,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info};

/// Heartbeat sampling period; emissions are still limited to one per second bucket.
pub const HEARTBEAT_TICK: Duration = Duration::from_millis(250);

/// Bind the subscriber server, start every component, then run until Ctrl-C.
pub async fn run(config: ServerConfig) -> Result<(), ServerError> {
    let listener = TcpListener::bind(config.ws_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.ws_addr,
            source,
        })?;

    let app = App::start(config, listener).await?;

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(error) => error!(%error, "failed to listen for ctrl-c, shutting down"),
    }

    app.shutdown().await;
    Ok(())
}

/// Running process: the hub plus every task feeding or serving it.
pub struct App {
    hub: Arc<MarketHub>,
    supervisor: Supervisor<WsConnector, Ingestor>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl App {
    /// Resync candles once, open every venue connection, then start pollers, the price
    /// heartbeat and the subscriber server on `listener`.
    pub async fn start(config: ServerConfig, listener: TcpListener) -> Result<Self, ServerError> {
        let hub = Arc::new(MarketHub::new(&config));
        let client = Client::new();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let history = Arc::new(CandleHistory::new(client.clone(), &config)?);
        match history.resync(&hub).await {
            Ok(_) => info!(candles = hub.candles(config.candle_capacity).len(), "initial candle resync complete"),
            Err(error) => error!(%error, "initial candle resync failed, relying on stream"),
        }

        let supervisor = Supervisor::new(
            WsConnector::new(config.read_timeout),
            Ingestor::new(Arc::clone(&hub)),
            config.reconnect,
        );
        let params = config.stream_params();
        for id in CONNECTIONS {
            supervisor.register(exchange::stream_spec(id, &params)?)?;
        }
        supervisor.open_all()?;

        let sources = config
            .top_buyers_venues
            .iter()
            .map(|venue| {
                RestBidBook::new(
                    *venue,
                    client.clone(),
                    config.instrument.clone(),
                    config.top_buyers_depth,
                    config.top_buyers.timeout,
                )
                .map(|source| Arc::new(source) as Arc<dyn BidBookSource>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let sources = Arc::new(sources);

        let markets = Arc::new(MarketsFeed::new(client.clone(), config.markets.clone(), config.fetch_timeout)?);
        let fear_greed = Arc::new(FearGreedFeed::new(client.clone(), config.fetch_timeout)?);
        let news = Arc::new(NewsFeed::new(client, config.news_limit, config.fetch_timeout)?);

        let mut tasks = Vec::new();

        tasks.push(tokio::spawn(run_every("candles", config.candle_resync, shutdown_rx.clone(), {
            let hub = Arc::clone(&hub);
            move || {
                let (history, hub) = (Arc::clone(&history), Arc::clone(&hub));
                async move { history.resync(&hub).await.map(|_| ()) }
            }
        })));

        tasks.push(tokio::spawn(run_every("topBuyers", config.top_buyers_every, shutdown_rx.clone(), {
            let hub = Arc::clone(&hub);
            let limits = config.top_buyers.clone();
            move || {
                let (sources, hub, limits) = (Arc::clone(&sources), Arc::clone(&hub), limits.clone());
                async move {
                    hub.replace_top_buyers(top_buyers::collect(&sources, &limits).await);
                    Ok(())
                }
            }
        })));

        tasks.push(tokio::spawn(run_every("markets", config.markets_every, shutdown_rx.clone(), {
            let hub = Arc::clone(&hub);
            move || {
                let (markets, hub) = (Arc::clone(&markets), Arc::clone(&hub));
                async move { markets.poll(&hub).await }
            }
        })));

        tasks.push(tokio::spawn(run_every("fearGreed", config.fear_greed_every, shutdown_rx.clone(), {
            let hub = Arc::clone(&hub);
            move || {
                let (fear_greed, hub) = (Arc::clone(&fear_greed), Arc::clone(&hub));
                async move { fear_greed.poll(&hub).await }
            }
        })));

        tasks.push(tokio::spawn(run_every("news", config.news_every, shutdown_rx.clone(), {
            let hub = Arc::clone(&hub);
            move || {
                let (news, hub) = (Arc::clone(&news), Arc::clone(&hub));
                async move { news.poll(&hub).await }
            }
        })));

        tasks.push(tokio::spawn(run_heartbeat(
            Arc::clone(&hub),
            MonotonicClock::new(),
            HEARTBEAT_TICK,
            shutdown_rx.clone(),
        )));

        tasks.push(tokio::spawn(server::serve(listener, Arc::clone(&hub), shutdown_rx)));

        info!(
            connections = CONNECTIONS.len(),
            venues = ?config.top_buyers_venues,
            "livetape-server started"
        );

        Ok(Self {
            hub,
            supervisor,
            shutdown,
            tasks,
        })
    }

    /// Signal every periodic task, close every venue connection without scheduling further
    /// reconnects, and wait for all tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        self.supervisor.shutdown().await;

        for state in self.supervisor.snapshot() {
            debug!(
                connection = %state.id,
                status = ?state.status,
                attempt = state.reconnect_attempt,
                "connection state at shutdown"
            );
        }

        for result in join_all(self.tasks).await {
            if let Err(error) = result {
                error!(%error, "task failed during shutdown");
            }
        }

        info!(
            latest_price = ?self.hub.latest_price(),
            candles = self.hub.candles(usize::MAX).len(),
            liquidations = self.hub.liquidations().len(),
            subscribers = self.hub.subscriber_count(),
            "hub state at shutdown"
        );

        info!("livetape-server stopped");
    }
}

/// Sample the hub's latest price every `every` and re-emit it once per second bucket.
pub async fn run_heartbeat(
    hub: Arc<MarketHub>,
    clock: MonotonicClock,
    every: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut timer = tokio::time::interval(every.max(Duration::from_millis(1)));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = timer.tick() => {
                hub.heartbeat(clock.now_ms());
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    debug!("price heartbeat stopped");
}
