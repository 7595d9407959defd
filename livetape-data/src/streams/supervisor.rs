//! One persistent connection per (venue, channel), each with its own lifecycle:
//!
//! ```text
//!  Down ──open──► Opening ──connected──► Open
//!                   ▲  │                   │
//!           timer   │  └──failed──┐        │ closed / errored / idle
//!                   │             ▼        ▼
//!                   └──────── Reconnecting ◄┘
//! ```
//!
//! Every close schedules exactly one reconnect after `min(max, base * 2^(attempt-1))`, and a
//! successful open resets the attempt counter. A failure on one connection never touches
//! another. All transitions happen under one registry lock, so [`Supervisor::shutdown`]
//! cannot race with a close that would otherwise schedule a late reconnect.

use super::{backoff::ReconnectPolicy, connector::Connector};
use crate::{DataError, event::ConnectionId, exchange::StreamSpec};
use chrono::{DateTime, Utc};
use fnv::FnvHashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Receives every raw payload delivered on a supervised connection.
pub trait PayloadSink: Send + Sync + 'static {
    fn on_payload(&self, id: &ConnectionId, payload: &str);
}

impl<T> PayloadSink for Arc<T>
where
    T: PayloadSink + ?Sized,
{
    fn on_payload(&self, id: &ConnectionId, payload: &str) {
        (**self).on_payload(id, payload)
    }
}

/// Lifecycle state of one supervised connection.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Down,
    Opening,
    Open,
    Reconnecting,
}

/// Observable snapshot of one supervised connection.
#[derive(Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub id: ConnectionId,
    pub status: ConnectionStatus,
    pub reconnect_attempt: u32,
    pub last_opened_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct Connection {
    spec: StreamSpec,
    status: ConnectionStatus,
    reconnect_attempt: u32,
    last_opened_at: Option<DateTime<Utc>>,
    /// Incremented for every session; stale session & timer callbacks are ignored.
    generation: u64,
    session: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

impl Connection {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            status: ConnectionStatus::Down,
            reconnect_attempt: 0,
            last_opened_at: None,
            generation: 0,
            session: None,
            reconnect: None,
        }
    }

    fn state(&self) -> ConnectionState {
        ConnectionState {
            id: self.spec.id,
            status: self.status,
            reconnect_attempt: self.reconnect_attempt,
            last_opened_at: self.last_opened_at,
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    shutdown: bool,
    connections: FnvHashMap<ConnectionId, Connection>,
}

struct Inner<C, S> {
    connector: C,
    sink: S,
    policy: ReconnectPolicy,
    registry: Mutex<Registry>,
}

/// Supervises a set of venue connections, delivering their payloads to a [`PayloadSink`].
pub struct Supervisor<C, S> {
    inner: Arc<Inner<C, S>>,
}

impl<C, S> Clone for Supervisor<C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C, S> std::fmt::Debug for Supervisor<C, S>
where
    C: Connector,
    S: PayloadSink,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("policy", &self.inner.policy)
            .field("connections", &self.snapshot())
            .finish()
    }
}

impl<C, S> Supervisor<C, S>
where
    C: Connector,
    S: PayloadSink,
{
    pub fn new(connector: C, sink: S, policy: ReconnectPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                connector,
                sink,
                policy,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Register a connection in the `Down` state. Re-registering an id replaces its spec
    /// and leaves any live session untouched.
    pub fn register(&self, spec: StreamSpec) -> Result<(), DataError> {
        let mut registry = self.inner.registry.lock();
        if registry.shutdown {
            return Err(DataError::Shutdown);
        }

        match registry.connections.get_mut(&spec.id) {
            Some(connection) => connection.spec = spec,
            None => {
                registry.connections.insert(spec.id, Connection::new(spec));
            }
        }

        Ok(())
    }

    /// Open a connection.
    ///
    /// A no-op while the connection is already `Opening` or `Open`. A pending reconnect timer
    /// is cancelled and the connection opened immediately.
    pub fn open(&self, id: ConnectionId) -> Result<(), DataError> {
        let mut registry = self.inner.registry.lock();
        if registry.shutdown {
            return Err(DataError::Shutdown);
        }

        let connection = registry
            .connections
            .get_mut(&id)
            .ok_or(DataError::UnknownConnection(id))?;

        Inner::start_session(&self.inner, connection);
        Ok(())
    }

    /// Open every registered connection.
    pub fn open_all(&self) -> Result<(), DataError> {
        self.connection_ids()
            .into_iter()
            .try_for_each(|id| self.open(id))
    }

    /// Stop every connection: pending reconnect timers are cancelled, live sessions aborted,
    /// and no reconnect is ever scheduled afterwards.
    pub async fn shutdown(&self) {
        let handles = {
            let mut registry = self.inner.registry.lock();
            registry.shutdown = true;

            registry
                .connections
                .values_mut()
                .flat_map(|connection| {
                    connection.status = ConnectionStatus::Down;
                    [connection.session.take(), connection.reconnect.take()]
                })
                .flatten()
                .collect::<Vec<_>>()
        };

        info!(tasks = handles.len(), "supervisor shutting down");

        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(error) = handle.await {
                if !error.is_cancelled() {
                    warn!(?error, "connection task failed during shutdown");
                }
            }
        }
    }

    pub fn status(&self, id: &ConnectionId) -> Option<ConnectionState> {
        self.inner
            .registry
            .lock()
            .connections
            .get(id)
            .map(Connection::state)
    }

    /// State of every registered connection, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionState> {
        let mut states = self
            .inner
            .registry
            .lock()
            .connections
            .values()
            .map(Connection::state)
            .collect::<Vec<_>>();
        states.sort_by_key(|state| state.id);
        states
    }

    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        let mut ids = self
            .inner
            .registry
            .lock()
            .connections
            .keys()
            .copied()
            .collect::<Vec<_>>();
        ids.sort();
        ids
    }
}

impl<C, S> Inner<C, S>
where
    C: Connector,
    S: PayloadSink,
{
    /// Spawn a new session for `connection`. Caller holds the registry lock.
    fn start_session(this: &Arc<Self>, connection: &mut Connection) {
        if matches!(
            connection.status,
            ConnectionStatus::Opening | ConnectionStatus::Open
        ) {
            debug!(id = %connection.spec.id, status = ?connection.status, "open ignored");
            return;
        }

        if let Some(timer) = connection.reconnect.take() {
            timer.abort();
        }

        connection.generation += 1;
        connection.status = ConnectionStatus::Opening;

        let generation = connection.generation;
        let spec = connection.spec.clone();
        let inner = Arc::clone(this);

        debug!(id = %spec.id, generation, "opening");
        connection.session = Some(tokio::spawn(async move {
            inner.run_session(spec, generation).await
        }));
    }

    async fn run_session(self: Arc<Self>, spec: StreamSpec, generation: u64) {
        let id = spec.id;

        match self.connector.connect(&spec).await {
            Ok(mut frames) => {
                if !self.on_open(id, generation) {
                    return;
                }

                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(payload) => self.sink.on_payload(&id, &payload),
                        Err(error) => {
                            warn!(%id, %error, "stream error");
                            break;
                        }
                    }
                }

                info!(%id, "stream ended");
            }
            Err(error) => {
                warn!(%id, %error, "connect failed");
            }
        }

        self.on_close(id, generation);
    }

    /// Returns false when the session is stale and should stop.
    fn on_open(&self, id: ConnectionId, generation: u64) -> bool {
        let mut registry = self.registry.lock();
        if registry.shutdown {
            return false;
        }

        let Some(connection) = registry.connections.get_mut(&id) else {
            return false;
        };
        if connection.generation != generation {
            return false;
        }

        connection.status = ConnectionStatus::Open;
        connection.reconnect_attempt = 0;
        connection.last_opened_at = Some(Utc::now());

        info!(%id, "connection open");
        true
    }

    /// Schedule exactly one reconnect for the current session. Repeated or stale closes
    /// are ignored, and nothing is scheduled once shut down.
    fn on_close(self: &Arc<Self>, id: ConnectionId, generation: u64) {
        let mut registry = self.registry.lock();
        let shutdown = registry.shutdown;

        let Some(connection) = registry.connections.get_mut(&id) else {
            return;
        };
        if connection.generation != generation {
            return;
        }

        connection.session = None;

        if shutdown {
            connection.status = ConnectionStatus::Down;
            return;
        }

        if connection.reconnect.is_some() {
            return;
        }

        connection.reconnect_attempt = connection.reconnect_attempt.saturating_add(1);
        connection.status = ConnectionStatus::Reconnecting;

        let attempt = connection.reconnect_attempt;
        let delay = self.policy.delay(attempt);
        let inner = Arc::clone(self);

        warn!(%id, attempt, delay_ms = delay.as_millis() as u64, "connection closed, reconnecting");

        connection.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.fire_reconnect(id, generation);
        }));
    }

    fn fire_reconnect(self: &Arc<Self>, id: ConnectionId, generation: u64) {
        let mut registry = self.registry.lock();
        if registry.shutdown {
            return;
        }

        let Some(connection) = registry.connections.get_mut(&id) else {
            return;
        };
        if connection.generation != generation || connection.reconnect.is_none() {
            return;
        }

        connection.reconnect = None;
        Self::start_session(self, connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Channel, VenueId},
        streams::connector::{FrameStream, WsConnector},
    };
    use async_trait::async_trait;
    use futures::stream;
    use std::{collections::VecDeque, time::Duration};
    use tokio::{net::TcpListener, time::Instant};
    use url::Url;

    enum Outcome {
        Fail,
        /// Frames, then the stream ends.
        Frames(Vec<&'static str>),
        /// Frames, then the stream stays open.
        Live(Vec<&'static str>),
        Hold,
    }

    #[derive(Default)]
    struct ScriptedConnector {
        script: Mutex<VecDeque<Outcome>>,
        attempts: Mutex<Vec<Instant>>,
    }

    impl ScriptedConnector {
        fn new(script: impl IntoIterator<Item = Outcome>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into_iter().collect()),
                attempts: Mutex::new(Vec::new()),
            })
        }

        fn attempts(&self) -> usize {
            self.attempts.lock().len()
        }

        fn gaps_ms(&self) -> Vec<u128> {
            self.attempts
                .lock()
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).as_millis())
                .collect()
        }
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _: &StreamSpec) -> Result<FrameStream, DataError> {
            self.attempts.lock().push(Instant::now());

            match self.script.lock().pop_front().unwrap_or(Outcome::Hold) {
                Outcome::Fail => Err(DataError::Socket("connection refused".to_string())),
                Outcome::Frames(frames) => Ok(stream::iter(
                    frames.into_iter().map(|frame| Ok(frame.to_string())),
                )
                .boxed()),
                Outcome::Live(frames) => Ok(stream::iter(
                    frames.into_iter().map(|frame| Ok(frame.to_string())),
                )
                .chain(stream::pending())
                .boxed()),
                Outcome::Hold => Ok(stream::pending().boxed()),
            }
        }
    }

    /// Routes each connection to its own script.
    struct RoutedConnector(FnvHashMap<ConnectionId, Arc<ScriptedConnector>>);

    #[async_trait]
    impl Connector for RoutedConnector {
        async fn connect(&self, spec: &StreamSpec) -> Result<FrameStream, DataError> {
            match self.0.get(&spec.id) {
                Some(connector) => connector.connect(spec).await,
                None => Err(DataError::UnknownConnection(spec.id)),
            }
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<String>>);

    impl PayloadSink for Collect {
        fn on_payload(&self, _: &ConnectionId, payload: &str) {
            self.0.lock().push(payload.to_string());
        }
    }

    fn id() -> ConnectionId {
        ConnectionId::new(VenueId::Bybit, Channel::Liquidation)
    }

    fn spec() -> StreamSpec {
        StreamSpec {
            id: id(),
            url: Url::parse("wss://stream.bybit.com/v5/public/linear").unwrap(),
            subscriptions: vec![],
            ping: None,
        }
    }

    fn supervisor(
        connector: &Arc<ScriptedConnector>,
        base_ms: u64,
        max_ms: u64,
    ) -> (
        Supervisor<Arc<ScriptedConnector>, Arc<Collect>>,
        Arc<Collect>,
    ) {
        let sink = Arc::new(Collect::default());
        let supervisor = Supervisor::new(
            Arc::clone(connector),
            Arc::clone(&sink),
            ReconnectPolicy::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
            ),
        );
        supervisor.register(spec()).unwrap();
        (supervisor, sink)
    }

    fn generation<C: Connector, S: PayloadSink>(supervisor: &Supervisor<C, S>) -> u64 {
        supervisor.inner.registry.lock().connections[&id()].generation
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_delays_back_off_then_reset_on_open() {
        let connector = ScriptedConnector::new([
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Fail,
            Outcome::Hold,
        ]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(connector.attempts(), 5);
        assert_eq!(connector.gaps_ms(), vec![100, 200, 400, 500]);

        let state = supervisor.status(&id()).unwrap();
        assert_eq!(state.status, ConnectionStatus::Open);
        assert_eq!(state.reconnect_attempt, 0);
        assert!(state.last_opened_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_close_schedules_one_reconnect() {
        let connector = ScriptedConnector::new([Outcome::Hold, Outcome::Hold]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Open
        );

        let current = generation(&supervisor);
        supervisor.inner.on_close(id(), current);
        supervisor.inner.on_close(id(), current);

        let state = supervisor.status(&id()).unwrap();
        assert_eq!(state.status, ConnectionStatus::Reconnecting);
        assert_eq!(state.reconnect_attempt, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_close_is_ignored() {
        let connector = ScriptedConnector::new([Outcome::Hold]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        supervisor.inner.on_close(id(), generation(&supervisor) - 1);

        let state = supervisor.status(&id()).unwrap();
        assert_eq!(state.status, ConnectionStatus::Open);
        assert_eq!(state.reconnect_attempt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_reconnect_after_shutdown() {
        let connector = ScriptedConnector::new([Outcome::Fail]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Reconnecting
        );

        supervisor.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Down
        );
        assert_eq!(supervisor.open(id()), Err(DataError::Shutdown));
        assert_eq!(supervisor.register(spec()), Err(DataError::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_aborts_live_session() {
        let connector = ScriptedConnector::new([Outcome::Hold]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        supervisor.shutdown().await;
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(connector.attempts(), 1);
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Down
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_delivered_in_order_then_reconnect() {
        let connector = ScriptedConnector::new([Outcome::Frames(vec!["1", "2", "3"]), Outcome::Hold]);
        let (supervisor, sink) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*sink.0.lock(), vec!["1", "2", "3"]);
        assert_eq!(connector.attempts(), 2);
        assert_eq!(connector.gaps_ms(), vec![100]);
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Open
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_is_noop_while_open() {
        let connector = ScriptedConnector::new([Outcome::Hold]);
        let (supervisor, _) = supervisor(&connector, 100, 500);

        supervisor.open(id()).unwrap();
        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_cancels_pending_reconnect() {
        let connector = ScriptedConnector::new([Outcome::Fail, Outcome::Hold]);
        let (supervisor, _) = supervisor(&connector, 10_000, 30_000);

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Reconnecting
        );

        supervisor.open(id()).unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(connector.attempts(), 2);
        assert_eq!(
            supervisor.status(&id()).unwrap().status,
            ConnectionStatus::Open
        );

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(connector.attempts(), 2);
    }

    #[tokio::test]
    async fn test_open_unknown_connection() {
        let connector = ScriptedConnector::new(Vec::<Outcome>::new());
        let (supervisor, _) = supervisor(&connector, 100, 500);

        let unknown = ConnectionId::new(VenueId::Okx, Channel::Liquidation);
        assert_eq!(
            supervisor.open(unknown),
            Err(DataError::UnknownConnection(unknown))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_connection_does_not_disturb_another() {
        let healthy_id = ConnectionId::new(VenueId::Binance, Channel::Trade);
        let failing = ScriptedConnector::new((0..100).map(|_| Outcome::Fail));
        let healthy = ScriptedConnector::new([Outcome::Live(vec!["t1", "t2"])]);

        let connector = RoutedConnector(
            [(id(), Arc::clone(&failing)), (healthy_id, Arc::clone(&healthy))]
                .into_iter()
                .collect(),
        );
        let sink = Arc::new(Collect::default());
        let supervisor = Supervisor::new(
            connector,
            Arc::clone(&sink),
            ReconnectPolicy::new(Duration::from_millis(100), Duration::from_millis(500)),
        );
        supervisor.register(spec()).unwrap();
        supervisor
            .register(StreamSpec {
                id: healthy_id,
                ..spec()
            })
            .unwrap();

        supervisor.open_all().unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        // 0, 100, 300, 700, 1200, 1700, 2200, 2700
        assert_eq!(failing.attempts(), 8);
        let failing_state = supervisor.status(&id()).unwrap();
        assert_eq!(failing_state.status, ConnectionStatus::Reconnecting);
        assert_eq!(failing_state.reconnect_attempt, 8);

        assert_eq!(healthy.attempts(), 1);
        let healthy_state = supervisor.status(&healthy_id).unwrap();
        assert_eq!(healthy_state.status, ConnectionStatus::Open);
        assert_eq!(healthy_state.reconnect_attempt, 0);
        assert_eq!(*sink.0.lock(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_stalled_handshake_is_retried_with_backoff() {
        // Accepts TCP and never answers the WebSocket upgrade
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("ws://{}", listener.local_addr().unwrap())).unwrap();
        let venue = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let supervisor = Supervisor::new(
            WsConnector::new(Duration::from_millis(100)),
            Arc::new(Collect::default()),
            ReconnectPolicy::new(Duration::from_millis(50), Duration::from_millis(50)),
        );
        supervisor.register(StreamSpec { url, ..spec() }).unwrap();
        supervisor.open(id()).unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;

        let state = supervisor.status(&id()).unwrap();
        assert!(state.reconnect_attempt >= 2, "attempt {}", state.reconnect_attempt);
        assert_ne!(state.status, ConnectionStatus::Open);
        assert!(state.last_opened_at.is_none());

        supervisor.shutdown().await;
        venue.abort();
    }
}
