use super::timeout::{DEFAULT_READ_TIMEOUT, TimeoutStream};
use crate::{DataError, exchange::StreamSpec};
use async_trait::async_trait;
use futures::{
    SinkExt, StreamExt,
    stream::{BoxStream, SplitSink, SplitStream},
};
use std::{sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::Interval};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::Message,
};
use tracing::{debug, info};

/// Stream of raw text frames received on one venue connection. The stream ending, or
/// yielding an error, means the connection is closed.
pub type FrameStream = BoxStream<'static, Result<String, DataError>>;

/// Opens a venue connection described by a [`StreamSpec`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, spec: &StreamSpec) -> Result<FrameStream, DataError>;
}

#[async_trait]
impl<T> Connector for Arc<T>
where
    T: Connector + ?Sized,
{
    async fn connect(&self, spec: &StreamSpec) -> Result<FrameStream, DataError> {
        (**self).connect(spec).await
    }
}

type WebSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connector`] over a real WebSocket: sends the subscription frames, keeps the venue's
/// application ping alive, and ends the stream after `read_timeout` of silence. The
/// handshake and subscription are bounded by the same `read_timeout`.
#[derive(Copy, Clone, Debug)]
pub struct WsConnector {
    read_timeout: Duration,
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_READ_TIMEOUT)
    }
}

impl WsConnector {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, spec: &StreamSpec) -> Result<FrameStream, DataError> {
        debug!(id = %spec.id, url = %spec.url, "connecting");

        // A venue that accepts TCP but never completes the upgrade must still fail the attempt
        let (sink, stream) = tokio::time::timeout(self.read_timeout, handshake(spec))
            .await
            .map_err(|_| DataError::Timeout {
                venue: spec.id.venue,
                after_ms: u64::try_from(self.read_timeout.as_millis()).unwrap_or(u64::MAX),
            })??;

        let ping = spec.ping.as_ref().map(|ping| Ping {
            interval: {
                let mut interval = tokio::time::interval(ping.every);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                interval.reset();
                interval
            },
            payload: ping.payload.clone(),
        });

        let session = Session {
            sink,
            stream: TimeoutStream::new(stream, self.read_timeout),
            ping,
            id: spec.id.to_string(),
        };

        Ok(futures::stream::unfold(session, |mut session| async move {
            let frame = session.next_frame().await?;
            Some((frame, session))
        })
        .boxed())
    }
}

/// Complete the WebSocket upgrade and send the subscription frames.
async fn handshake(
    spec: &StreamSpec,
) -> Result<(SplitSink<WebSocket, Message>, SplitStream<WebSocket>), DataError> {
    let (websocket, _) = connect_async(spec.url.as_str()).await?;
    let (mut sink, stream) = websocket.split();

    for subscription in &spec.subscriptions {
        debug!(id = %spec.id, payload = %subscription, "sending subscription");
        sink.send(Message::text(subscription.clone())).await?;
    }

    Ok((sink, stream))
}

struct Ping {
    interval: Interval,
    payload: String,
}

struct Session {
    sink: SplitSink<WebSocket, Message>,
    stream: TimeoutStream<SplitStream<WebSocket>>,
    ping: Option<Ping>,
    id: String,
}

impl Session {
    /// Next text frame, answering keep-alive duties in between.
    async fn next_frame(&mut self) -> Option<Result<String, DataError>> {
        loop {
            let message = match &mut self.ping {
                Some(ping) => tokio::select! {
                    message = self.stream.next() => message,
                    _ = ping.interval.tick() => {
                        if let Err(error) = self.sink.send(Message::text(ping.payload.clone())).await {
                            return Some(Err(error.into()));
                        }
                        continue;
                    }
                },
                None => self.stream.next().await,
            };

            match message? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes.to_vec())
                            .map_err(|error| DataError::Socket(error.to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    info!(id = %self.id, ?frame, "closed by venue");
                    return None;
                }
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
                Err(error) => return Some(Err(error.into())),
            }
        }
    }
}
