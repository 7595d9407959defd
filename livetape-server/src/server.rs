use crate::hub::{MarketHub, Subscription};
use futures::{SinkExt, StreamExt};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{broadcast::error::RecvError, watch},
};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Lifecycle of one subscriber connection.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SubscriberState {
    Connecting,
    Bootstrapped,
    Streaming,
    Disconnected,
}

struct Subscriber {
    peer_addr: SocketAddr,
    state: SubscriberState,
}

impl Subscriber {
    fn transition(&mut self, next: SubscriberState) {
        debug!(peer = %self.peer_addr, from = ?self.state, to = ?next, "subscriber state");
        self.state = next;
    }
}

/// Accept subscriber WebSocket connections on `listener` until `shutdown` flips.
pub async fn serve(listener: TcpListener, hub: Arc<MarketHub>, mut shutdown: watch::Receiver<bool>) {
    match listener.local_addr() {
        Ok(addr) => info!(%addr, "subscriber server listening"),
        Err(error) => warn!(%error, "subscriber server listening on unknown address"),
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    info!(peer = %peer_addr, "new subscriber connection");
                    tokio::spawn(handle_client(stream, peer_addr, Arc::clone(&hub), shutdown.clone()));
                }
                Err(error) => warn!(%error, "failed to accept subscriber connection"),
            },
            _ = shutdown.changed() => break,
        }
    }

    info!("subscriber server stopped accepting connections");
}

/// Bootstrap one subscriber, then stream incremental events until either side closes.
pub async fn handle_client(
    stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<MarketHub>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut subscriber = Subscriber {
        peer_addr,
        state: SubscriberState::Connecting,
    };

    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(error) => {
            error!(peer = %peer_addr, %error, "subscriber handshake failed");
            return;
        }
    };

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let Subscription {
        bootstrap,
        mut events,
    } = hub.subscribe();
    subscriber.transition(SubscriberState::Bootstrapped);

    let frames = bootstrap.len();
    for envelope in bootstrap {
        if let Err(error) = ws_sender.send(Message::Text(envelope.frame)).await {
            warn!(peer = %peer_addr, event = envelope.name, %error, "failed to deliver bootstrap");
            subscriber.transition(SubscriberState::Disconnected);
            return;
        }
    }

    info!(peer = %peer_addr, frames, subscribers = hub.subscriber_count(), "subscriber bootstrapped");
    subscriber.transition(SubscriberState::Streaming);

    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(envelope) => {
                    if let Err(error) = ws_sender.send(Message::Text(envelope.frame)).await {
                        debug!(peer = %peer_addr, event = envelope.name, %error, "failed to deliver event");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // Latest state wins, keep streaming
                    warn!(peer = %peer_addr, skipped, "subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            },
            message = ws_receiver.next() => match message {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Ping(_))) => debug!(peer = %peer_addr, "received ping"),
                Some(Ok(Message::Text(text))) => debug!(peer = %peer_addr, text = text.as_str(), "received text"),
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    warn!(peer = %peer_addr, %error, "subscriber socket error");
                    break;
                }
            },
            _ = shutdown.changed() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    drop(events);
    subscriber.transition(SubscriberState::Disconnected);
    info!(peer = %peer_addr, subscribers = hub.subscriber_count(), "subscriber disconnected");
}
