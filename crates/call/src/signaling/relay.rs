//! Broadcast signal relay
//!
//! Topic-keyed fan-out for consultation signaling: every published signal
//! is delivered to all current subscribers of the topic, the publisher
//! included. The relay carries no media and keeps no history; a client
//! that subscribes late sees only what is published after its
//! confirmation.

use crate::signaling::protocol::ChannelFrame;
use crate::{Error, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

type SubscriberMap = HashMap<u64, mpsc::UnboundedSender<ChannelFrame>>;
type TopicRegistry = Arc<RwLock<HashMap<String, SubscriberMap>>>;

/// Broadcast relay server
pub struct SignalRelay;

impl SignalRelay {
    /// Bind the relay and start accepting connections.
    ///
    /// Binding to port 0 picks a random free port; read it back from
    /// [`RelayHandle::local_addr`].
    pub async fn bind(addr: SocketAddr) -> Result<RelayHandle> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);
        let topics: TopicRegistry = Arc::new(RwLock::new(HashMap::new()));

        let task = tokio::spawn(accept_loop(listener, topics, shutdown_rx));

        info!("signal relay listening on ws://{}", local_addr);
        Ok(RelayHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for controlling a running relay
pub struct RelayHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl RelayHandle {
    /// Address the relay is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// WebSocket URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stop accepting connections and shut down
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.task.await;
        info!("signal relay stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    topics: TopicRegistry,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, peer_addr)) => {
                    debug!("accepted signaling connection from {}", peer_addr);
                    let topics = Arc::clone(&topics);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, topics).await {
                            warn!("signaling connection from {} ended with error: {}", peer_addr, e);
                        }
                    });
                }
                Err(e) => error!("Failed to accept signaling connection: {}", e),
            },
            _ = shutdown_rx.recv() => {
                info!("signal relay received shutdown signal");
                break;
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, topics: TopicRegistry) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| Error::WebSocket(format!("Handshake failed: {}", e)))?;
    let (mut sink, mut source) = ws.split();

    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ChannelFrame>();

    // Writer task serializes all outbound traffic for this connection so
    // fan-out from other connections never interleaves mid-frame.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let Ok(text) = frame.to_json() else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let mut joined: Vec<String> = Vec::new();
    while let Some(message) = source.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(_) => break,
        };

        match ChannelFrame::from_json(&text) {
            Ok(ChannelFrame::Subscribe { topic }) => {
                topics
                    .write()
                    .await
                    .entry(topic.clone())
                    .or_default()
                    .insert(conn_id, out_tx.clone());
                joined.push(topic.clone());
                debug!("connection {} subscribed to {}", conn_id, topic);
                let _ = out_tx.send(ChannelFrame::Subscribed { topic });
            }
            Ok(ChannelFrame::Publish { topic, signal }) => {
                let subscribers: Vec<_> = topics
                    .read()
                    .await
                    .get(&topic)
                    .map(|subs| subs.values().cloned().collect())
                    .unwrap_or_default();
                debug!(
                    "fan-out of {} on {} to {} subscribers",
                    signal.kind(),
                    topic,
                    subscribers.len()
                );
                for subscriber in subscribers {
                    let _ = subscriber.send(ChannelFrame::Deliver {
                        topic: topic.clone(),
                        signal: signal.clone(),
                    });
                }
            }
            Ok(frame) => debug!("ignoring client frame: {:?}", frame),
            Err(e) => warn!("malformed frame from connection {}: {}", conn_id, e),
        }
    }

    // Drop this connection's registrations; empty topics are pruned.
    let mut registry = topics.write().await;
    for topic in joined {
        if let Some(subscribers) = registry.get_mut(&topic) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                registry.remove(&topic);
            }
        }
    }
    drop(registry);

    drop(out_tx);
    let _ = writer.await;
    debug!("connection {} closed", conn_id);
    Ok(())
}
