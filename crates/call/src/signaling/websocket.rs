//! WebSocket signaling transport
//!
//! Client side of the relay framing: one socket per subscription, a
//! `subscribe`/`subscribed` handshake, then `publish`/`deliver` frames.

use super::{SignalReceiver, SignalingChannel, SignalingTransport};
use crate::signaling::protocol::{ChannelFrame, Signal};
use crate::{Error, Result};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Signaling transport speaking the relay framing over WebSocket
pub struct WebSocketSignaling {
    url: String,
}

impl WebSocketSignaling {
    /// Create a transport targeting `url` (ws:// or wss://)
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl SignalingTransport for WebSocketSignaling {
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(Arc<dyn SignalingChannel>, SignalReceiver)> {
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to connect to {}: {}", self.url, e)))?;
        let (mut sink, mut source) = stream.split();

        let request = ChannelFrame::Subscribe {
            topic: topic.to_string(),
        };
        sink.send(Message::Text(request.to_json()?))
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to send subscribe: {}", e)))?;

        wait_for_confirmation(&mut source, topic).await?;
        debug!("subscribed to {} via {}", topic, self.url);

        // Reader task registered before the channel is handed out; every
        // frame delivered from here on lands in the receiver.
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let read_topic = topic.to_string();
        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match ChannelFrame::from_json(&text) {
                    Ok(ChannelFrame::Deliver { topic, signal }) if topic == read_topic => {
                        if signal_tx.send(signal).is_err() {
                            break;
                        }
                    }
                    Ok(frame) => debug!("ignoring frame from relay: {:?}", frame),
                    Err(e) => warn!("malformed frame from relay: {}", e),
                }
            }
            debug!("relay reader for {} stopped", read_topic);
        });

        let channel = WebSocketChannel {
            topic: topic.to_string(),
            sink: Mutex::new(Some(sink)),
            reader: Mutex::new(Some(reader)),
        };
        Ok((Arc::new(channel), signal_rx))
    }
}

async fn wait_for_confirmation(source: &mut WsSource, topic: &str) -> Result<()> {
    loop {
        let message = source
            .next()
            .await
            .ok_or_else(|| Error::WebSocket("relay closed during subscribe".to_string()))?
            .map_err(|e| Error::WebSocket(format!("Relay read failed: {}", e)))?;
        let Message::Text(text) = message else {
            continue;
        };
        match ChannelFrame::from_json(&text)? {
            ChannelFrame::Subscribed { topic: confirmed } if confirmed == topic => return Ok(()),
            frame => debug!("ignoring pre-subscribe frame: {:?}", frame),
        }
    }
}

struct WebSocketChannel {
    topic: String,
    sink: Mutex<Option<WsSink>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl SignalingChannel for WebSocketChannel {
    async fn publish(&self, signal: &Signal) -> Result<()> {
        let frame = ChannelFrame::Publish {
            topic: self.topic.clone(),
            signal: signal.clone(),
        };
        let text = frame.to_json()?;

        let mut guard = self.sink.lock().await;
        let sink = guard
            .as_mut()
            .ok_or_else(|| Error::Signaling("channel is closed".to_string()))?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| Error::WebSocket(format!("Failed to publish: {}", e)))
    }

    async fn unsubscribe(&self) -> Result<()> {
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }
        if let Some(reader) = self.reader.lock().await.take() {
            reader.abort();
        }
        Ok(())
    }
}
