//! In-process signaling hub
//!
//! Topic fan-out over `tokio::sync::broadcast`, with the same delivery
//! contract as the relay: all current subscribers receive every publish,
//! the sender included. Used by tests and single-process demos.

use super::{SignalReceiver, SignalingChannel, SignalingTransport};
use crate::signaling::protocol::Signal;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::debug;

const TOPIC_BUFFER: usize = 64;

/// In-process broadcast hub
#[derive(Default)]
pub struct LocalSignalingHub {
    topics: Mutex<HashMap<String, broadcast::Sender<Signal>>>,
}

impl LocalSignalingHub {
    /// Create an empty hub
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of live subscriptions on `topic`
    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .lock()
            .await
            .get(topic)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl SignalingTransport for LocalSignalingHub {
    async fn subscribe(
        &self,
        topic: &str,
    ) -> Result<(Arc<dyn SignalingChannel>, SignalReceiver)> {
        let publish_tx = {
            let mut topics = self.topics.lock().await;
            topics
                .entry(topic.to_string())
                .or_insert_with(|| broadcast::channel(TOPIC_BUFFER).0)
                .clone()
        };

        // Registered before this call returns, so nothing published after
        // subscribe resolves can be missed.
        let mut topic_rx = publish_tx.subscribe();
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (closed_tx, mut closed_rx) = watch::channel(false);

        let topic_name = topic.to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = closed_rx.changed() => break,
                    received = topic_rx.recv() => match received {
                        Ok(signal) => {
                            if signal_tx.send(signal).is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            debug!("subscriber on {} lagged, skipped {}", topic_name, skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        let channel = LocalChannel {
            publish_tx,
            closed_tx,
        };
        Ok((Arc::new(channel), signal_rx))
    }
}

struct LocalChannel {
    publish_tx: broadcast::Sender<Signal>,
    closed_tx: watch::Sender<bool>,
}

#[async_trait]
impl SignalingChannel for LocalChannel {
    async fn publish(&self, signal: &Signal) -> Result<()> {
        self.publish_tx
            .send(signal.clone())
            .map_err(|_| Error::Signaling("no subscribers left on topic".to_string()))?;
        Ok(())
    }

    async fn unsubscribe(&self) -> Result<()> {
        let _ = self.closed_tx.send(true);
        Ok(())
    }
}
