//! Signaling channel abstraction
//!
//! A signaling channel is a broadcast topic keyed by appointment id: every
//! publish is delivered to all current subscribers, the sender included.
//! Per-sender delivery order is preserved; no order is assumed across
//! senders. The channel carries only [`Signal`] payloads, never media.
//!
//! Implementations: [`LocalSignalingHub`] (in-process) and
//! [`WebSocketSignaling`] (against the `signal-relay` binary).

pub mod local;
pub mod protocol;
pub mod relay;
pub mod websocket;

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use local::LocalSignalingHub;
pub use protocol::{ChannelFrame, Signal};
pub use relay::{RelayHandle, SignalRelay};
pub use websocket::WebSocketSignaling;

/// Incoming signals for one subscription, in delivery order
pub type SignalReceiver = mpsc::UnboundedReceiver<Signal>;

/// Topic name for an appointment's consultation channel
pub fn consultation_topic(appointment_id: &str) -> String {
    format!("consultation:{}", appointment_id)
}

/// Factory for channel subscriptions
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Open a subscription on `topic`.
    ///
    /// Resolves once the subscription is confirmed. Delivery into the
    /// returned receiver starts at registration time, so the handler exists
    /// before the first message can arrive.
    async fn subscribe(&self, topic: &str)
        -> Result<(Arc<dyn SignalingChannel>, SignalReceiver)>;
}

/// One live subscription
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Broadcast `signal` to every subscriber of the topic, self included
    async fn publish(&self, signal: &Signal) -> Result<()>;

    /// Tear the subscription down; the paired receiver closes
    async fn unsubscribe(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consultation_topic_format() {
        assert_eq!(consultation_topic("a1"), "consultation:a1");
    }
}
