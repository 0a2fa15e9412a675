//! Peer session abstraction
//!
//! Wraps the platform negotiation primitive behind a seam the controller
//! (and tests) can drive: description exchange, candidate plumbing, and
//! connection-state events. One session lives exactly as long as one call
//! attempt.

pub mod rtc;

use crate::config::CallConfig;
use crate::media::LocalMedia;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use rtc::{RtcPeerFactory, RtcPeerSession};

/// A discovered network path proposed for the peer connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate line
    pub candidate: String,

    /// Media stream identification tag, when present
    pub sdp_mid: Option<String>,

    /// Media description index, when present
    pub sdp_m_line_index: Option<u16>,
}

/// Raw connection state reported by the negotiation primitive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Initial state, negotiation not yet started
    New,
    /// Transports are being established
    Connecting,
    /// Fully connected; media flows both ways
    Connected,
    /// A transport dropped; may recover on its own
    Disconnected,
    /// Unrecoverable transport failure
    Failed,
    /// Closed and released
    Closed,
}

/// Events surfaced by a peer session, in discovery order
#[derive(Debug, Clone)]
pub enum PeerEvent {
    /// A locally gathered candidate ready for the signaling channel
    LocalCandidate(IceCandidate),

    /// Aggregate connection-state transition
    StateChange(PeerState),
}

/// Receiver for one peer session's events
pub type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Creates one negotiation primitive per call attempt
#[async_trait]
pub trait PeerFactory: Send + Sync {
    /// Create a fresh session and the receiver for its events
    async fn create(
        &self,
        config: &CallConfig,
    ) -> Result<(Arc<dyn PeerSession>, PeerEventReceiver)>;
}

/// One media negotiation primitive
///
/// Implementations only translate calls onto the platform object; the
/// caller guards remote-description idempotence and candidate queuing.
#[async_trait]
pub trait PeerSession: Send + Sync {
    /// Generate an offer and set it as the local description
    async fn create_offer(&self) -> Result<String>;

    /// Apply a remote offer as the remote description
    async fn apply_remote_offer(&self, sdp: &str) -> Result<()>;

    /// Generate an answer to the applied offer and set it as the local
    /// description
    async fn create_answer(&self) -> Result<String>;

    /// Apply a remote answer as the remote description
    async fn apply_remote_answer(&self, sdp: &str) -> Result<()>;

    /// Feed a remote candidate into the primitive
    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Attach already-captured local tracks
    async fn attach_media(&self, media: &LocalMedia) -> Result<()>;

    /// Close and release transport resources. Idempotent.
    async fn close(&self) -> Result<()>;
}
