//! Appointment-gated WebRTC call negotiation for telehealth consultations
//!
//! Patients and doctors meet in a peer-to-peer video consultation bound to
//! a booked appointment. This crate owns the negotiation lifecycle — the
//! eligibility gate, the offer/answer/ICE exchange over a broadcast
//! signaling topic, and guaranteed teardown — and delegates transport,
//! media negotiation, and appointment lookup to injected seams so every
//! piece can be substituted in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │  CallController (one call attempt at a time)               │
//! │  ├─ AppointmentStore (read-only eligibility gate)          │
//! │  ├─ SignalingTransport (topic broadcast, self-echoing)     │
//! │  │   ├─ LocalSignalingHub (in-process)                     │
//! │  │   └─ WebSocketSignaling ──► signal-relay binary         │
//! │  ├─ MediaSource (local capture, exclusively owned)         │
//! │  └─ PeerFactory / PeerSession (negotiation primitive)      │
//! │      └─ RtcPeerSession (webrtc-rs)                         │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The booking party (the patient) initiates: once its channel
//! subscription is confirmed it captures media and publishes the offer.
//! The responder captures media only when the offer actually arrives, so
//! nobody is prompted for a camera that never gets used. Both sides queue
//! early remote candidates, apply the remote description exactly once,
//! and tear down through a single idempotent path.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use telecare_call::appointments::InMemoryAppointmentStore;
//! use telecare_call::media::RtcMediaSource;
//! use telecare_call::peer::RtcPeerFactory;
//! use telecare_call::signaling::WebSocketSignaling;
//! use telecare_call::{CallConfig, CallController, CallRole};
//!
//! # async fn example() -> telecare_call::Result<()> {
//! let config = CallConfig::default();
//! let controller = CallController::new(
//!     config.clone(),
//!     Arc::new(InMemoryAppointmentStore::new()),
//!     Arc::new(WebSocketSignaling::new(&config.signaling_url)),
//!     Arc::new(RtcMediaSource),
//!     Arc::new(RtcPeerFactory),
//! )?;
//!
//! controller.join("appointment-1", CallRole::Initiator).await?;
//! // ... observe controller.phase() / controller.health() ...
//! controller.leave().await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod appointments;
pub mod call;
pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod signaling;

// Re-exports for public API
pub use call::{CallController, CallPhase, CallRole, LinkHealth};
pub use config::{CallConfig, MediaConstraints, TurnServerConfig};
pub use error::{Error, Result};
pub use signaling::{LocalSignalingHub, Signal, WebSocketSignaling};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
