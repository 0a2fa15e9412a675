//! Call lifecycle types and the negotiation controller

pub mod controller;

pub use controller::CallController;

use crate::peer::PeerState;
use serde::{Deserialize, Serialize};

/// Which side of the consultation this participant plays
///
/// The booking party (the patient) always initiates. Derive the role with
/// [`Appointment::role_of`](crate::appointments::Appointment::role_of) and
/// pass it into `join` explicitly; the controller carries no auth context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallRole {
    /// Sends the offer once the channel subscription is confirmed
    Initiator,
    /// Waits for the offer; captures media only when it arrives
    Responder,
}

/// Negotiation progress of the active call attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    /// No negotiation underway
    Idle,
    /// Waiting on local capture (permission prompt may be open)
    AwaitingMedia,
    /// Offer published, waiting for the answer
    OfferSent,
    /// Offer received, negotiation starting
    OfferReceived,
    /// Answer published
    AnswerSent,
    /// Answer applied as remote description
    AnswerReceived,
    /// The peer connection reported full connection
    Connected,
    /// Torn down cleanly
    Ended,
    /// Torn down after an unrecoverable error
    Failed,
}

impl CallPhase {
    /// Whether the attempt is over, cleanly or not
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallPhase::Ended | CallPhase::Failed)
    }
}

/// Simplified link status projected from the peer connection state
///
/// `Connected` is reported only on the primitive's fully-connected signal,
/// never on ICE progress alone, so no caller can claim success before
/// media flows both ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// Transports still coming up
    Connecting,
    /// Media flowing both ways
    Connected,
    /// Dropped, failed, or closed
    Lost,
}

impl From<PeerState> for LinkHealth {
    fn from(state: PeerState) -> Self {
        match state {
            PeerState::Connected => LinkHealth::Connected,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed => LinkHealth::Lost,
            PeerState::New | PeerState::Connecting => LinkHealth::Connecting,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_health_projection() {
        assert_eq!(LinkHealth::from(PeerState::Connected), LinkHealth::Connected);
        assert_eq!(LinkHealth::from(PeerState::Connecting), LinkHealth::Connecting);
        assert_eq!(LinkHealth::from(PeerState::New), LinkHealth::Connecting);
        assert_eq!(LinkHealth::from(PeerState::Disconnected), LinkHealth::Lost);
        assert_eq!(LinkHealth::from(PeerState::Failed), LinkHealth::Lost);
    }

    #[test]
    fn test_terminal_phases() {
        assert!(CallPhase::Ended.is_terminal());
        assert!(CallPhase::Failed.is_terminal());
        assert!(!CallPhase::Idle.is_terminal());
        assert!(!CallPhase::Connected.is_terminal());
    }
}
