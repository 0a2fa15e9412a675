//! Wire types exchanged over the signaling channel

use crate::peer::IceCandidate;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One signaling payload for a consultation call
///
/// Field spelling on the wire matches the browser clients these messages
/// interoperate with: lowercase `type` tags, `sdpMid`, `sdpMLineIndex`.
///
/// Exactly one `offer` is produced per call attempt, by the initiator,
/// after the channel confirms subscription; exactly one `answer`, by the
/// responder, upon the offer. `ice` flows freely from either side; `leave`
/// is sent at most once per side and ends the call for both.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Signal {
    /// Session description offered by the initiator
    Offer {
        /// Offer SDP
        sdp: String,
    },

    /// Session description answered by the responder
    Answer {
        /// Answer SDP
        sdp: String,
    },

    /// A locally gathered network candidate
    Ice {
        /// Candidate line
        candidate: String,
        /// Media stream identification tag
        #[serde(rename = "sdpMid")]
        sdp_mid: Option<String>,
        /// Media description index
        #[serde(rename = "sdpMLineIndex")]
        sdp_m_line_index: Option<u16>,
    },

    /// Explicit hangup notice
    Leave,
}

impl Signal {
    /// Wire tag of this signal, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Signal::Offer { .. } => "offer",
            Signal::Answer { .. } => "answer",
            Signal::Ice { .. } => "ice",
            Signal::Leave => "leave",
        }
    }
}

impl From<IceCandidate> for Signal {
    fn from(candidate: IceCandidate) -> Self {
        Signal::Ice {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_m_line_index: candidate.sdp_m_line_index,
        }
    }
}

/// Frames exchanged between a client and the signal relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelFrame {
    /// Client asks to join a topic
    Subscribe {
        /// Topic to join
        topic: String,
    },

    /// Relay confirms the subscription is live
    Subscribed {
        /// Confirmed topic
        topic: String,
    },

    /// Client publishes a signal to everyone on the topic
    Publish {
        /// Target topic
        topic: String,
        /// Payload
        signal: Signal,
    },

    /// Relay delivers a published signal (sender included)
    Deliver {
        /// Source topic
        topic: String,
        /// Payload
        signal: Signal,
    },
}

impl ChannelFrame {
    /// Convert frame to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize frame: {}", e)))
    }

    /// Parse frame from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Serialization(format!("Failed to deserialize frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_wire_format() {
        let signal = Signal::Offer {
            sdp: "v=0".to_string(),
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert_eq!(json, r#"{"type":"offer","sdp":"v=0"}"#);
    }

    #[test]
    fn test_ice_wire_format_uses_browser_field_names() {
        let signal = Signal::Ice {
            candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54400 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        let json = serde_json::to_string(&signal).unwrap();
        assert!(json.contains(r#""type":"ice""#));
        assert!(json.contains(r#""sdpMid":"0""#));
        assert!(json.contains(r#""sdpMLineIndex":0"#));
    }

    #[test]
    fn test_leave_wire_format() {
        let json = serde_json::to_string(&Signal::Leave).unwrap();
        assert_eq!(json, r#"{"type":"leave"}"#);
    }

    #[test]
    fn test_signal_round_trip() {
        let signal = Signal::Ice {
            candidate: "candidate:...".to_string(),
            sdp_mid: None,
            sdp_m_line_index: None,
        };
        let parsed: Signal = serde_json::from_str(&serde_json::to_string(&signal).unwrap()).unwrap();
        assert_eq!(signal, parsed);
    }

    #[test]
    fn test_signal_from_candidate() {
        let candidate = IceCandidate {
            candidate: "candidate:...".to_string(),
            sdp_mid: Some("audio".to_string()),
            sdp_m_line_index: Some(1),
        };
        let signal = Signal::from(candidate.clone());
        match signal {
            Signal::Ice {
                candidate: line,
                sdp_mid,
                sdp_m_line_index,
            } => {
                assert_eq!(line, candidate.candidate);
                assert_eq!(sdp_mid, candidate.sdp_mid);
                assert_eq!(sdp_m_line_index, candidate.sdp_m_line_index);
            }
            other => panic!("expected ice signal, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_round_trip() {
        let frame = ChannelFrame::Publish {
            topic: "consultation:a1".to_string(),
            signal: Signal::Leave,
        };
        let parsed = ChannelFrame::from_json(&frame.to_json().unwrap()).unwrap();
        assert_eq!(frame, parsed);
    }

    #[test]
    fn test_malformed_frame_is_rejected() {
        assert!(ChannelFrame::from_json("{\"kind\":\"nope\"}").is_err());
    }
}
