//! Configuration types for call setup

use serde::{Deserialize, Serialize};

/// Main configuration for the call controller and its peer sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallConfig {
    /// STUN server URLs (at least one required)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Signal relay URL for the WebSocket transport (ws:// or wss://)
    pub signaling_url: String,

    /// Media requested when a call captures local tracks
    pub media: MediaConstraints,
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Which capture tracks a call requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    /// Request a microphone track
    pub audio: bool,

    /// Request a camera track
    pub video: bool,
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self {
            audio: true,
            video: true,
        }
    }
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![
                "stun:stun.l.google.com:19302".to_string(),
                "stun:stun1.l.google.com:19302".to_string(),
            ],
            turn_servers: Vec::new(),
            signaling_url: "ws://localhost:8787".to_string(),
            media: MediaConstraints::default(),
        }
    }
}

impl CallConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `stun_servers` is empty
    /// - `signaling_url` is not a valid WebSocket URL
    /// - `media` requests neither audio nor video
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if self.stun_servers.is_empty() {
            return Err(Error::InvalidConfig(
                "At least one STUN server is required".to_string(),
            ));
        }

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if !self.media.audio && !self.media.video {
            return Err(Error::InvalidConfig(
                "media must request audio, video, or both".to_string(),
            ));
        }

        Ok(())
    }

    /// Set the signal relay URL
    ///
    /// Useful for chaining on a default configuration.
    pub fn with_signaling_url(mut self, url: &str) -> Self {
        self.signaling_url = url.to_string();
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Restrict capture to audio only (voice consultation)
    pub fn audio_only(mut self) -> Self {
        self.media = MediaConstraints {
            audio: true,
            video: false,
        };
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CallConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_stun_servers_fails() {
        let mut config = CallConfig::default();
        config.stun_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_signaling_url_fails() {
        let mut config = CallConfig::default();
        config.signaling_url = "http://localhost:8787".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_no_media_fails() {
        let mut config = CallConfig::default();
        config.media = MediaConstraints {
            audio: false,
            video: false,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_audio_only_builder() {
        let config = CallConfig::default().audio_only();
        assert!(config.validate().is_ok());
        assert!(config.media.audio);
        assert!(!config.media.video);
    }

    #[test]
    fn test_config_serialization() {
        let config = CallConfig::default().with_turn_servers(vec![TurnServerConfig {
            url: "turn:turn.example.com:3478".to_string(),
            username: "user".to_string(),
            credential: "pass".to_string(),
        }]);
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: CallConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config.signaling_url, deserialized.signaling_url);
        assert_eq!(deserialized.turn_servers.len(), 1);
    }
}
