//! Local media ownership
//!
//! [`LocalMedia`] owns the capture tracks for one call attempt. It is held
//! exclusively by the active call and every teardown path stops it before a
//! new capture may happen, so the capture hardware is never left locked.

use crate::config::MediaConstraints;
use crate::{Error, Result};
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Track kind, audio or video
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

/// One local capture track
pub trait MediaTrack: Send + Sync {
    /// Track kind
    fn kind(&self) -> TrackKind;

    /// Flip whether samples flow; disabled tracks stay attached
    fn set_enabled(&self, enabled: bool);

    /// Current enabled flag
    fn enabled(&self) -> bool;

    /// Release the underlying capture resource. Idempotent.
    fn stop(&self);

    /// Backend access for peer implementations
    fn as_any(&self) -> &dyn Any;
}

/// The local tracks held by one call attempt
pub struct LocalMedia {
    tracks: Vec<Arc<dyn MediaTrack>>,
}

impl LocalMedia {
    /// Bundle captured tracks into one owned handle
    pub fn new(tracks: Vec<Arc<dyn MediaTrack>>) -> Self {
        Self { tracks }
    }

    /// All tracks, in capture order
    pub fn tracks(&self) -> &[Arc<dyn MediaTrack>] {
        &self.tracks
    }

    /// Number of held tracks
    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    /// Flip every audio track. Returns the new enabled state, or `None`
    /// when no audio track is held.
    pub fn toggle_audio(&self) -> Option<bool> {
        self.toggle(TrackKind::Audio)
    }

    /// Flip every video track. Returns the new enabled state, or `None`
    /// when no video track is held.
    pub fn toggle_video(&self) -> Option<bool> {
        self.toggle(TrackKind::Video)
    }

    fn toggle(&self, kind: TrackKind) -> Option<bool> {
        let mut state = None;
        for track in self.tracks.iter().filter(|t| t.kind() == kind) {
            let next = !track.enabled();
            track.set_enabled(next);
            state = Some(next);
        }
        state
    }

    /// Stop every track, releasing the capture hardware
    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }
}

/// Capture seam: acquires the local tracks for a call
#[async_trait]
pub trait MediaSource: Send + Sync {
    /// Acquire local tracks matching `constraints`.
    ///
    /// Fails with [`Error::MediaAcquisition`] when permission is refused or
    /// no capture device is available.
    async fn capture(&self, constraints: &MediaConstraints) -> Result<LocalMedia>;
}

/// A capture track backed by a webrtc sample track
///
/// The embedding application feeds encoded samples through
/// [`write_sample`](RtcMediaTrack::write_sample); samples written while the
/// track is disabled or stopped are dropped, which is how mute/camera-off
/// work without renegotiation.
pub struct RtcMediaTrack {
    kind: TrackKind,
    track: Arc<TrackLocalStaticSample>,
    enabled: AtomicBool,
    stopped: AtomicBool,
}

impl RtcMediaTrack {
    /// Wrap a sample track as a capture track
    pub fn new(kind: TrackKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            track,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
        }
    }

    /// The underlying sample track, for attachment to a peer connection
    pub fn sample_track(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.track)
    }

    /// Write one encoded sample; silently dropped while disabled or stopped
    pub async fn write_sample(&self, sample: &Sample) -> Result<()> {
        if !self.enabled.load(Ordering::SeqCst) || self.stopped.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaAcquisition(format!("Failed to write sample: {}", e)))
    }
}

impl MediaTrack for RtcMediaTrack {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            debug!("stopped local {:?} track", self.kind);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Builds webrtc sample tracks (Opus audio, VP8 video) for the RTC peer
/// backend
pub struct RtcMediaSource;

#[async_trait]
impl MediaSource for RtcMediaSource {
    async fn capture(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        let stream_id = format!("telecare-{}", uuid::Uuid::new_v4());
        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();

        if constraints.audio {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "audio/opus".to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                "audio".to_string(),
                stream_id.clone(),
            ));
            tracks.push(Arc::new(RtcMediaTrack::new(TrackKind::Audio, track)));
        }

        if constraints.video {
            let track = Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: "video/VP8".to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                "video".to_string(),
                stream_id,
            ));
            tracks.push(Arc::new(RtcMediaTrack::new(TrackKind::Video, track)));
        }

        if tracks.is_empty() {
            return Err(Error::MediaAcquisition(
                "no capture tracks requested".to_string(),
            ));
        }

        debug!("captured {} local tracks", tracks.len());
        Ok(LocalMedia::new(tracks))
    }
}
