//! Test fakes for the call stack
//!
//! Deterministic substitutes for the capture and peer seams: counters for
//! acquire/release balancing, scripted peer sessions whose events the test
//! injects by hand, and small waiting helpers. The signaling seam needs no
//! fake — tests run over the real in-process hub.

#![allow(dead_code)]

use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use telecare_call::call::CallPhase;
use telecare_call::config::{CallConfig, MediaConstraints};
use telecare_call::media::{LocalMedia, MediaSource, MediaTrack, TrackKind};
use telecare_call::peer::{
    IceCandidate, PeerEvent, PeerEventReceiver, PeerFactory, PeerSession, PeerState,
};
use telecare_call::{CallController, Error, Result};
use tokio::sync::{mpsc, Mutex};

// ============================================================================
// Media fakes
// ============================================================================

/// Capture counters shared between a [`FakeMediaSource`] and its tracks
#[derive(Default)]
pub struct MediaCounters {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
}

impl MediaCounters {
    pub fn acquires(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Every acquired track has been released
    pub fn balanced(&self) -> bool {
        self.acquires() == self.releases()
    }
}

pub struct FakeTrack {
    kind: TrackKind,
    enabled: AtomicBool,
    stopped: AtomicBool,
    counters: Arc<MediaCounters>,
}

impl MediaTrack for FakeTrack {
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
            self.counters.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Fake capture device tracking acquire/release balance
#[derive(Default)]
pub struct FakeMediaSource {
    pub counters: Arc<MediaCounters>,
    /// When set, capture fails like a refused permission prompt
    pub deny: AtomicBool,
}

impl FakeMediaSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deny_next(&self, deny: bool) {
        self.deny.store(deny, Ordering::SeqCst);
    }

    fn track(&self, kind: TrackKind) -> Arc<dyn MediaTrack> {
        Arc::new(FakeTrack {
            kind,
            enabled: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            counters: Arc::clone(&self.counters),
        })
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn capture(&self, constraints: &MediaConstraints) -> Result<LocalMedia> {
        if self.deny.load(Ordering::SeqCst) {
            return Err(Error::MediaAcquisition("permission denied".to_string()));
        }

        let mut tracks: Vec<Arc<dyn MediaTrack>> = Vec::new();
        if constraints.audio {
            tracks.push(self.track(TrackKind::Audio));
        }
        if constraints.video {
            tracks.push(self.track(TrackKind::Video));
        }
        self.counters.acquires.fetch_add(tracks.len(), Ordering::SeqCst);
        Ok(LocalMedia::new(tracks))
    }
}

// ============================================================================
// Peer fakes
// ============================================================================

/// Everything a [`FakePeer`] recorded, for assertions
#[derive(Default)]
pub struct FakePeerState {
    pub offers_created: AtomicUsize,
    pub answers_created: AtomicUsize,
    pub remote_offers_applied: AtomicUsize,
    pub remote_answers_applied: AtomicUsize,
    pub tracks_attached: AtomicUsize,
    pub closes: AtomicUsize,
    pub remote_candidates: StdMutex<Vec<IceCandidate>>,
}

impl FakePeerState {
    pub fn remote_answers_applied(&self) -> usize {
        self.remote_answers_applied.load(Ordering::SeqCst)
    }

    pub fn remote_offers_applied(&self) -> usize {
        self.remote_offers_applied.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        self.remote_candidates.lock().unwrap().clone()
    }
}

pub struct FakePeer {
    state: Arc<FakePeerState>,
}

#[async_trait]
impl PeerSession for FakePeer {
    async fn create_offer(&self) -> Result<String> {
        self.state.offers_created.fetch_add(1, Ordering::SeqCst);
        Ok("offer-sdp".to_string())
    }

    async fn apply_remote_offer(&self, _sdp: &str) -> Result<()> {
        self.state.remote_offers_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_answer(&self) -> Result<String> {
        self.state.answers_created.fetch_add(1, Ordering::SeqCst);
        Ok("answer-sdp".to_string())
    }

    async fn apply_remote_answer(&self, _sdp: &str) -> Result<()> {
        self.state.remote_answers_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.state
            .remote_candidates
            .lock()
            .unwrap()
            .push(candidate.clone());
        Ok(())
    }

    async fn attach_media(&self, media: &LocalMedia) -> Result<()> {
        self.state
            .tracks_attached
            .fetch_add(media.track_count(), Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Handle the test uses to inspect one created peer and inject its events
#[derive(Clone)]
pub struct PeerHandle {
    pub state: Arc<FakePeerState>,
    pub events: mpsc::UnboundedSender<PeerEvent>,
}

impl PeerHandle {
    pub fn report_state(&self, state: PeerState) {
        let _ = self.events.send(PeerEvent::StateChange(state));
    }

    pub fn emit_candidate(&self, candidate: IceCandidate) {
        let _ = self.events.send(PeerEvent::LocalCandidate(candidate));
    }
}

/// Factory handing out scripted peers and recording their handles
#[derive(Default)]
pub struct FakePeerFactory {
    handles: Mutex<Vec<PeerHandle>>,
}

impl FakePeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn created(&self) -> usize {
        self.handles.lock().await.len()
    }

    /// Handle of the `index`-th created peer
    pub async fn handle(&self, index: usize) -> PeerHandle {
        self.handles.lock().await[index].clone()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        _config: &CallConfig,
    ) -> Result<(Arc<dyn PeerSession>, PeerEventReceiver)> {
        let state = Arc::new(FakePeerState::default());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        self.handles.lock().await.push(PeerHandle {
            state: Arc::clone(&state),
            events: event_tx,
        });
        Ok((Arc::new(FakePeer { state }), event_rx))
    }
}

// ============================================================================
// Waiting helpers
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(2);
const WAIT_STEP: Duration = Duration::from_millis(10);

/// Wait until the controller reaches `phase`, or panic after the timeout
pub async fn wait_for_phase(controller: &Arc<CallController>, phase: CallPhase) {
    let mut rx = controller.phase();
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if *rx.borrow() == phase {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "timed out waiting for phase {:?}, current {:?}",
            phase,
            controller.current_phase()
        )
    });
}

/// Poll `condition` until it holds, or panic after the timeout
pub async fn wait_until<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting until {}", what);
        }
        tokio::time::sleep(WAIT_STEP).await;
    }
}

/// Drain everything currently buffered on a signal receiver
pub fn drain_signals(rx: &mut telecare_call::signaling::SignalReceiver) -> Vec<telecare_call::Signal> {
    let mut signals = Vec::new();
    while let Ok(signal) = rx.try_recv() {
        signals.push(signal);
    }
    signals
}
