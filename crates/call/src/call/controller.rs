//! Call negotiation controller
//!
//! Drives exactly one call attempt per join: the eligibility gate, the
//! channel subscription, the offer/answer/candidate exchange, and teardown.
//! Transport, media negotiation, and appointment lookup are injected seams,
//! so the controller is plain control flow over message passing.

use crate::appointments::{AppointmentStore, ApprovalStatus};
use crate::call::{CallPhase, CallRole, LinkHealth};
use crate::config::CallConfig;
use crate::media::{LocalMedia, MediaSource};
use crate::peer::{IceCandidate, PeerEvent, PeerEventReceiver, PeerFactory, PeerSession, PeerState};
use crate::signaling::{
    consultation_topic, Signal, SignalReceiver, SignalingChannel, SignalingTransport,
};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, info, warn};

/// State owned by one call attempt
struct ActiveCall {
    /// Attempt counter value; guards stale pump tasks after a rejoin
    attempt: u64,

    appointment_id: String,
    role: CallRole,

    channel: Arc<dyn SignalingChannel>,
    peer: Arc<dyn PeerSession>,

    /// Local capture, exclusively owned; released on every teardown path
    media: Option<LocalMedia>,

    /// Set when offer/answer handling claims the negotiation round, before
    /// any await, so a duplicate description cannot start a second round
    round_claimed: bool,

    /// Set once the remote description is applied; gates candidate
    /// forwarding versus queueing
    remote_description_set: bool,

    /// Remote candidates received before the remote description, in
    /// receipt order
    queued_candidates: Vec<IceCandidate>,

    /// Signals this attempt's pump tasks to stop
    shutdown: broadcast::Sender<()>,
}

/// Drives one appointment-bound call attempt at a time
///
/// Progress is observed through [`phase`](CallController::phase) and
/// [`health`](CallController::health) rather than return values; `join`
/// returns as soon as the channel subscription is confirmed. No timeout is
/// imposed while waiting for the other party — the call waits until a
/// `leave` arrives or the embedding application tears down.
pub struct CallController {
    config: CallConfig,
    appointments: Arc<dyn AppointmentStore>,
    signaling: Arc<dyn SignalingTransport>,
    media_source: Arc<dyn MediaSource>,
    peers: Arc<dyn PeerFactory>,

    active: Mutex<Option<ActiveCall>>,
    attempts: AtomicU64,

    phase_tx: watch::Sender<CallPhase>,
    health_tx: watch::Sender<LinkHealth>,
    fault_tx: watch::Sender<Option<String>>,
}

impl CallController {
    /// Create a controller over the injected collaborators
    pub fn new(
        config: CallConfig,
        appointments: Arc<dyn AppointmentStore>,
        signaling: Arc<dyn SignalingTransport>,
        media_source: Arc<dyn MediaSource>,
        peers: Arc<dyn PeerFactory>,
    ) -> Result<Arc<Self>> {
        config.validate()?;

        let (phase_tx, _) = watch::channel(CallPhase::Idle);
        let (health_tx, _) = watch::channel(LinkHealth::Connecting);
        let (fault_tx, _) = watch::channel(None);

        Ok(Arc::new(Self {
            config,
            appointments,
            signaling,
            media_source,
            peers,
            active: Mutex::new(None),
            attempts: AtomicU64::new(0),
            phase_tx,
            health_tx,
            fault_tx,
        }))
    }

    /// Observe negotiation progress
    pub fn phase(&self) -> watch::Receiver<CallPhase> {
        self.phase_tx.subscribe()
    }

    /// Current negotiation phase
    pub fn current_phase(&self) -> CallPhase {
        *self.phase_tx.borrow()
    }

    /// Observe the simplified link status
    pub fn health(&self) -> watch::Receiver<LinkHealth> {
        self.health_tx.subscribe()
    }

    /// Observe recoverable faults (cleared on each join)
    pub fn faults(&self) -> watch::Receiver<Option<String>> {
        self.fault_tx.subscribe()
    }

    /// Most recent recoverable fault, if any
    pub fn last_fault(&self) -> Option<String> {
        self.fault_tx.borrow().clone()
    }

    /// Whether a call attempt is currently active
    pub async fn is_in_call(&self) -> bool {
        self.active.lock().await.is_some()
    }

    /// Whether local capture is currently held
    pub async fn holds_media(&self) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|call| call.media.is_some())
    }

    /// Join the consultation for `appointment_id` as `role`.
    ///
    /// The eligibility gate runs before any side effect: an unknown id, an
    /// unapproved appointment, or one whose scheduled time has not been
    /// reached is rejected with no channel opened and no media touched.
    ///
    /// On success the channel subscription is live (its receiver was
    /// registered before confirmation, so the first message cannot be
    /// lost) and the role's negotiation steps continue in the background:
    /// the initiator captures media and publishes the offer; the responder
    /// takes no action — and in particular prompts for no camera or
    /// microphone — until an offer actually arrives.
    pub async fn join(self: &Arc<Self>, appointment_id: &str, role: CallRole) -> Result<()> {
        let appointment = self
            .appointments
            .find(appointment_id)
            .await?
            .ok_or_else(|| Error::AppointmentNotFound(appointment_id.to_string()))?;

        if !appointment.is_joinable_at(Utc::now()) {
            return Err(Error::NotEligible(
                if appointment.approval != ApprovalStatus::Approved {
                    format!("appointment {} is not approved", appointment_id)
                } else {
                    format!(
                        "appointment {} starts at {}",
                        appointment_id, appointment.scheduled_at
                    )
                },
            ));
        }

        let mut active = self.active.lock().await;
        if active.is_some() {
            return Err(Error::CallInProgress(appointment_id.to_string()));
        }

        info!("joining consultation {} as {:?}", appointment_id, role);

        let topic = consultation_topic(appointment_id);
        let (channel, signal_rx) = self.signaling.subscribe(&topic).await?;

        let (peer, peer_events) = match self.peers.create(&self.config).await {
            Ok(pair) => pair,
            Err(e) => {
                let _ = channel.unsubscribe().await;
                return Err(e);
            }
        };

        let attempt = self.attempts.fetch_add(1, Ordering::Relaxed) + 1;
        let (shutdown_tx, _) = broadcast::channel(1);
        *active = Some(ActiveCall {
            attempt,
            appointment_id: appointment_id.to_string(),
            role,
            channel,
            peer,
            media: None,
            round_claimed: false,
            remote_description_set: false,
            queued_candidates: Vec::new(),
            shutdown: shutdown_tx.clone(),
        });
        drop(active);

        let _ = self.fault_tx.send(None);
        let _ = self.health_tx.send(LinkHealth::Connecting);
        self.set_phase(CallPhase::Idle);

        let controller = Arc::clone(self);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            controller.pump_signals(attempt, signal_rx, shutdown_rx).await;
        });

        let controller = Arc::clone(self);
        let shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            controller
                .pump_peer_events(attempt, peer_events, shutdown_rx)
                .await;
        });

        if role == CallRole::Initiator {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(e) = controller.start_as_initiator(attempt).await {
                    controller.fail_attempt(attempt, e).await;
                }
            });
        }

        Ok(())
    }

    /// Flip the microphone without renegotiation. Returns the new enabled
    /// state, or `None` when no local media is held (a no-op, not an
    /// error).
    pub async fn toggle_audio(&self) -> Option<bool> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .and_then(|call| call.media.as_ref())
            .and_then(|media| media.toggle_audio())
    }

    /// Flip the camera without renegotiation. Returns the new enabled
    /// state, or `None` when no local media is held.
    pub async fn toggle_camera(&self) -> Option<bool> {
        let active = self.active.lock().await;
        active
            .as_ref()
            .and_then(|call| call.media.as_ref())
            .and_then(|media| media.toggle_video())
    }

    /// End the call: stop local tracks, close the peer, best-effort
    /// `leave` notice, unsubscribe, reset.
    ///
    /// This is the only teardown path and it runs once no matter how many
    /// triggers race — user action, a received `leave`, a failed join, or
    /// a fatal peer state. Duplicate calls are safe no-ops and never put a
    /// second `leave` on the wire.
    pub async fn leave(&self) {
        self.teardown_call(None, CallPhase::Ended).await;
    }

    // ========================================================================
    // Initiator flow
    // ========================================================================

    async fn start_as_initiator(&self, attempt: u64) -> Result<()> {
        self.set_phase_for(attempt, CallPhase::AwaitingMedia).await;

        let media = self.media_source.capture(&self.config.media).await?;

        let Some((peer, channel)) = self.attempt_handles(attempt).await else {
            // Torn down while the permission prompt was open; release the
            // capture instead of leaking it.
            media.stop_all();
            return Ok(());
        };

        peer.attach_media(&media).await?;
        if !self.store_media(attempt, media).await {
            return Ok(());
        }

        let offer_sdp = peer.create_offer().await?;
        channel.publish(&Signal::Offer { sdp: offer_sdp }).await?;
        self.set_phase_for(attempt, CallPhase::OfferSent).await;

        debug!("offer published for attempt {}", attempt);
        Ok(())
    }

    // ========================================================================
    // Signal handling
    // ========================================================================

    async fn pump_signals(
        self: Arc<Self>,
        attempt: u64,
        mut signals: SignalReceiver,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                next = signals.recv() => {
                    let Some(signal) = next else { break };
                    debug!("signal received: {}", signal.kind());
                    match signal {
                        Signal::Offer { .. } | Signal::Answer { .. } => {
                            // Description handling can stall on the media
                            // permission prompt or SDP application; keep
                            // the pump free for `ice` and `leave`.
                            let controller = Arc::clone(&self);
                            tokio::spawn(async move {
                                controller.handle_description(attempt, signal).await;
                            });
                        }
                        Signal::Ice {
                            candidate,
                            sdp_mid,
                            sdp_m_line_index,
                        } => {
                            self.handle_remote_candidate(
                                attempt,
                                IceCandidate {
                                    candidate,
                                    sdp_mid,
                                    sdp_m_line_index,
                                },
                            )
                            .await;
                        }
                        Signal::Leave => {
                            self.teardown_call(Some(attempt), CallPhase::Ended).await;
                            break;
                        }
                    }
                }
            }
        }
        debug!("signal pump for attempt {} stopped", attempt);
    }

    async fn handle_description(self: Arc<Self>, attempt: u64, signal: Signal) {
        let result = match signal {
            Signal::Offer { sdp } => self.handle_offer(attempt, sdp).await,
            Signal::Answer { sdp } => self.handle_answer(attempt, sdp).await,
            _ => Ok(()),
        };
        if let Err(e) = result {
            self.fail_attempt(attempt, e).await;
        }
    }

    /// Incoming offer: only meaningful for a responder that has not
    /// claimed a negotiation round yet. Everything else — the initiator's
    /// own echoed offer, duplicates — is ignored.
    async fn handle_offer(&self, attempt: u64, sdp: String) -> Result<()> {
        let peer = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut().filter(|c| c.attempt == attempt) else {
                return Ok(());
            };
            if call.role != CallRole::Responder || call.round_claimed {
                debug!("ignoring offer (role {:?})", call.role);
                return Ok(());
            }
            call.round_claimed = true;
            Arc::clone(&call.peer)
        };

        self.set_phase_for(attempt, CallPhase::OfferReceived).await;
        peer.apply_remote_offer(&sdp).await?;
        self.mark_remote_description(attempt, &peer).await;

        // Media is captured only now that negotiation is actually
        // happening; nobody gets a permission prompt for a call that
        // never starts.
        self.set_phase_for(attempt, CallPhase::AwaitingMedia).await;
        let media = self.media_source.capture(&self.config.media).await?;
        peer.attach_media(&media).await?;
        if !self.store_media(attempt, media).await {
            return Ok(());
        }

        let answer_sdp = peer.create_answer().await?;
        let Some((_, channel)) = self.attempt_handles(attempt).await else {
            return Ok(());
        };
        channel.publish(&Signal::Answer { sdp: answer_sdp }).await?;
        self.set_phase_for(attempt, CallPhase::AnswerSent).await;

        debug!("answer published for attempt {}", attempt);
        Ok(())
    }

    /// Incoming answer: initiator only, applied exactly once. Duplicates —
    /// including the responder's own echoed answer — are silently
    /// discarded.
    async fn handle_answer(&self, attempt: u64, sdp: String) -> Result<()> {
        let peer = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut().filter(|c| c.attempt == attempt) else {
                return Ok(());
            };
            if call.role != CallRole::Initiator || call.round_claimed {
                debug!("discarding answer (role {:?})", call.role);
                return Ok(());
            }
            call.round_claimed = true;
            Arc::clone(&call.peer)
        };

        peer.apply_remote_answer(&sdp).await?;
        self.mark_remote_description(attempt, &peer).await;
        self.set_phase_for(attempt, CallPhase::AnswerReceived).await;
        Ok(())
    }

    /// Remote candidate: forwarded unconditionally, queued in receipt
    /// order while the remote description is not yet applied. Early
    /// candidates are never dropped.
    async fn handle_remote_candidate(&self, attempt: u64, candidate: IceCandidate) {
        let peer = {
            let mut active = self.active.lock().await;
            let Some(call) = active.as_mut().filter(|c| c.attempt == attempt) else {
                return;
            };
            if !call.remote_description_set {
                debug!("queueing early remote candidate");
                call.queued_candidates.push(candidate);
                return;
            }
            Arc::clone(&call.peer)
        };

        if let Err(e) = peer.add_remote_candidate(&candidate).await {
            // A bad candidate is not fatal; another pair may still connect.
            self.report_fault(format!("failed to add remote candidate: {}", e));
        }
    }

    /// Record that the remote description is applied and flush the queue.
    ///
    /// Flushing holds the call lock so candidates arriving concurrently
    /// keep their receipt order relative to the queued ones.
    async fn mark_remote_description(&self, attempt: u64, peer: &Arc<dyn PeerSession>) {
        let mut active = self.active.lock().await;
        let Some(call) = active.as_mut().filter(|c| c.attempt == attempt) else {
            return;
        };
        call.remote_description_set = true;

        let queued = std::mem::take(&mut call.queued_candidates);
        if !queued.is_empty() {
            debug!("flushing {} queued remote candidates", queued.len());
        }
        for candidate in &queued {
            if let Err(e) = peer.add_remote_candidate(candidate).await {
                warn!("failed to apply queued candidate: {}", e);
            }
        }
    }

    // ========================================================================
    // Peer events
    // ========================================================================

    async fn pump_peer_events(
        self: Arc<Self>,
        attempt: u64,
        mut events: PeerEventReceiver,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                next = events.recv() => {
                    let Some(event) = next else { break };
                    match event {
                        PeerEvent::LocalCandidate(candidate) => {
                            // Candidates gathered before this pump drained
                            // them sat buffered in the event channel, so
                            // discovery order is preserved on the wire.
                            let Some((_, channel)) = self.attempt_handles(attempt).await else {
                                continue;
                            };
                            if let Err(e) = channel.publish(&Signal::from(candidate)).await {
                                self.report_fault(format!("failed to send candidate: {}", e));
                            }
                        }
                        PeerEvent::StateChange(state) => {
                            self.handle_peer_state(attempt, state).await;
                        }
                    }
                }
            }
        }
        debug!("peer event pump for attempt {} stopped", attempt);
    }

    async fn handle_peer_state(&self, attempt: u64, state: PeerState) {
        if !self.attempt_alive(attempt).await {
            return;
        }
        let _ = self.health_tx.send(LinkHealth::from(state));

        match state {
            PeerState::Connected => {
                self.set_phase_for(attempt, CallPhase::Connected).await;
            }
            PeerState::Failed => {
                if self.teardown_call(Some(attempt), CallPhase::Failed).await {
                    self.report_fault("peer connection failed".to_string());
                }
            }
            _ => {}
        }
    }

    // ========================================================================
    // Teardown
    // ========================================================================

    /// Tear down the active call, in order: stop tracks, close the peer,
    /// best-effort `leave` notice, unsubscribe, reset. Returns whether
    /// this invocation did the work (only the first of racing triggers
    /// does).
    async fn teardown_call(&self, attempt: Option<u64>, terminal: CallPhase) -> bool {
        let call = {
            let mut active = self.active.lock().await;
            let matches_attempt = match (active.as_ref(), attempt) {
                (Some(call), Some(wanted)) => call.attempt == wanted,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if !matches_attempt {
                return false;
            }
            active.take()
        };
        let Some(call) = call else { return false };

        info!(
            "tearing down call for appointment {} ({:?})",
            call.appointment_id, terminal
        );

        if let Some(media) = call.media.as_ref() {
            media.stop_all();
        }

        if let Err(e) = call.peer.close().await {
            warn!("error closing peer session: {}", e);
        }

        if let Err(e) = call.channel.publish(&Signal::Leave).await {
            debug!("could not send leave notice: {}", e);
        }

        if let Err(e) = call.channel.unsubscribe().await {
            warn!("error unsubscribing signaling channel: {}", e);
        }

        let _ = call.shutdown.send(());
        let _ = self.health_tx.send(LinkHealth::Lost);
        self.set_phase(terminal);
        true
    }

    /// Tear down a failed attempt and surface the fault; media denial
    /// resets to `Idle` so the very next `join` may retry.
    async fn fail_attempt(&self, attempt: u64, error: Error) {
        let terminal = if matches!(error, Error::MediaAcquisition(_)) {
            CallPhase::Idle
        } else {
            CallPhase::Failed
        };
        if self.teardown_call(Some(attempt), terminal).await {
            self.report_fault(error.to_string());
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    async fn attempt_alive(&self, attempt: u64) -> bool {
        self.active
            .lock()
            .await
            .as_ref()
            .is_some_and(|call| call.attempt == attempt)
    }

    async fn attempt_handles(
        &self,
        attempt: u64,
    ) -> Option<(Arc<dyn PeerSession>, Arc<dyn SignalingChannel>)> {
        self.active
            .lock()
            .await
            .as_ref()
            .filter(|call| call.attempt == attempt)
            .map(|call| (Arc::clone(&call.peer), Arc::clone(&call.channel)))
    }

    /// Store captured media on the attempt; stops it instead when the
    /// attempt is already gone. Returns whether the attempt still lives.
    async fn store_media(&self, attempt: u64, media: LocalMedia) -> bool {
        let mut active = self.active.lock().await;
        match active.as_mut().filter(|c| c.attempt == attempt) {
            Some(call) => {
                call.media = Some(media);
                true
            }
            None => {
                media.stop_all();
                false
            }
        }
    }

    fn set_phase(&self, phase: CallPhase) {
        let previous = *self.phase_tx.borrow();
        if previous != phase {
            debug!("call phase: {:?} -> {:?}", previous, phase);
            let _ = self.phase_tx.send(phase);
        }
    }

    /// Phase update tied to an attempt; skipped when the attempt was torn
    /// down so a stale task cannot clobber the terminal phase.
    async fn set_phase_for(&self, attempt: u64, phase: CallPhase) {
        let active = self.active.lock().await;
        if active.as_ref().is_some_and(|call| call.attempt == attempt) {
            self.set_phase(phase);
        }
    }

    fn report_fault(&self, message: String) {
        warn!("call fault: {}", message);
        let _ = self.fault_tx.send(Some(message));
    }
}
