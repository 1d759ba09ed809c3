//! Offer/answer state machine for one peer session
//!
//! ```text
//! Created ──set_remote_offer──▶ HasRemoteOffer ──commit_local_answer──▶ HasLocalAnswer
//!                                                                          │
//!                                             connectivity notifications   ▼
//!                                       Connected ⇄ Disconnected ──▶ Failed (terminal)
//! ```
//!
//! `close()` moves any state to `Closed`, which is terminal as well.

use super::engine::{ConnectivityState, TransportEngine};
use crate::media::MediaTrack;
use crate::signaling::{SdpType, SessionDescription};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Negotiation state of a peer session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    Created,
    HasRemoteOffer,
    HasLocalAnswer,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl NegotiationState {
    /// No operation is valid in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }

    /// The local answer has been applied to the transport
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            NegotiationState::HasLocalAnswer
                | NegotiationState::Connected
                | NegotiationState::Disconnected
        )
    }
}

/// Callback receiving connectivity notifications
pub type ConnectivityObserver = Arc<dyn Fn(ConnectivityState) + Send + Sync>;

/// Handle to the background task relaying connectivity notifications
pub struct ConnectivitySubscription {
    task: JoinHandle<()>,
}

impl ConnectivitySubscription {
    /// Stop relaying notifications
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// The relay stopped, after a terminal state or a cancel
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Drives the offer→answer exchange for a single session
pub struct NegotiationEngine {
    session_id: String,
    engine: Arc<dyn TransportEngine>,
    state: Arc<watch::Sender<NegotiationState>>,
    tracks: Mutex<Vec<MediaTrack>>,
    remote_description: Mutex<Option<SessionDescription>>,
    local_description: Mutex<Option<SessionDescription>>,
}

impl NegotiationEngine {
    pub fn new(session_id: impl Into<String>, engine: Arc<dyn TransportEngine>) -> Self {
        Self {
            session_id: session_id.into(),
            engine,
            state: Arc::new(watch::channel(NegotiationState::Created).0),
            tracks: Mutex::new(Vec::new()),
            remote_description: Mutex::new(None),
            local_description: Mutex::new(None),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    /// Watch state transitions, including those caused by connectivity
    pub fn state_changes(&self) -> watch::Receiver<NegotiationState> {
        self.state.subscribe()
    }

    pub fn is_committed(&self) -> bool {
        self.state().is_committed()
    }

    /// Tracks registered so far, in registration order
    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.lock().clone()
    }

    pub fn has_track(&self, track_id: &str) -> bool {
        self.tracks.lock().iter().any(|t| t.id() == track_id)
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.remote_description.lock().clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.local_description.lock().clone()
    }

    /// Attach a track to the outbound media set; only valid before the offer
    #[instrument(skip(self, track), fields(session_id = %self.session_id, track_id = %track.id()))]
    pub async fn register_track(&self, track: MediaTrack) -> Result<()> {
        self.expect_state(NegotiationState::Created, "register_track")?;

        if self.has_track(track.id()) {
            return Err(Error::NegotiationError(format!(
                "track {} is already registered",
                track.id()
            )));
        }

        self.engine.add_track(&track).await?;
        debug!(kind = %track.kind(), "Track registered");
        self.tracks.lock().push(track);
        Ok(())
    }

    /// Apply the remote offer
    #[instrument(skip(self, offer), fields(session_id = %self.session_id))]
    pub async fn set_remote_offer(&self, offer: SessionDescription) -> Result<()> {
        self.expect_state(NegotiationState::Created, "set_remote_offer")?;

        if offer.sdp_type() != SdpType::Offer {
            return Err(Error::NegotiationError(format!(
                "remote description must be an offer, got {:?}",
                offer.sdp_type()
            )));
        }

        self.engine.set_remote_description(&offer).await?;
        *self.remote_description.lock() = Some(offer);
        self.transition(NegotiationState::Created, NegotiationState::HasRemoteOffer)?;
        debug!("Remote offer applied");
        Ok(())
    }

    /// Derive an answer covering every registered track
    ///
    /// Fails when any track's kind was rejected by the answer or its codec
    /// is missing from the accepted media section.
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn create_local_answer(&self) -> Result<SessionDescription> {
        self.expect_state(NegotiationState::HasRemoteOffer, "create_local_answer")?;

        let answer = self.engine.create_answer().await?;
        if answer.sdp_type() != SdpType::Answer {
            return Err(Error::NegotiationError(format!(
                "transport engine produced {:?} instead of an answer",
                answer.sdp_type()
            )));
        }

        for track in self.tracks.lock().iter() {
            ensure_track_negotiated(answer.sdp(), track)?;
        }

        Ok(answer)
    }

    /// Commit the local answer and start connectivity establishment
    ///
    /// Returns the description as committed by the transport, which carries
    /// the gathered ICE candidates.
    #[instrument(skip(self, answer), fields(session_id = %self.session_id))]
    pub async fn commit_local_answer(
        &self,
        answer: SessionDescription,
    ) -> Result<SessionDescription> {
        self.expect_state(NegotiationState::HasRemoteOffer, "commit_local_answer")?;

        if answer.sdp_type() != SdpType::Answer {
            return Err(Error::NegotiationError(format!(
                "local description must be an answer, got {:?}",
                answer.sdp_type()
            )));
        }

        self.engine.set_local_description(&answer).await?;
        let committed = self.engine.local_description().await.unwrap_or(answer);

        *self.local_description.lock() = Some(committed.clone());
        self.transition(NegotiationState::HasRemoteOffer, NegotiationState::HasLocalAnswer)?;
        info!("Local answer committed");
        Ok(committed)
    }

    /// Relay connectivity notifications into the state and to `observer`
    ///
    /// The relay runs until the transport reports a terminal state or the
    /// subscription is cancelled. Notifications never block negotiation.
    pub fn watch_connectivity(&self, observer: ConnectivityObserver) -> ConnectivitySubscription {
        let mut connectivity = self.engine.subscribe_connectivity();
        let state = Arc::clone(&self.state);
        let session_id = self.session_id.clone();

        // ICE may already have moved on while the answer was being committed
        let task = tokio::spawn(async move {
            loop {
                let update = *connectivity.borrow_and_update();
                if update != ConnectivityState::New {
                    apply_connectivity(&state, update, &session_id);
                    observer(update);
                }
                if update.is_terminal() || connectivity.changed().await.is_err() {
                    break;
                }
            }
        });

        ConnectivitySubscription { task }
    }

    /// Close the transport; idempotent
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub async fn close(&self) -> Result<()> {
        let previous = self.state.send_replace(NegotiationState::Closed);
        if previous == NegotiationState::Closed {
            return Ok(());
        }
        info!(?previous, "Closing peer session");
        self.engine.close().await
    }

    fn expect_state(&self, expected: NegotiationState, operation: &str) -> Result<()> {
        let current = self.state();
        if current != expected {
            return Err(Error::NegotiationError(format!(
                "{} is not valid in state {:?}",
                operation, current
            )));
        }
        Ok(())
    }

    fn transition(&self, from: NegotiationState, to: NegotiationState) -> Result<()> {
        let mut observed = from;
        let changed = self.state.send_if_modified(|state| {
            observed = *state;
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        });

        if !changed {
            return Err(Error::NegotiationError(format!(
                "session left {:?} while moving to {:?} (now {:?})",
                from, to, observed
            )));
        }
        Ok(())
    }
}

fn apply_connectivity(
    state: &watch::Sender<NegotiationState>,
    update: ConnectivityState,
    session_id: &str,
) {
    state.send_if_modified(|current| {
        if current.is_terminal() || !current.is_committed() {
            return false;
        }

        let next = match update {
            ConnectivityState::Connected => NegotiationState::Connected,
            ConnectivityState::Disconnected => NegotiationState::Disconnected,
            ConnectivityState::Failed => NegotiationState::Failed,
            ConnectivityState::Closed => NegotiationState::Closed,
            ConnectivityState::New | ConnectivityState::Checking => return false,
        };

        if next == *current {
            return false;
        }

        if next == NegotiationState::Failed {
            warn!(session_id, "Connectivity failed");
        } else {
            debug!(session_id, from = ?*current, to = ?next, "Connectivity changed");
        }
        *current = next;
        true
    });
}

/// Check that the answer accepted `track`'s kind with its codec
fn ensure_track_negotiated(sdp: &str, track: &MediaTrack) -> Result<()> {
    let kind = track.kind().as_str();
    let codec = track.codec().encoding_name;

    let sections = media_sections(sdp, kind);
    if sections.is_empty() {
        return Err(Error::NegotiationError(format!(
            "answer has no {} section for track {}",
            kind,
            track.id()
        )));
    }

    let with_codec: Vec<&MediaSection> = sections
        .iter()
        .filter(|s| s.accepted && s.accepts_codec(codec))
        .collect();
    if with_codec.is_empty() {
        return Err(Error::NegotiationError(format!(
            "no common {} codec: remote did not accept {} for track {}",
            kind,
            codec,
            track.id()
        )));
    }

    if with_codec.iter().any(|s| s.sends()) {
        return Ok(());
    }

    Err(Error::NegotiationError(format!(
        "answer does not send {} for track {}: direction is {}",
        kind,
        track.id(),
        with_codec[0].direction
    )))
}

/// One `m=` section of an SDP, reduced to what the codec check needs
struct MediaSection<'a> {
    accepted: bool,
    direction: &'a str,
    encodings: Vec<&'a str>,
}

impl MediaSection<'_> {
    fn accepts_codec(&self, codec: &str) -> bool {
        self.encodings.iter().any(|e| e.eq_ignore_ascii_case(codec))
    }

    fn sends(&self) -> bool {
        matches!(self.direction, "sendonly" | "sendrecv")
    }
}

fn media_sections<'a>(sdp: &'a str, kind: &str) -> Vec<MediaSection<'a>> {
    let mut sections = Vec::new();
    let mut current: Option<MediaSection<'a>> = None;

    for line in sdp.lines().map(str::trim) {
        if let Some(media) = line.strip_prefix("m=") {
            sections.extend(current.take());
            let mut fields = media.split_whitespace();
            if fields.next() == Some(kind) {
                current = Some(MediaSection {
                    accepted: fields.next() != Some("0"),
                    // RFC 4566 default
                    direction: "sendrecv",
                    encodings: Vec::new(),
                });
            }
            continue;
        }

        let Some(section) = current.as_mut() else {
            continue;
        };
        if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            if let Some(encoding) = rtpmap
                .split_whitespace()
                .nth(1)
                .and_then(|e| e.split('/').next())
            {
                section.encodings.push(encoding);
            }
        } else if let Some(direction @ ("sendrecv" | "sendonly" | "recvonly" | "inactive")) =
            line.strip_prefix("a=")
        {
            section.direction = direction;
        }
    }

    sections.extend(current);
    sections
}
