//! Offer in, answer out: the per-request negotiation sequence
//!
//! ```text
//! decode offer ─▶ create tracks ─▶ register, set remote, answer, commit ─▶ attach pipelines ─▶ encode answer
//! DecodeError     TrackCreationError      NegotiationError                    BridgeError
//! ```
//!
//! The sequence is linear with no retries. Once the transport engine exists,
//! any later failure closes it before the error is returned.

use crate::config::SendConfig;
use crate::media::{
    CaptureLauncher, GstLauncher, MediaBridge, MediaKind, MediaTrack, PipelineHandle,
    PipelineSpec, SampleTrackFactory, TrackFactory,
};
use crate::peer::{
    ConnectivityState, ConnectivitySubscription, NegotiationEngine, NegotiationState,
    TransportEngineFactory, WebRtcEngineFactory,
};
use crate::signaling::{self, SessionDescription};
use crate::Result;
use std::sync::Arc;
use tracing::{info, instrument, warn, Span};

/// A negotiated session with its running pipelines
pub struct ActiveSession {
    negotiation: Arc<NegotiationEngine>,
    pipelines: Vec<PipelineHandle>,
    connectivity: ConnectivitySubscription,
    answer: SessionDescription,
}

impl ActiveSession {
    pub fn session_id(&self) -> &str {
        self.negotiation.session_id()
    }

    pub fn negotiation(&self) -> &Arc<NegotiationEngine> {
        &self.negotiation
    }

    pub fn pipelines(&self) -> &[PipelineHandle] {
        &self.pipelines
    }

    /// The committed local answer
    pub fn answer(&self) -> &SessionDescription {
        &self.answer
    }

    /// Wait for the session to reach a terminal state, then release it
    #[instrument(skip(self), fields(session_id = %self.session_id()))]
    pub async fn supervise(self) {
        let mut states = self.negotiation.state_changes();
        let terminal = states.wait_for(NegotiationState::is_terminal).await.map(|s| *s);
        info!(state = ?terminal, "Session ended");
        self.shutdown().await;
    }

    /// Stop every pipeline and close the transport
    pub async fn shutdown(self) {
        self.connectivity.cancel();
        stop_pipelines(&self.pipelines);
        if let Err(e) = self.negotiation.close().await {
            warn!(session_id = %self.session_id(), error = %e, "Failed to close session");
        }
    }
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("session_id", &self.session_id())
            .field("state", &self.negotiation.state())
            .field("pipelines", &self.pipelines)
            .finish()
    }
}

/// Composes codec, track factory, negotiation and media bridge
pub struct SessionService {
    config: Arc<SendConfig>,
    engines: Arc<dyn TransportEngineFactory>,
    tracks: Arc<dyn TrackFactory>,
    launcher: Arc<dyn CaptureLauncher>,
}

impl SessionService {
    pub fn new(
        config: Arc<SendConfig>,
        engines: Arc<dyn TransportEngineFactory>,
        tracks: Arc<dyn TrackFactory>,
        launcher: Arc<dyn CaptureLauncher>,
    ) -> Self {
        Self {
            config,
            engines,
            tracks,
            launcher,
        }
    }

    /// webrtc-rs transport, sample tracks and `gst-launch-1.0` pipelines
    pub fn with_defaults(config: SendConfig) -> Self {
        let config = Arc::new(config);
        Self::new(
            Arc::clone(&config),
            Arc::new(WebRtcEngineFactory::new(Arc::clone(&config))),
            Arc::new(SampleTrackFactory::new()),
            Arc::new(GstLauncher::from_config(&config)),
        )
    }

    pub fn config(&self) -> &SendConfig {
        &self.config
    }

    /// Answer an encoded offer and keep the session running in the background
    ///
    /// Returns the encoded answer. A supervisor task releases the session
    /// once its connection fails or closes.
    pub async fn handle_offer(&self, encoded_offer: &str) -> Result<String> {
        let session = self.negotiate(encoded_offer).await?;

        let encoded = match signaling::encode(session.answer()) {
            Ok(encoded) => encoded,
            Err(e) => {
                session.shutdown().await;
                return Err(e);
            }
        };

        tokio::spawn(session.supervise());
        Ok(encoded)
    }

    /// Run the negotiation sequence for one offer
    #[instrument(skip_all, fields(session_id = tracing::field::Empty))]
    pub async fn negotiate(&self, encoded_offer: &str) -> Result<ActiveSession> {
        let offer = signaling::decode(encoded_offer)?;

        let session_id = format!("session-{}", uuid::Uuid::new_v4());
        Span::current().record("session_id", session_id.as_str());

        let tracks = MediaKind::ALL
            .iter()
            .map(|&kind| self.tracks.create(kind, &self.config.stream_label(kind)))
            .collect::<Result<Vec<_>>>()?;

        let engine = self.engines.create(&session_id).await?;
        let negotiation = Arc::new(NegotiationEngine::new(session_id, engine));

        let answer = match establish(&negotiation, &tracks, offer).await {
            Ok(answer) => answer,
            Err(e) => {
                abandon(&negotiation).await;
                return Err(e);
            }
        };

        let session_id = negotiation.session_id().to_string();
        let observer = move |state: ConnectivityState| {
            info!(session_id = %session_id, ?state, "Connectivity changed");
        };
        let connectivity = negotiation.watch_connectivity(Arc::new(observer));

        let pipelines = match self.attach_all(&negotiation, &tracks).await {
            Ok(pipelines) => pipelines,
            Err(e) => {
                connectivity.cancel();
                abandon(&negotiation).await;
                return Err(e);
            }
        };

        info!(tracks = tracks.len(), "Session negotiated");

        Ok(ActiveSession {
            negotiation,
            pipelines,
            connectivity,
            answer,
        })
    }

    /// One pipeline per track; the first failure stops the ones already running
    async fn attach_all(
        &self,
        negotiation: &NegotiationEngine,
        tracks: &[MediaTrack],
    ) -> Result<Vec<PipelineHandle>> {
        let bridge = MediaBridge::new(Arc::clone(&self.launcher));
        let mut pipelines = Vec::with_capacity(tracks.len());

        for track in tracks {
            let spec = PipelineSpec::for_kind(track.kind(), &self.config);
            match bridge.attach(negotiation, track, spec).await {
                Ok(handle) => pipelines.push(handle),
                Err(e) => {
                    stop_pipelines(&pipelines);
                    return Err(e);
                }
            }
        }

        Ok(pipelines)
    }
}

async fn establish(
    negotiation: &NegotiationEngine,
    tracks: &[MediaTrack],
    offer: SessionDescription,
) -> Result<SessionDescription> {
    for track in tracks {
        negotiation.register_track(track.clone()).await?;
    }
    negotiation.set_remote_offer(offer).await?;
    let answer = negotiation.create_local_answer().await?;
    negotiation.commit_local_answer(answer).await
}

async fn abandon(negotiation: &NegotiationEngine) {
    if let Err(e) = negotiation.close().await {
        warn!(session_id = %negotiation.session_id(), error = %e, "Failed to close abandoned session");
    }
}

fn stop_pipelines(pipelines: &[PipelineHandle]) {
    for pipeline in pipelines {
        if let Err(e) = pipeline.stop() {
            warn!(track_id = %pipeline.track_id(), error = %e, "Failed to stop pipeline");
        }
    }
}
