//! Binds capture pipelines to negotiated tracks

use super::pipeline::{CaptureLauncher, PipelineHandle, PipelineSpec, SampleSink};
use super::tracks::MediaTrack;
use crate::peer::NegotiationEngine;
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Starts one capture pipeline per negotiated track
///
/// A track is attached at most once, and only after its session committed
/// the local answer.
pub struct MediaBridge {
    launcher: Arc<dyn CaptureLauncher>,
    attached: Mutex<HashSet<String>>,
}

impl MediaBridge {
    pub fn new(launcher: Arc<dyn CaptureLauncher>) -> Self {
        Self {
            launcher,
            attached: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_attached(&self, track_id: &str) -> bool {
        self.attached.lock().contains(track_id)
    }

    /// Start the capture pipeline described by `spec` feeding `track`
    #[instrument(skip_all, fields(session_id = %session.session_id(), track_id = %track.id()))]
    pub async fn attach(
        &self,
        session: &NegotiationEngine,
        track: &MediaTrack,
        spec: PipelineSpec,
    ) -> Result<PipelineHandle> {
        if !session.is_committed() {
            return Err(Error::BridgeError(format!(
                "cannot attach {} before the answer is committed (state {:?})",
                track.id(),
                session.state()
            )));
        }

        if !session.has_track(track.id()) {
            return Err(Error::BridgeError(format!(
                "track {} is not part of session {}",
                track.id(),
                session.session_id()
            )));
        }

        if spec.kind != track.kind() {
            return Err(Error::BridgeError(format!(
                "{} pipeline cannot feed {} track {}",
                spec.kind,
                track.kind(),
                track.id()
            )));
        }

        if !self.attached.lock().insert(track.id().to_string()) {
            return Err(Error::BridgeError(format!(
                "track {} already has a pipeline",
                track.id()
            )));
        }

        let sink: Arc<dyn SampleSink> = track.sink();
        match self.launcher.start(sink, track.id(), &spec).await {
            Ok(handle) => {
                info!(kind = %spec.kind, source = %spec.source, "Pipeline attached");
                Ok(handle)
            }
            Err(e) => {
                self.attached.lock().remove(track.id());
                Err(e)
            }
        }
    }
}
