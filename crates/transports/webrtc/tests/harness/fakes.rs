//! Instrumented collaborators recording every call into an [`EventLog`]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use mediasend_webrtc::media::{
    CaptureLauncher, MediaKind, MediaTrack, PipelineHandle, PipelineProcess, PipelineSpec,
    SampleSink, SampleTrackFactory, TrackFactory,
};
use mediasend_webrtc::peer::{ConnectivityState, TransportEngine, TransportEngineFactory};
use mediasend_webrtc::signaling::SessionDescription;
use mediasend_webrtc::{Error, Result};

/// Candidate appended by the fake engine once the answer is committed
pub const GATHERED_CANDIDATE: &str =
    "a=candidate:1 1 udp 2130706431 192.0.2.10 50000 typ host\r\n";

/// One observed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    TrackCreated { kind: MediaKind, id: String },
    EngineCreated { session_id: String },
    TrackAdded { session_id: String, track_id: String },
    RemoteDescriptionSet { session_id: String },
    AnswerCreated { session_id: String },
    LocalDescriptionSet { session_id: String },
    EngineClosed { session_id: String },
    PipelineStarted { track_id: String, kind: MediaKind },
    PipelineStopped { track_id: String },
}

impl Event {
    pub fn is_pipeline_start(&self) -> bool {
        matches!(self, Event::PipelineStarted { .. })
    }
}

/// Ordered, shared call log
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    pub fn record(&self, event: Event) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn count(&self, predicate: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().iter().filter(|&e| predicate(e)).count()
    }

    /// Index of the first event matching `predicate`
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.events.lock().iter().position(predicate)
    }
}

/// Transport engine answering with a fixed SDP
pub struct FakeEngine {
    session_id: String,
    log: EventLog,
    answer_sdp: String,
    committed: Mutex<Option<SessionDescription>>,
    connectivity: watch::Sender<ConnectivityState>,
}

impl FakeEngine {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Simulate a connectivity notification from ICE
    pub fn notify(&self, state: ConnectivityState) {
        self.connectivity.send_replace(state);
    }
}

#[async_trait]
impl TransportEngine for FakeEngine {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        self.log.record(Event::TrackAdded {
            session_id: self.session_id.clone(),
            track_id: track.id().to_string(),
        });
        Ok(())
    }

    async fn set_remote_description(&self, _desc: &SessionDescription) -> Result<()> {
        self.log.record(Event::RemoteDescriptionSet {
            session_id: self.session_id.clone(),
        });
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        self.log.record(Event::AnswerCreated {
            session_id: self.session_id.clone(),
        });
        Ok(SessionDescription::answer(self.answer_sdp.clone()))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        self.log.record(Event::LocalDescriptionSet {
            session_id: self.session_id.clone(),
        });
        *self.committed.lock() = Some(SessionDescription::answer(format!(
            "{}{}",
            desc.sdp(),
            GATHERED_CANDIDATE
        )));
        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.committed.lock().clone()
    }

    fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.log.record(Event::EngineClosed {
            session_id: self.session_id.clone(),
        });
        self.connectivity.send_replace(ConnectivityState::Closed);
        Ok(())
    }
}

/// Hands out [`FakeEngine`]s and keeps them for inspection
pub struct FakeEngineFactory {
    log: EventLog,
    answer_sdp: String,
    created: Mutex<Vec<Arc<FakeEngine>>>,
}

impl FakeEngineFactory {
    pub fn new(log: EventLog, answer_sdp: &str) -> Self {
        Self {
            log,
            answer_sdp: answer_sdp.to_string(),
            created: Mutex::new(Vec::new()),
        }
    }

    pub fn engines(&self) -> Vec<Arc<FakeEngine>> {
        self.created.lock().clone()
    }

    pub fn last(&self) -> Option<Arc<FakeEngine>> {
        self.created.lock().last().cloned()
    }
}

#[async_trait]
impl TransportEngineFactory for FakeEngineFactory {
    async fn create(&self, session_id: &str) -> Result<Arc<dyn TransportEngine>> {
        self.log.record(Event::EngineCreated {
            session_id: session_id.to_string(),
        });
        let engine = Arc::new(FakeEngine {
            session_id: session_id.to_string(),
            log: self.log.clone(),
            answer_sdp: self.answer_sdp.clone(),
            committed: Mutex::new(None),
            connectivity: watch::channel(ConnectivityState::New).0,
        });
        self.created.lock().push(Arc::clone(&engine));
        Ok(engine)
    }
}

/// Real sample tracks, with logging and optional failure for one kind
pub struct FakeTrackFactory {
    log: EventLog,
    inner: SampleTrackFactory,
    fail_kind: Option<MediaKind>,
}

impl FakeTrackFactory {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            inner: SampleTrackFactory::new(),
            fail_kind: None,
        }
    }

    pub fn failing(log: EventLog, kind: MediaKind) -> Self {
        Self {
            fail_kind: Some(kind),
            ..Self::new(log)
        }
    }
}

impl TrackFactory for FakeTrackFactory {
    fn create(&self, kind: MediaKind, label: &str) -> Result<MediaTrack> {
        if self.fail_kind == Some(kind) {
            return Err(Error::TrackCreationError(format!(
                "{} device unavailable",
                kind
            )));
        }
        let track = self.inner.create(kind, label)?;
        self.log.record(Event::TrackCreated {
            kind,
            id: track.id().to_string(),
        });
        Ok(track)
    }
}

struct FakeProcess {
    track_id: String,
    log: EventLog,
    running: Mutex<bool>,
}

impl PipelineProcess for FakeProcess {
    fn stop(&self) -> Result<()> {
        let mut running = self.running.lock();
        if *running {
            *running = false;
            self.log.record(Event::PipelineStopped {
                track_id: self.track_id.clone(),
            });
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }
}

/// Launcher that starts nothing, with optional failure for one kind
pub struct FakeLauncher {
    log: EventLog,
    fail_kind: Option<MediaKind>,
}

impl FakeLauncher {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            fail_kind: None,
        }
    }

    pub fn failing(log: EventLog, kind: MediaKind) -> Self {
        Self {
            log,
            fail_kind: Some(kind),
        }
    }
}

#[async_trait]
impl CaptureLauncher for FakeLauncher {
    async fn start(
        &self,
        _sink: Arc<dyn SampleSink>,
        track_id: &str,
        spec: &PipelineSpec,
    ) -> Result<PipelineHandle> {
        if self.fail_kind == Some(spec.kind) {
            return Err(Error::BridgeError(format!(
                "no element \"{}\"",
                spec.source
            )));
        }

        self.log.record(Event::PipelineStarted {
            track_id: track_id.to_string(),
            kind: spec.kind,
        });

        Ok(PipelineHandle::new(
            track_id,
            spec.clone(),
            Box::new(FakeProcess {
                track_id: track_id.to_string(),
                log: self.log.clone(),
                running: Mutex::new(true),
            }),
        ))
    }
}
