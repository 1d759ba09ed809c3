//! Session test harness
//!
//! Provides instrumented fakes for every collaborator of the session
//! service, sharing one ordered [`EventLog`], plus a real webrtc-rs offerer
//! standing in for the browser.
//!
//! Basic usage pattern:
//!
//! 1. Build a `Harness` (optionally failing one collaborator)
//! 2. Call `harness.service()` to get a `SessionService` wired to the fakes
//! 3. Feed it `harness::encoded_offer()`
//! 4. Assert on `harness.log.events()`

#![allow(dead_code)]

pub mod fakes;
pub mod offerer;

use std::sync::Arc;
use std::time::Duration;

use mediasend_webrtc::signaling::{self, SessionDescription};
use mediasend_webrtc::{SendConfig, SessionService};

pub use fakes::{Event, EventLog, FakeEngine, FakeEngineFactory, FakeLauncher, FakeTrackFactory};
pub use offerer::BrowserOfferer;

/// Offer as a browser would send it (content is opaque to the fakes)
pub const OFFER_SDP: &str = "v=0\r\n\
    o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n\
    s=-\r\n\
    t=0 0\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=rtpmap:111 opus/48000/2\r\n\
    a=recvonly\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=rtpmap:96 VP8/90000\r\n\
    a=recvonly\r\n";

/// Answer produced by the fake engine
pub const ANSWER_SDP: &str = "v=0\r\n\
    o=- 1 1 IN IP4 0.0.0.0\r\n\
    s=-\r\n\
    t=0 0\r\n\
    m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
    a=rtpmap:111 opus/48000/2\r\n\
    a=sendonly\r\n\
    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
    a=rtpmap:96 VP8/90000\r\n\
    a=sendonly\r\n";

/// Default time to wait for background activity in tests
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("mediasend_webrtc=debug")
        .with_test_writer()
        .try_init();
}

/// Encoded form of [`OFFER_SDP`]
pub fn encoded_offer() -> String {
    signaling::encode(&SessionDescription::offer(OFFER_SDP)).unwrap()
}

/// Fakes sharing one event log
pub struct Harness {
    pub log: EventLog,
    pub engines: Arc<FakeEngineFactory>,
    pub tracks: Arc<FakeTrackFactory>,
    pub launcher: Arc<FakeLauncher>,
    pub config: SendConfig,
}

impl Harness {
    pub fn new() -> Self {
        let log = EventLog::default();
        Self {
            engines: Arc::new(FakeEngineFactory::new(log.clone(), ANSWER_SDP)),
            tracks: Arc::new(FakeTrackFactory::new(log.clone())),
            launcher: Arc::new(FakeLauncher::new(log.clone())),
            config: SendConfig::default(),
            log,
        }
    }

    /// Engine answers with `answer_sdp` instead of [`ANSWER_SDP`]
    pub fn with_answer(mut self, answer_sdp: &str) -> Self {
        self.engines = Arc::new(FakeEngineFactory::new(self.log.clone(), answer_sdp));
        self
    }

    pub fn with_tracks(mut self, tracks: FakeTrackFactory) -> Self {
        self.tracks = Arc::new(tracks);
        self
    }

    pub fn with_launcher(mut self, launcher: FakeLauncher) -> Self {
        self.launcher = Arc::new(launcher);
        self
    }

    pub fn service(&self) -> SessionService {
        SessionService::new(
            Arc::new(self.config.clone()),
            self.engines.clone(),
            self.tracks.clone(),
            self.launcher.clone(),
        )
    }

    /// Poll the log until `predicate` holds or [`EVENT_TIMEOUT`] elapses
    pub async fn wait_for_events(&self, predicate: impl Fn(&[Event]) -> bool) -> bool {
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while !predicate(self.log.events().as_slice()) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
