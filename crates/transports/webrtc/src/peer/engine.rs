//! Transport engine seam
//!
//! The negotiation engine talks to ICE/DTLS/SRTP only through
//! [`TransportEngine`]. [`WebRtcEngine`] is the webrtc-rs implementation;
//! tests substitute instrumented fakes.

use crate::config::SendConfig;
use crate::media::MediaTrack;
use crate::signaling::SessionDescription;
use crate::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

/// Connectivity as reported by the transport engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No connectivity checks yet
    New,
    /// ICE checks in progress
    Checking,
    /// A working candidate pair exists
    Connected,
    /// Connectivity lost, may recover
    Disconnected,
    /// ICE gave up
    Failed,
    /// Engine shut down
    Closed,
}

impl ConnectivityState {
    /// No further notifications follow a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectivityState::Failed | ConnectivityState::Closed)
    }
}

impl From<RTCIceConnectionState> for ConnectivityState {
    fn from(state: RTCIceConnectionState) -> Self {
        match state {
            RTCIceConnectionState::Checking => ConnectivityState::Checking,
            RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
                ConnectivityState::Connected
            }
            RTCIceConnectionState::Disconnected => ConnectivityState::Disconnected,
            RTCIceConnectionState::Failed => ConnectivityState::Failed,
            RTCIceConnectionState::Closed => ConnectivityState::Closed,
            _ => ConnectivityState::New,
        }
    }
}

/// Operations the negotiation engine needs from the transport layer
#[async_trait]
pub trait TransportEngine: Send + Sync {
    /// Attach an outbound track to the session's media set
    async fn add_track(&self, track: &MediaTrack) -> Result<()>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    /// Apply the local description and start connectivity establishment
    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()>;

    /// The local description as currently applied (with gathered candidates)
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Watch connectivity changes; the current value is `New` until ICE starts
    fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState>;

    async fn close(&self) -> Result<()>;
}

/// Creates one independent transport engine per session
#[async_trait]
pub trait TransportEngineFactory: Send + Sync {
    async fn create(&self, session_id: &str) -> Result<Arc<dyn TransportEngine>>;
}

/// webrtc-rs peer connection wrapped as a [`TransportEngine`]
///
/// # Example
///
/// ```
/// use mediasend_webrtc::peer::{ConnectivityState, TransportEngine, WebRtcEngine};
/// use mediasend_webrtc::SendConfig;
///
/// # tokio_test::block_on(async {
/// let config = SendConfig::default().with_stun_servers(vec![]);
/// let engine = WebRtcEngine::new("session-1".to_string(), &config).await?;
/// assert_eq!(*engine.subscribe_connectivity().borrow(), ConnectivityState::New);
/// engine.close().await?;
/// # Ok::<(), mediasend_webrtc::Error>(())
/// # }).unwrap();
/// ```
pub struct WebRtcEngine {
    session_id: String,
    peer_connection: Arc<RTCPeerConnection>,
    connectivity: Arc<watch::Sender<ConnectivityState>>,
    gathering_timeout: Duration,
}

impl WebRtcEngine {
    /// Create a peer connection with the default codecs and interceptors
    #[instrument(skip(config), fields(session_id = %session_id))]
    pub async fn new(session_id: String, config: &SendConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::NegotiationError(format!("Failed to register codecs: {}", e)))?;

        let interceptor_registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(|e| {
                Error::NegotiationError(format!("Failed to register interceptors: {}", e))
            })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            }))
            .collect();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to create peer connection: {}", e))
            })?,
        );

        let connectivity = Arc::new(watch::channel(ConnectivityState::New).0);
        let connectivity_tx = Arc::clone(&connectivity);
        let log_session_id = session_id.clone();
        peer_connection.on_ice_connection_state_change(Box::new(
            move |s: RTCIceConnectionState| {
                let state = ConnectivityState::from(s);
                info!(session_id = %log_session_id, ice_state = %s, "ICE connection state changed");
                connectivity_tx.send_replace(state);
                Box::pin(async {})
            },
        ));

        debug!("Peer connection created");

        Ok(Self {
            session_id,
            peer_connection,
            connectivity,
            gathering_timeout: Duration::from_secs(config.ice_gathering_timeout_secs),
        })
    }

    /// The underlying webrtc-rs peer connection
    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }
}

#[async_trait]
impl TransportEngine for WebRtcEngine {
    async fn add_track(&self, track: &MediaTrack) -> Result<()> {
        let rtp_sender = self
            .peer_connection
            .add_track(track.sink() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| {
                Error::NegotiationError(format!("Failed to add {} track: {}", track.kind(), e))
            })?;

        // RTCP must be drained for the interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<()> {
        self.peer_connection
            .set_remote_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to set remote description: {}", e)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to create answer: {}", e)))?;
        SessionDescription::try_from(&answer)
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<()> {
        // Signaling is not trickled, so the answer must carry every candidate
        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(desc.to_rtc()?)
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to set local description: {}", e)))?;

        if tokio::time::timeout(self.gathering_timeout, gather_complete.recv())
            .await
            .is_err()
        {
            warn!(
                session_id = %self.session_id,
                timeout_secs = self.gathering_timeout.as_secs(),
                "ICE gathering did not complete, answering with partial candidates"
            );
        }

        Ok(())
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        let desc = self.peer_connection.local_description().await?;
        SessionDescription::try_from(&desc).ok()
    }

    fn subscribe_connectivity(&self) -> watch::Receiver<ConnectivityState> {
        self.connectivity.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::NegotiationError(format!("Failed to close peer connection: {}", e)))
    }
}

/// Builds a [`WebRtcEngine`] per session from the shared configuration
pub struct WebRtcEngineFactory {
    config: Arc<SendConfig>,
}

impl WebRtcEngineFactory {
    pub fn new(config: Arc<SendConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TransportEngineFactory for WebRtcEngineFactory {
    async fn create(&self, session_id: &str) -> Result<Arc<dyn TransportEngine>> {
        let engine = WebRtcEngine::new(session_id.to_string(), &self.config).await?;
        Ok(Arc::new(engine))
    }
}
