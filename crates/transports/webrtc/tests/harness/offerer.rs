//! Receive-only webrtc-rs peer playing the browser's role

use std::sync::Arc;
use std::time::Duration;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use mediasend_webrtc::signaling::{self, SessionDescription};

pub struct BrowserOfferer {
    peer_connection: Arc<RTCPeerConnection>,
}

impl BrowserOfferer {
    /// Host candidates only, one recvonly transceiver per kind
    pub async fn new() -> Self {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let registry = register_default_interceptors(Registry::new(), &mut media_engine).unwrap();
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );

        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            peer_connection
                .add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .unwrap();
        }

        Self { peer_connection }
    }

    /// Create the offer, wait for gathering and encode it like the demo page
    pub async fn encoded_offer(&self) -> String {
        let offer = self.peer_connection.create_offer(None).await.unwrap();
        let mut gathered = self.peer_connection.gathering_complete_promise().await;
        self.peer_connection
            .set_local_description(offer)
            .await
            .unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(5), gathered.recv()).await;

        let local = self.peer_connection.local_description().await.unwrap();
        signaling::encode(&SessionDescription::offer(local.sdp)).unwrap()
    }

    /// Apply the encoded answer returned by the server
    pub async fn accept_answer(&self, encoded_answer: &str) {
        let answer = signaling::decode(encoded_answer).unwrap();
        self.peer_connection
            .set_remote_description(RTCSessionDescription::answer(answer.sdp().to_string()).unwrap())
            .await
            .unwrap();
    }

    pub fn peer_connection(&self) -> &Arc<RTCPeerConnection> {
        &self.peer_connection
    }

    pub async fn close(&self) {
        let _ = self.peer_connection.close().await;
    }
}
