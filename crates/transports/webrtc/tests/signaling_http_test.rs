//! HTTP signaling integration tests
//!
//! Exercises the router end to end with `tower::ServiceExt::oneshot` and the
//! instrumented fakes behind the session service.

mod harness;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use harness::{encoded_offer, Event, FakeLauncher, Harness};
use mediasend_webrtc::media::MediaKind;
use mediasend_webrtc::signaling::{self, SdpType, SignalingServer, OFFER_HEADER};
use tower::ServiceExt;

fn server(harness: &Harness) -> SignalingServer {
    SignalingServer::new("127.0.0.1:0", Arc::new(harness.service()))
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn offer_request(offer: &str) -> Request<Body> {
    Request::get("/webrtc")
        .header(OFFER_HEADER, offer)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_offer_header_returns_encoded_answer() {
    let harness = Harness::new();

    let response = server(&harness)
        .router()
        .oneshot(offer_request(&encoded_offer()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let answer = signaling::decode(&body_text(response).await).unwrap();
    assert_eq!(answer.sdp_type(), SdpType::Answer);
    assert_eq!(harness.log.count(Event::is_pipeline_start), 2);
}

#[tokio::test]
async fn test_missing_header_never_reaches_the_core() {
    let harness = Harness::new();

    let response = server(&harness)
        .router()
        .oneshot(Request::get("/webrtc").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(body_text(response)
        .await
        .contains("missing header: x-webrtc-offer"));
    assert!(harness.log.is_empty());
}

#[tokio::test]
async fn test_bridge_failure_is_server_error() {
    let harness = Harness::new();
    let launcher = FakeLauncher::failing(harness.log.clone(), MediaKind::Audio);
    let harness = harness.with_launcher(launcher);

    let response = server(&harness)
        .router()
        .oneshot(offer_request(&encoded_offer()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["error_type"], "bridge");
}

#[tokio::test]
async fn test_health() {
    let harness = Harness::new();

    let response = server(&harness)
        .router()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}
