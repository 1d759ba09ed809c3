//! One-to-one WebRTC media sender
//!
//! A browser posts an SDP offer over HTTP; the server answers with an
//! audio (Opus) and a video (VP8) track and feeds both from local
//! GStreamer capture pipelines.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Browser                                               │
//! │  ↓ GET /webrtc (x-webrtc-offer: base64 JSON offer)     │
//! │  SignalingServer (axum)                                │
//! │  └─ SessionService                                     │
//! │     ├─ codec (base64 ⇄ SessionDescription)             │
//! │     ├─ TrackFactory (Opus / VP8 sample tracks)         │
//! │     ├─ NegotiationEngine                               │
//! │     │   └─ TransportEngine (webrtc-rs peer connection) │
//! │     └─ MediaBridge                                     │
//! │         └─ CaptureLauncher (gst-launch-1.0 → samples)  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use mediasend_webrtc::SendConfig;
//!
//! let config = SendConfig::default().with_video_source("videotestsrc pattern=ball");
//! assert!(config.validate().is_ok());
//! assert_eq!(config.audio_source, "audiotestsrc");
//! ```
//!
//! ## Serving
//!
//! ```no_run
//! use mediasend_webrtc::{SendConfig, SessionService, SignalingServer};
//! use std::sync::Arc;
//!
//! # async fn example() -> mediasend_webrtc::Result<()> {
//! let config = SendConfig::default();
//! let bind_address = config.bind_address.clone();
//! let service = Arc::new(SessionService::with_defaults(config));
//!
//! SignalingServer::new(bind_address, service)
//!     .serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod media;
pub mod peer;
pub mod session;
pub mod signaling;

pub use config::{SendConfig, TurnServerConfig};
pub use error::{Error, Result};
pub use media::{MediaKind, MediaTrack};
pub use peer::{ConnectivityState, NegotiationState};
pub use session::{ActiveSession, SessionService};
pub use signaling::{SessionDescription, SignalingServer};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
