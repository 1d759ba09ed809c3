//! Outbound media tracks
//!
//! One codec per kind: Opus for audio, VP8 for video. There is no codec
//! preference negotiation; the answer either carries the kind's codec or
//! the session fails.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Every kind, in the order tracks are created for a session
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// The fixed codec used for this kind
    pub fn codec(&self) -> CodecSpec {
        match self {
            MediaKind::Audio => CodecSpec::OPUS,
            MediaKind::Video => CodecSpec::VP8,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Codec parameters of an outbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecSpec {
    /// MIME type announced to the transport engine
    pub mime_type: &'static str,
    /// Encoding name as it appears in an `a=rtpmap` line
    pub encoding_name: &'static str,
    /// RTP clock rate in Hz
    pub clock_rate: u32,
    /// Channel count (0 for video)
    pub channels: u16,
}

impl CodecSpec {
    pub const OPUS: CodecSpec = CodecSpec {
        mime_type: MIME_TYPE_OPUS,
        encoding_name: "opus",
        clock_rate: 48000,
        channels: 2,
    };

    pub const VP8: CodecSpec = CodecSpec {
        mime_type: MIME_TYPE_VP8,
        encoding_name: "VP8",
        clock_rate: 90000,
        channels: 0,
    };

    fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type.to_string(),
            clock_rate: self.clock_rate,
            channels: self.channels,
            ..Default::default()
        }
    }
}

/// A sample-fed outbound track
///
/// Cheap to clone; the negotiation engine registers it with the peer
/// connection and the media bridge writes samples into the same underlying
/// track.
#[derive(Clone)]
pub struct MediaTrack {
    id: String,
    kind: MediaKind,
    label: String,
    sink: Arc<TrackLocalStaticSample>,
}

impl MediaTrack {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> MediaKind {
        self.kind
    }

    pub fn codec(&self) -> CodecSpec {
        self.kind.codec()
    }

    /// Stream label announced for this track
    pub fn label(&self) -> &str {
        &self.label
    }

    /// The transport engine track samples are written into
    pub fn sink(&self) -> Arc<TrackLocalStaticSample> {
        Arc::clone(&self.sink)
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("label", &self.label)
            .finish()
    }
}

/// Creates outbound tracks
///
/// Implementations must be safe to call from concurrently negotiated
/// sessions and must never hand out the same id twice.
pub trait TrackFactory: Send + Sync {
    fn create(&self, kind: MediaKind, label: &str) -> Result<MediaTrack>;
}

/// Default factory backed by `TrackLocalStaticSample`
#[derive(Debug, Default, Clone, Copy)]
pub struct SampleTrackFactory;

impl SampleTrackFactory {
    pub fn new() -> Self {
        Self
    }
}

impl TrackFactory for SampleTrackFactory {
    fn create(&self, kind: MediaKind, label: &str) -> Result<MediaTrack> {
        if label.trim().is_empty() {
            return Err(Error::TrackCreationError(format!(
                "{} track needs a stream label",
                kind
            )));
        }

        let id = format!("{}-{}", kind, uuid::Uuid::new_v4());
        let sink = Arc::new(TrackLocalStaticSample::new(
            kind.codec().capability(),
            id.clone(),
            label.to_string(),
        ));

        debug!(track_id = %id, %kind, label, "Created outbound track");

        Ok(MediaTrack {
            id,
            kind,
            label: label.to_string(),
            sink,
        })
    }
}
