//! Session description wire codec
//!
//! A description travels as a single HTTP header value: the JSON object a
//! browser produces with `JSON.stringify(pc.localDescription)`, base64
//! encoded with the standard padded alphabet (what `btoa` emits).

use crate::{Error, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

/// An immutable SDP offer or answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }

    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    /// The SDP body, opaque to the codec
    pub fn sdp(&self) -> &str {
        &self.sdp
    }

    /// Convert into the transport engine's representation
    ///
    /// The engine parses the SDP here, so an unparseable body surfaces as a
    /// negotiation failure.
    pub fn to_rtc(&self) -> Result<RTCSessionDescription> {
        let parsed = match self.sdp_type {
            SdpType::Offer => RTCSessionDescription::offer(self.sdp.clone()),
            SdpType::Answer => RTCSessionDescription::answer(self.sdp.clone()),
        };
        parsed.map_err(|e| Error::NegotiationError(format!("Failed to parse SDP: {}", e)))
    }
}

impl TryFrom<&RTCSessionDescription> for SessionDescription {
    type Error = Error;

    fn try_from(desc: &RTCSessionDescription) -> Result<Self> {
        let sdp_type = match desc.sdp_type {
            RTCSdpType::Offer => SdpType::Offer,
            RTCSdpType::Answer => SdpType::Answer,
            other => {
                return Err(Error::NegotiationError(format!(
                    "Unsupported description type: {}",
                    other
                )))
            }
        };

        Ok(Self {
            sdp_type,
            sdp: desc.sdp.clone(),
        })
    }
}

/// Encode a description for transport (JSON, then base64)
pub fn encode(desc: &SessionDescription) -> Result<String> {
    let json = serde_json::to_vec(desc)
        .map_err(|e| Error::ServerError(format!("Failed to serialize description: {}", e)))?;
    Ok(STANDARD.encode(json))
}

/// Decode a description received from the signaling channel
pub fn decode(text: &str) -> Result<SessionDescription> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Error::DecodeError("empty session description".to_string()));
    }

    let json = STANDARD
        .decode(text)
        .map_err(|e| Error::DecodeError(format!("invalid base64: {}", e)))?;

    let desc: SessionDescription = serde_json::from_slice(&json)
        .map_err(|e| Error::DecodeError(format!("invalid session description: {}", e)))?;

    if desc.sdp.trim().is_empty() {
        return Err(Error::DecodeError("session description has no sdp".to_string()));
    }

    Ok(desc)
}
