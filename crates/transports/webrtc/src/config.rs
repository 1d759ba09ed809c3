//! Configuration types for the send server

use crate::media::MediaKind;
use serde::{Deserialize, Serialize};

/// Main configuration passed to [`SessionService`](crate::SessionService)
///
/// Resolved once at startup and shared read-only by every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendConfig {
    /// STUN server URLs (may be empty for host-only candidates)
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// GStreamer source element feeding the audio track (default: audiotestsrc)
    pub audio_source: String,

    /// GStreamer source element feeding the video track (default: videotestsrc)
    pub video_source: String,

    /// Path or name of the `gst-launch-1.0` executable
    pub gst_launch_path: String,

    /// Prefix of the stream labels announced for each track
    pub stream_label_prefix: String,

    /// Upper bound on the wait for ICE gathering before the answer is returned
    pub ice_gathering_timeout_secs: u64,

    /// HTTP signaling bind address
    pub bind_address: String,
}

/// TURN server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn: or turns:)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

impl Default for SendConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            audio_source: "audiotestsrc".to_string(),
            video_source: "videotestsrc".to_string(),
            gst_launch_path: "gst-launch-1.0".to_string(),
            stream_label_prefix: "mediasend".to_string(),
            ice_gathering_timeout_secs: 10,
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

impl SendConfig {
    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a capture source or the stream label prefix is blank
    /// - a STUN URL does not start with `stun:`/`stuns:`
    /// - a TURN URL does not start with `turn:`/`turns:`
    /// - `ice_gathering_timeout_secs` is 0
    /// - `bind_address` is not a socket address
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        for (kind, source) in [
            (MediaKind::Audio, &self.audio_source),
            (MediaKind::Video, &self.video_source),
        ] {
            if source.trim().is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "{} source must not be empty",
                    kind
                )));
            }
        }

        if self.gst_launch_path.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "gst_launch_path must not be empty".to_string(),
            ));
        }

        if self.stream_label_prefix.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "stream_label_prefix must not be empty".to_string(),
            ));
        }

        if let Some(url) = self
            .stun_servers
            .iter()
            .find(|url| !url.starts_with("stun:") && !url.starts_with("stuns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "STUN server must start with stun: or stuns:, got {}",
                url
            )));
        }

        if let Some(turn) = self
            .turn_servers
            .iter()
            .find(|turn| !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:"))
        {
            return Err(Error::InvalidConfig(format!(
                "TURN server must start with turn: or turns:, got {}",
                turn.url
            )));
        }

        if self.ice_gathering_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "ice_gathering_timeout_secs must be greater than 0".to_string(),
            ));
        }

        self.bind_address
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                Error::InvalidConfig(format!(
                    "bind_address '{}' is not a socket address: {}",
                    self.bind_address, e
                ))
            })?;

        Ok(())
    }

    /// Capture source configured for a media kind
    pub fn source_for(&self, kind: MediaKind) -> &str {
        match kind {
            MediaKind::Audio => &self.audio_source,
            MediaKind::Video => &self.video_source,
        }
    }

    /// Stream label announced for tracks of a media kind
    pub fn stream_label(&self, kind: MediaKind) -> String {
        format!("{}-{}", self.stream_label_prefix, kind)
    }

    /// Override the audio capture source
    pub fn with_audio_source(mut self, source: impl Into<String>) -> Self {
        self.audio_source = source.into();
        self
    }

    /// Override the video capture source
    pub fn with_video_source(mut self, source: impl Into<String>) -> Self {
        self.video_source = source.into();
        self
    }

    /// Add TURN servers to this configuration
    pub fn with_turn_servers(mut self, turn_servers: Vec<TurnServerConfig>) -> Self {
        self.turn_servers = turn_servers;
        self
    }

    /// Replace the STUN servers
    pub fn with_stun_servers(mut self, stun_servers: Vec<String>) -> Self {
        self.stun_servers = stun_servers;
        self
    }
}

impl TurnServerConfig {
    /// Parse `turn:host:port:username:password` (or `turns:`)
    ///
    /// The password may itself contain colons.
    pub fn parse(s: &str) -> crate::Result<Self> {
        use crate::Error;

        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() < 5 {
            return Err(Error::InvalidConfig(format!(
                "Invalid TURN server format: '{}'. Expected: turn:host:port:username:password",
                s
            )));
        }

        let protocol = parts[0];
        if protocol != "turn" && protocol != "turns" {
            return Err(Error::InvalidConfig(format!(
                "Invalid TURN protocol: '{}'. Expected 'turn' or 'turns'",
                protocol
            )));
        }

        Ok(Self {
            url: format!("{}:{}:{}", protocol, parts[1], parts[2]),
            username: parts[3].to_string(),
            credential: parts[4..].join(":"),
        })
    }
}
