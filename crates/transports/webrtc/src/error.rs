//! Error types for session negotiation and media bridging

/// Result type alias using the crate Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating a session
///
/// Every variant aborts the current session. The first four map onto the
/// stages of [`SessionService`](crate::SessionService); the rest are
/// ambient failures of configuration and the HTTP front door.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed signaling payload (bad base64, bad JSON, missing fields)
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// The transport engine could not allocate a track
    #[error("Track creation error: {0}")]
    TrackCreationError(String),

    /// State-machine misuse, incompatible media or engine negotiation failure
    #[error("Negotiation error: {0}")]
    NegotiationError(String),

    /// A capture pipeline failed to start
    #[error("Bridge error: {0}")]
    BridgeError(String),

    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP server error
    #[error("Server error: {0}")]
    ServerError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Check if this error was caused by the caller's input
    ///
    /// Only a malformed offer is the caller's fault; every other failure is
    /// server-side.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::DecodeError(_))
    }

    /// Check if this error is a configuration error
    pub fn is_config_error(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    /// Name of the stage that failed, for signaling responses and logs
    pub fn stage(&self) -> &'static str {
        match self {
            Error::DecodeError(_) => "decode",
            Error::TrackCreationError(_) => "track_creation",
            Error::NegotiationError(_) => "negotiation",
            Error::BridgeError(_) => "bridge",
            Error::InvalidConfig(_) => "config",
            Error::ServerError(_) | Error::IoError(_) => "server",
        }
    }
}
