//! mediasend server entry point
//!
//! Serves the demo page and answers browser offers, sending the configured
//! GStreamer capture sources as Opus audio and VP8 video.
//!
//! # Usage
//!
//! ```bash
//! # Test sources on the default address (0.0.0.0:8080)
//! cargo run -p mediasend-server
//!
//! # Real devices
//! cargo run -p mediasend-server -- \
//!   --audio-src pulsesrc \
//!   --video-src "v4l2src device=/dev/video0"
//!
//! # Behind NAT
//! cargo run -p mediasend-server -- \
//!   --stun-servers stun:stun.l.google.com:19302 \
//!   --turn-servers turn:turn.example.com:3478:user:secret
//! ```

use anyhow::Context;
use clap::Parser;
use mediasend_webrtc::{SendConfig, SessionService, SignalingServer, TurnServerConfig};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// mediasend WebRTC sender
///
/// Answers browser offers received over HTTP and streams local capture
/// pipelines into the session.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// GStreamer audio source element, with optional properties
    #[arg(long, default_value = "audiotestsrc", env = "MEDIASEND_AUDIO_SRC")]
    audio_src: String,

    /// GStreamer video source element, with optional properties
    #[arg(long, default_value = "videotestsrc", env = "MEDIASEND_VIDEO_SRC")]
    video_src: String,

    /// HTTP signaling address
    #[arg(long, default_value = "0.0.0.0:8080", env = "MEDIASEND_BIND_ADDRESS")]
    bind_address: String,

    /// STUN servers (comma-separated, empty for host candidates only)
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "stun:stun.l.google.com:19302",
        env = "MEDIASEND_STUN_SERVERS"
    )]
    stun_servers: Vec<String>,

    /// TURN servers as turn:host:port:username:credential (comma-separated)
    #[arg(long, value_delimiter = ',', env = "MEDIASEND_TURN_SERVERS")]
    turn_servers: Vec<String>,

    /// gst-launch executable
    #[arg(long, default_value = "gst-launch-1.0", env = "MEDIASEND_GST_LAUNCH")]
    gst_launch: String,

    /// Upper bound on the ICE gathering wait before answering
    #[arg(long, default_value_t = 10, env = "MEDIASEND_ICE_GATHERING_TIMEOUT_SECS")]
    ice_gathering_timeout_secs: u64,
}

impl Args {
    fn into_config(self) -> anyhow::Result<SendConfig> {
        let turn_servers = self
            .turn_servers
            .iter()
            .filter(|s| !s.trim().is_empty())
            .map(|s| TurnServerConfig::parse(s))
            .collect::<mediasend_webrtc::Result<Vec<_>>>()?;

        let stun_servers = self
            .stun_servers
            .into_iter()
            .filter(|s| !s.trim().is_empty())
            .collect();

        let config = SendConfig {
            gst_launch_path: self.gst_launch,
            ice_gathering_timeout_secs: self.ice_gathering_timeout_secs,
            bind_address: self.bind_address,
            ..SendConfig::default()
        }
        .with_audio_source(self.audio_src)
        .with_video_source(self.video_src)
        .with_stun_servers(stun_servers)
        .with_turn_servers(turn_servers);

        config.validate()?;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .thread_name("mediasend-worker")
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    runtime.block_on(async_main(args))
}

async fn async_main(args: Args) -> anyhow::Result<()> {
    init_tracing();

    let config = args.into_config().context("Invalid configuration")?;

    info!(
        version = mediasend_webrtc::version(),
        bind_address = %config.bind_address,
        audio_source = %config.audio_source,
        video_source = %config.video_source,
        stun_servers = ?config.stun_servers,
        turn_servers = config.turn_servers.len(),
        "mediasend server starting"
    );

    let bind_address = config.bind_address.clone();
    let service = Arc::new(SessionService::with_defaults(config));

    SignalingServer::new(bind_address, service)
        .serve(shutdown_signal())
        .await
        .context("Signaling server failed")?;

    info!("mediasend server stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Ctrl+C received, shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C, running until killed"),
    }
}

fn init_tracing() {
    // RUST_LOG wins; info otherwise
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("mediasend-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]).into_config().unwrap();
        assert_eq!(config.audio_source, "audiotestsrc");
        assert_eq!(config.video_source, "videotestsrc");
        assert_eq!(config.bind_address, "0.0.0.0:8080");
        assert!(config.turn_servers.is_empty());
    }

    #[test]
    fn test_sources_and_turn_servers() {
        let config = parse(&[
            "--audio-src",
            "pulsesrc",
            "--video-src",
            "v4l2src device=/dev/video0",
            "--turn-servers",
            "turn:turn.example.com:3478:user:secret",
            "--stun-servers",
            "",
        ])
        .into_config()
        .unwrap();

        assert_eq!(config.audio_source, "pulsesrc");
        assert_eq!(config.video_source, "v4l2src device=/dev/video0");
        assert_eq!(config.turn_servers[0].url, "turn:turn.example.com:3478");
        assert_eq!(config.turn_servers[0].credential, "secret");
        assert!(config.stun_servers.is_empty());
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(parse(&["--turn-servers", "turn:host"]).into_config().is_err());
        assert!(parse(&["--bind-address", "not-an-address"])
            .into_config()
            .is_err());
        assert!(parse(&["--ice-gathering-timeout-secs", "0"])
            .into_config()
            .is_err());
        assert!(parse(&["--audio-src", " "]).into_config().is_err());
    }
}
