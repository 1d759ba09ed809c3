//! Outbound tracks and the capture pipelines feeding them

pub mod bridge;
pub mod pipeline;
pub mod tracks;

pub use bridge::MediaBridge;
pub use pipeline::{
    CaptureLauncher, GstLauncher, PipelineHandle, PipelineProcess, PipelineSpec, SampleSink,
};
pub use tracks::{CodecSpec, MediaKind, MediaTrack, SampleTrackFactory, TrackFactory};
