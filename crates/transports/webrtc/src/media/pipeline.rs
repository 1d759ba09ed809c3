//! Capture pipelines feeding outbound tracks
//!
//! A pipeline is a `gst-launch-1.0` child process that captures from a named
//! GStreamer source, encodes with the track's codec and writes a container
//! to stdout: Ogg pages of Opus for audio, IVF frames of VP8 for video. A
//! dedicated OS thread parses the container and paces the encoded samples
//! into the track at real-time speed.
//!
//! A pipeline counts as started once its container header has been read.
//! `gst-launch-1.0` exits without writing one when the source element is
//! unknown or the pipeline cannot be built.

use super::tracks::MediaKind;
use crate::config::SendConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use webrtc::media::io::ivf_reader::{IVFFileHeader, IVFReader};
use webrtc::media::io::ogg_reader::OggReader;
use webrtc::media::Sample;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus granule positions always count 48 kHz samples
const OPUS_GRANULE_RATE: u64 = 48_000;

/// Granule position of an Ogg page on which no packet ends
const OGG_NO_GRANULE: u64 = u64::MAX;

/// How long a pipeline may take to write its container header
const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Used for the first video frame, before a timestamp delta exists
const DEFAULT_VIDEO_FRAME_DURATION: Duration = Duration::from_millis(33);

/// Which capture source to run for a track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSpec {
    pub kind: MediaKind,
    /// GStreamer source element, optionally with properties
    /// (e.g. `videotestsrc pattern=ball`)
    pub source: String,
}

impl PipelineSpec {
    pub fn new(kind: MediaKind, source: impl Into<String>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    /// The configured source for `kind`
    pub fn for_kind(kind: MediaKind, config: &SendConfig) -> Self {
        Self::new(kind, config.source_for(kind))
    }

    /// Pipeline description handed to `gst-launch-1.0`
    pub fn launch_description(&self) -> String {
        let encode = match self.kind {
            MediaKind::Audio => {
                "audioconvert ! audioresample ! opusenc ! \
                 oggmux max-delay=20000000 max-page-delay=20000000"
            }
            MediaKind::Video => {
                "videoconvert ! vp8enc deadline=1 error-resilient=partitions \
                 keyframe-max-dist=30 ! avmux_ivf"
            }
        };
        format!("{} ! {} ! fdsink fd=1", self.source.trim(), encode)
    }

    /// Command line arguments, quiet mode first so stdout carries only media
    ///
    /// The description stays one argument so quoted property values reach
    /// the GStreamer parser intact.
    pub fn launch_args(&self) -> Vec<String> {
        vec!["-q".to_string(), self.launch_description()]
    }
}

/// Destination of encoded samples
#[async_trait]
pub trait SampleSink: Send + Sync {
    async fn write_sample(&self, sample: &Sample) -> Result<()>;
}

#[async_trait]
impl SampleSink for TrackLocalStaticSample {
    async fn write_sample(&self, sample: &Sample) -> Result<()> {
        TrackLocalStaticSample::write_sample(self, sample)
            .await
            .map_err(|e| Error::BridgeError(format!("Failed to write sample: {}", e)))
    }
}

/// Control surface of a running pipeline
pub trait PipelineProcess: Send + Sync {
    /// Stop capturing; the sample pump ends on its own
    fn stop(&self) -> Result<()>;

    fn is_running(&self) -> bool;
}

/// One running capture pipeline bound to exactly one track
pub struct PipelineHandle {
    track_id: String,
    spec: PipelineSpec,
    started_at: Instant,
    process: Box<dyn PipelineProcess>,
}

impl PipelineHandle {
    pub fn new(track_id: impl Into<String>, spec: PipelineSpec, process: Box<dyn PipelineProcess>) -> Self {
        Self {
            track_id: track_id.into(),
            spec,
            started_at: Instant::now(),
            process,
        }
    }

    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    pub fn kind(&self) -> MediaKind {
        self.spec.kind
    }

    pub fn source(&self) -> &str {
        &self.spec.source
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    pub fn stop(&self) -> Result<()> {
        info!(track_id = %self.track_id, kind = %self.spec.kind, "Stopping capture pipeline");
        self.process.stop()
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("track_id", &self.track_id)
            .field("spec", &self.spec)
            .finish()
    }
}

/// Starts capture pipelines
///
/// `start` returns once the pipeline is producing media; samples flow into
/// `sink` in the background. A pipeline that cannot be built or exits
/// before producing media is a [`Error::BridgeError`].
#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    async fn start(
        &self,
        sink: Arc<dyn SampleSink>,
        track_id: &str,
        spec: &PipelineSpec,
    ) -> Result<PipelineHandle>;
}

/// Launches `gst-launch-1.0` child processes
pub struct GstLauncher {
    gst_launch_path: String,
    startup_timeout: Duration,
}

impl GstLauncher {
    pub fn new(gst_launch_path: impl Into<String>) -> Self {
        Self {
            gst_launch_path: gst_launch_path.into(),
            startup_timeout: STARTUP_TIMEOUT,
        }
    }

    pub fn from_config(config: &SendConfig) -> Self {
        Self::new(config.gst_launch_path.clone())
    }

    /// Upper bound on the wait for the container header
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }
}

#[async_trait]
impl CaptureLauncher for GstLauncher {
    async fn start(
        &self,
        sink: Arc<dyn SampleSink>,
        track_id: &str,
        spec: &PipelineSpec,
    ) -> Result<PipelineHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::BridgeError(format!("No async runtime for sample pump: {}", e)))?;

        let mut child = Command::new(&self.gst_launch_path)
            .args(spec.launch_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                Error::BridgeError(format!(
                    "Failed to launch {} pipeline '{}': {}",
                    spec.kind, spec.source, e
                ))
            })?;

        let Some(stdout) = child.stdout.take() else {
            reap(&mut child);
            return Err(Error::BridgeError(format!(
                "{} pipeline has no stdout",
                spec.kind
            )));
        };

        let shutdown = Arc::new(AtomicBool::new(false));
        let pump_shutdown = Arc::clone(&shutdown);
        let pump_track_id = track_id.to_string();
        let kind = spec.kind;
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<()>>();

        let spawned = std::thread::Builder::new()
            .name(format!("capture-{}", kind))
            .spawn(move || {
                let container = match ContainerReader::open(kind, stdout) {
                    Ok(container) => container,
                    Err(e) => {
                        debug!(track_id = %pump_track_id, %kind, error = %e, "No container header");
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                let samples = container.pump(sink.as_ref(), &runtime, &pump_shutdown);
                info!(track_id = %pump_track_id, %kind, samples, "Capture pipeline ended");
            });

        if let Err(e) = spawned {
            reap(&mut child);
            return Err(Error::BridgeError(format!(
                "Failed to spawn sample pump for {} track: {}",
                kind, e
            )));
        }

        let failure = match tokio::time::timeout(self.startup_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => None,
            Ok(Ok(Err(e))) => Some(e.to_string()),
            Ok(Err(_)) => Some("sample pump exited before the stream started".to_string()),
            Err(_) => match child.try_wait() {
                Ok(None) => {
                    warn!(
                        track_id,
                        %kind,
                        timeout_secs = self.startup_timeout.as_secs(),
                        "Pipeline is running but has not produced a stream header yet"
                    );
                    None
                }
                Ok(Some(status)) => Some(format!("pipeline exited with {}", status)),
                Err(e) => Some(e.to_string()),
            },
        };

        if let Some(reason) = failure {
            let status = reap(&mut child)
                .map(|s| s.to_string())
                .unwrap_or_else(|| "unknown status".to_string());
            return Err(Error::BridgeError(format!(
                "{} pipeline '{}' failed to start ({}): {}",
                kind, spec.source, status, reason
            )));
        }

        info!(
            track_id,
            %kind,
            source = %spec.source,
            pid = child.id(),
            "Capture pipeline started"
        );

        Ok(PipelineHandle::new(
            track_id,
            spec.clone(),
            Box::new(GstPipeline {
                child: Mutex::new(child),
                shutdown,
            }),
        ))
    }
}

/// Kill the child if it is still running and collect its exit status
fn reap(child: &mut Child) -> Option<ExitStatus> {
    match child.try_wait() {
        Ok(Some(status)) => return Some(status),
        Ok(None) => {}
        Err(e) => warn!(pid = child.id(), error = %e, "Failed to poll pipeline process"),
    }

    if let Err(e) = child.kill() {
        warn!(pid = child.id(), error = %e, "Failed to kill pipeline process");
    }
    match child.wait() {
        Ok(status) => Some(status),
        Err(e) => {
            warn!(pid = child.id(), error = %e, "Failed to wait for pipeline process");
            None
        }
    }
}

struct GstPipeline {
    child: Mutex<Child>,
    shutdown: Arc<AtomicBool>,
}

impl PipelineProcess for GstPipeline {
    fn stop(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);

        let mut child = self.child.lock();
        if child.try_wait()?.is_none() {
            child.kill()?;
            child.wait()?;
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire) && matches!(self.child.lock().try_wait(), Ok(None))
    }
}

/// Holds the pump to real time: sample `n` is written no earlier than the
/// sum of the previous sample durations after the first one.
struct Pacer {
    next_deadline: Option<Instant>,
}

impl Pacer {
    fn new() -> Self {
        Self {
            next_deadline: None,
        }
    }

    fn wait(&mut self, duration: Duration) {
        let now = Instant::now();
        let deadline = self.next_deadline.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        self.next_deadline = Some(deadline.max(now) + duration);
    }
}

fn write_paced(
    sink: &dyn SampleSink,
    runtime: &tokio::runtime::Handle,
    pacer: &mut Pacer,
    data: Bytes,
    duration: Duration,
) {
    pacer.wait(duration);
    let sample = Sample {
        data,
        duration,
        ..Default::default()
    };
    if let Err(e) = runtime.block_on(sink.write_sample(&sample)) {
        warn!(error = %e, "Failed to send sample");
    }
}

/// Encoded stream read from a pipeline's stdout
enum ContainerReader<R: Read> {
    Ogg(OggReader<R>),
    Ivf(IVFReader<R>, IVFFileHeader),
}

impl<R: Read> ContainerReader<R> {
    /// Read the container header; blocks until the pipeline writes one
    fn open(kind: MediaKind, reader: R) -> Result<Self> {
        match kind {
            MediaKind::Audio => {
                let (ogg, _) = OggReader::new(reader, true)
                    .map_err(|e| Error::BridgeError(format!("Invalid Ogg stream: {}", e)))?;
                Ok(ContainerReader::Ogg(ogg))
            }
            MediaKind::Video => {
                let (ivf, header) = IVFReader::new(reader)
                    .map_err(|e| Error::BridgeError(format!("Invalid IVF stream: {}", e)))?;
                Ok(ContainerReader::Ivf(ivf, header))
            }
        }
    }

    /// Write samples until the stream ends or `shutdown` is set
    fn pump(
        self,
        sink: &dyn SampleSink,
        runtime: &tokio::runtime::Handle,
        shutdown: &AtomicBool,
    ) -> u64 {
        match self {
            ContainerReader::Ogg(ogg) => pump_ogg(ogg, sink, runtime, shutdown),
            ContainerReader::Ivf(ivf, header) => pump_ivf(ivf, &header, sink, runtime, shutdown),
        }
    }
}

/// Pump Ogg/Opus pages into `sink`, one page per sample
///
/// Pages on which no packet ends are held back and sent together with the
/// page that completes them.
fn pump_ogg<R: Read>(
    mut ogg: OggReader<R>,
    sink: &dyn SampleSink,
    runtime: &tokio::runtime::Handle,
    shutdown: &AtomicBool,
) -> u64 {
    let mut pacer = Pacer::new();
    let mut last_granule = 0u64;
    let mut pending = BytesMut::new();
    let mut samples = 0u64;

    while !shutdown.load(Ordering::Acquire) {
        let Ok((page, header)) = ogg.parse_next_page() else {
            break;
        };

        if header.granule_position == OGG_NO_GRANULE {
            pending.extend_from_slice(&page);
            continue;
        }

        let sample_count = header.granule_position.saturating_sub(last_granule);
        last_granule = header.granule_position;
        if sample_count == 0 {
            // OpusTags and other header pages
            pending.clear();
            continue;
        }

        let data = if pending.is_empty() {
            page.freeze()
        } else {
            pending.extend_from_slice(&page);
            pending.split().freeze()
        };

        write_paced(sink, runtime, &mut pacer, data, granule_duration(sample_count));
        samples += 1;
        if samples == 1 {
            debug!("First audio sample sent");
        }
    }

    samples
}

/// Playback time of `sample_count` Opus granules
fn granule_duration(sample_count: u64) -> Duration {
    let micros = u128::from(sample_count) * 1_000_000 / u128::from(OPUS_GRANULE_RATE);
    Duration::from_micros(u64::try_from(micros).unwrap_or(u64::MAX))
}

/// Pump IVF/VP8 frames into `sink`
fn pump_ivf<R: Read>(
    mut ivf: IVFReader<R>,
    header: &IVFFileHeader,
    sink: &dyn SampleSink,
    runtime: &tokio::runtime::Handle,
    shutdown: &AtomicBool,
) -> u64 {
    let mut pacer = Pacer::new();
    let mut last_timestamp: Option<u64> = None;
    let mut samples = 0u64;

    while !shutdown.load(Ordering::Acquire) {
        let Ok((frame, frame_header)) = ivf.parse_next_frame() else {
            break;
        };

        let duration = frame_duration(
            last_timestamp,
            frame_header.timestamp,
            header.timebase_numerator,
            header.timebase_denominator,
        );
        last_timestamp = Some(frame_header.timestamp);

        write_paced(sink, runtime, &mut pacer, frame.freeze(), duration);
        samples += 1;
        if samples == 1 {
            debug!("First video sample sent");
        }
    }

    samples
}

/// Duration between two IVF frame timestamps expressed in the file timebase
fn frame_duration(previous: Option<u64>, current: u64, numerator: u32, denominator: u32) -> Duration {
    let Some(previous) = previous else {
        return DEFAULT_VIDEO_FRAME_DURATION;
    };
    if denominator == 0 || current <= previous {
        return DEFAULT_VIDEO_FRAME_DURATION;
    }

    let nanos = (current - previous) as u128 * numerator as u128 * 1_000_000_000 / denominator as u128;
    Duration::from_nanos(nanos.min(u64::MAX as u128) as u64)
}
