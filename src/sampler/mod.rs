//! Microphone volume sampler
//!
//! Opens a microphone stream, runs each chunk through a [`SpectrumAnalyser`]
//! and emits the normalized loudness to subscribers at most once per
//! sampling interval.

mod analyser;

pub(crate) use analyser::{normalized_level, SpectrumAnalyser};

use crate::audio::{self, AudioCaptureError, AudioCaptureHandle, AudioChunk};
use crate::events::{EventBus, Subscription};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Sampler failures; both are terminal for a sampler instance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum SamplerError {
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),

    #[error("Microphone capture unsupported: {0}")]
    Unsupported(String),
}

impl From<AudioCaptureError> for SamplerError {
    fn from(e: AudioCaptureError) -> Self {
        if e.is_unsupported() {
            SamplerError::Unsupported(e.to_string())
        } else {
            SamplerError::PermissionDenied(e.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SamplerStatus {
    Idle,
    Running,
    Denied,
    Unsupported,
}

/// A live capture's stoppable half
pub(crate) trait MediaTracks: Send {
    fn stop(&mut self);
}

impl MediaTracks for AudioCaptureHandle {
    fn stop(&mut self) {
        AudioCaptureHandle::stop(self);
    }
}

/// An open microphone: its tracks and the chunks they produce
pub(crate) struct MicrophoneStream {
    pub(crate) tracks: Box<dyn MediaTracks>,
    pub(crate) chunks: mpsc::Receiver<AudioChunk>,
}

/// Source of microphone streams
///
/// Both methods block; call them from `spawn_blocking`.
pub(crate) trait MicrophoneBackend: Send + Sync + 'static {
    /// Open and immediately release the device to learn whether access is granted
    fn probe(&self) -> Result<(), SamplerError> {
        let mut stream = self.open()?;
        stream.tracks.stop();
        Ok(())
    }

    fn open(&self) -> Result<MicrophoneStream, SamplerError>;
}

/// Default input device through cpal
#[derive(Debug, Clone)]
pub(crate) struct CpalMicrophone {
    sample_rate: u32,
}

impl CpalMicrophone {
    pub(crate) fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }
}

impl Default for CpalMicrophone {
    fn default() -> Self {
        Self::new(audio::SAMPLER_SAMPLE_RATE)
    }
}

impl MicrophoneBackend for CpalMicrophone {
    fn open(&self) -> Result<MicrophoneStream, SamplerError> {
        let (handle, chunks) = audio::start_capture(self.sample_rate)?;
        Ok(MicrophoneStream {
            tracks: Box::new(handle),
            chunks,
        })
    }
}

/// Ask for microphone access without keeping the device open
pub(crate) async fn request_permission(
    backend: Arc<dyn MicrophoneBackend>,
) -> Result<(), SamplerError> {
    tokio::task::spawn_blocking(move || backend.probe())
        .await
        .map_err(|e| SamplerError::PermissionDenied(format!("permission probe failed: {}", e)))?
}

/// Level shared between the sampling loop and the owner
///
/// `running` and `current` change under the same lock, so no sample can be
/// published after `stop()` has zeroed the level.
struct Level {
    running: bool,
    current: f32,
}

struct Graph {
    tracks: Box<dyn MediaTracks>,
    task: JoinHandle<()>,
}

pub(crate) struct VolumeSampler {
    backend: Arc<dyn MicrophoneBackend>,
    interval: Duration,
    events: EventBus<f32>,
    level: Arc<Mutex<Level>>,
    status: SamplerStatus,
    failure: Option<SamplerError>,
    graph: Option<Graph>,
}

impl VolumeSampler {
    pub(crate) fn new(backend: Arc<dyn MicrophoneBackend>, interval: Duration) -> Self {
        Self {
            backend,
            interval,
            events: EventBus::new(),
            level: Arc::new(Mutex::new(Level {
                running: false,
                current: 0.0,
            })),
            status: SamplerStatus::Idle,
            failure: None,
            graph: None,
        }
    }

    pub(crate) fn subscribe(&self) -> Subscription<f32> {
        self.events.subscribe()
    }

    pub(crate) fn unsubscribe(&self, subscription: &Subscription<f32>) {
        self.events.unsubscribe(subscription.id());
    }

    pub(crate) fn status(&self) -> SamplerStatus {
        self.status
    }

    pub(crate) fn current_volume(&self) -> f32 {
        lock(&self.level).current
    }

    /// Open the microphone and begin sampling
    ///
    /// A no-op while already running. After a denial or an unsupported
    /// device the same error is returned without touching the device again.
    pub(crate) async fn start(&mut self) -> Result<(), SamplerError> {
        if self.graph.is_some() {
            debug!("Volume sampler already running");
            return Ok(());
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }

        let backend = self.backend.clone();
        let opened = tokio::task::spawn_blocking(move || backend.open())
            .await
            .map_err(|e| SamplerError::PermissionDenied(format!("microphone open failed: {}", e)))
            .and_then(|result| result);

        let stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(error = %e, "Volume sampler could not start");
                self.status = match e {
                    SamplerError::PermissionDenied(_) => SamplerStatus::Denied,
                    SamplerError::Unsupported(_) => SamplerStatus::Unsupported,
                };
                self.failure = Some(e.clone());
                return Err(e);
            }
        };

        {
            let mut level = lock(&self.level);
            level.running = true;
            level.current = 0.0;
        }
        let task = tokio::spawn(sampling_loop(
            stream.chunks,
            self.level.clone(),
            self.interval,
            self.events.clone(),
        ));
        self.graph = Some(Graph {
            tracks: stream.tracks,
            task,
        });
        self.status = SamplerStatus::Running;
        info!(interval_ms = self.interval.as_millis() as u64, "Volume sampler started");
        Ok(())
    }

    /// Tear down the graph and zero the level; safe to call at any time
    pub(crate) fn stop(&mut self) {
        // Disconnect the analysis loop first so nothing else is published
        lock(&self.level).running = false;

        if let Some(mut graph) = self.graph.take() {
            graph.tracks.stop();
            graph.task.abort();
            self.status = SamplerStatus::Idle;
            info!("Volume sampler stopped");
        }

        lock(&self.level).current = 0.0;
    }
}

impl Drop for VolumeSampler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(level: &Mutex<Level>) -> MutexGuard<'_, Level> {
    match level.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn sampling_loop(
    mut chunks: mpsc::Receiver<AudioChunk>,
    level: Arc<Mutex<Level>>,
    interval: Duration,
    events: EventBus<f32>,
) {
    let mut analyser = SpectrumAnalyser::new();
    let mut last_emit: Option<Instant> = None;

    while let Some(chunk) = chunks.recv().await {
        analyser.push_samples(&chunk.to_f32());
        let value = normalized_level(&analyser.byte_frequency_data());

        let now = Instant::now();
        if last_emit.is_some_and(|at| now.duration_since(at) < interval) {
            continue;
        }

        let mut shared = lock(&level);
        if !shared.running {
            break;
        }
        shared.current = value;
        last_emit = Some(now);
        events.emit(value);
    }
    debug!("Sampling loop finished");
}
