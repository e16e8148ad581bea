//! Audio types and error definitions

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::info;

/// Mono PCM chunk delivered by a capture stream
#[derive(Debug, Clone)]
pub(crate) struct AudioChunk {
    /// PCM 16-bit signed samples (mono)
    pub samples: Vec<i16>,
    /// Sample rate in Hz after resampling
    pub sample_rate: u32,
}

impl AudioChunk {
    /// Samples scaled to `-1.0..1.0`
    pub(crate) fn to_f32(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / 32768.0).collect()
    }
}

/// Handle for controlling a capture thread from outside
///
/// The capture stops when this handle is dropped.
pub(crate) struct AudioCaptureHandle {
    pub(crate) is_capturing: Arc<AtomicBool>,
    pub(crate) thread_handle: Option<JoinHandle<()>>,
}

impl AudioCaptureHandle {
    /// Stop capturing and join the capture thread; safe to call repeatedly
    pub(crate) fn stop(&mut self) {
        self.is_capturing.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            info!("Audio capture stopped");
        }
    }
}

impl Drop for AudioCaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Errors that can occur during audio capture
#[derive(Debug, thiserror::Error)]
pub(crate) enum AudioCaptureError {
    #[error("No audio input device found")]
    NoInputDevice,

    #[error("No supported audio configuration found")]
    NoSupportedConfig,

    #[error("Audio configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("Capture thread exited before the stream started")]
    ThreadExited,

    #[error("Audio stream error: {0}")]
    StreamError(#[from] cpal::BuildStreamError),

    #[error("Audio play error: {0}")]
    PlayError(#[from] cpal::PlayStreamError),
}

impl AudioCaptureError {
    /// Whether the platform has no usable capture capability at all,
    /// as opposed to a device that refused to open
    pub(crate) fn is_unsupported(&self) -> bool {
        matches!(
            self,
            AudioCaptureError::NoInputDevice
                | AudioCaptureError::NoSupportedConfig
                | AudioCaptureError::UnsupportedFormat(_)
        )
    }
}
