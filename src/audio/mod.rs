//! Microphone capture using cpal
//!
//! Captures audio from the default input device on a dedicated thread and
//! delivers mono PCM chunks at the requested sample rate.

mod resampler;
mod types;

pub(crate) use types::{AudioCaptureError, AudioCaptureHandle, AudioChunk};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use resampler::ChunkPipeline;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Sample rate used by the volume sampler
pub(crate) const SAMPLER_SAMPLE_RATE: u32 = 16000;

/// Sample rate expected by the realtime speech engine
pub(crate) const SPEECH_SAMPLE_RATE: u32 = 24000;

/// Chunks buffered between the device thread and the consumer
const CHUNK_QUEUE: usize = 600;

/// Start capturing on a dedicated thread
///
/// Blocks until the device stream is playing or has failed to start, so the
/// caller learns about a missing or refused device immediately. Call it from
/// `spawn_blocking` inside async code.
///
/// # Errors
/// Returns `AudioCaptureError` if no input device is available, no usable
/// configuration exists, or the stream cannot be built or started.
pub(crate) fn start_capture(
    target_sample_rate: u32,
) -> Result<(AudioCaptureHandle, mpsc::Receiver<AudioChunk>), AudioCaptureError> {
    let is_capturing = Arc::new(AtomicBool::new(true));
    let is_capturing_thread = is_capturing.clone();

    let (chunk_tx, chunk_rx) = mpsc::channel(CHUNK_QUEUE);
    let (ready_tx, ready_rx) = std_mpsc::channel();

    let thread_handle = thread::spawn(move || {
        if let Err(e) = run_capture(is_capturing_thread, chunk_tx, target_sample_rate, &ready_tx)
        {
            error!("Audio capture error: {}", e);
            let _ = ready_tx.send(Err(e));
        }
    });

    let mut handle = AudioCaptureHandle {
        is_capturing,
        thread_handle: Some(thread_handle),
    };

    match ready_rx.recv() {
        Ok(Ok(())) => Ok((handle, chunk_rx)),
        Ok(Err(e)) => {
            handle.stop();
            Err(e)
        }
        Err(_) => {
            handle.stop();
            Err(AudioCaptureError::ThreadExited)
        }
    }
}

/// Run the capture stream on the current thread until stopped
fn run_capture(
    is_capturing: Arc<AtomicBool>,
    chunk_tx: mpsc::Sender<AudioChunk>,
    target_sample_rate: u32,
    ready: &std_mpsc::Sender<Result<(), AudioCaptureError>>,
) -> Result<(), AudioCaptureError> {
    let host = cpal::default_host();

    let device = host
        .default_input_device()
        .ok_or(AudioCaptureError::NoInputDevice)?;

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    info!(device = %device_name, "Using audio input device");

    let supported_configs = device
        .supported_input_configs()
        .map_err(|e| AudioCaptureError::ConfigError(e.to_string()))?;

    // Prefer a config that runs at the target rate natively
    let mut best_config = None;
    let mut found_target_rate = false;
    for config in supported_configs {
        if config.channels() == 0 {
            continue;
        }
        if config.min_sample_rate().0 <= target_sample_rate
            && config.max_sample_rate().0 >= target_sample_rate
        {
            best_config = Some(config.with_sample_rate(cpal::SampleRate(target_sample_rate)));
            found_target_rate = true;
            break;
        } else if best_config.is_none() {
            best_config = Some(config.with_max_sample_rate());
        }
    }

    let supported_config = best_config.ok_or(AudioCaptureError::NoSupportedConfig)?;
    if !found_target_rate {
        warn!(
            "{}Hz not supported, using {}Hz instead",
            target_sample_rate,
            supported_config.sample_rate().0
        );
    }

    let sample_format = supported_config.sample_format();
    let config: cpal::StreamConfig = supported_config.into();
    let device_rate = config.sample_rate.0;
    let channels = config.channels as usize;
    info!(channels, device_rate, target_sample_rate, "Audio config");

    let pipeline = Arc::new(Mutex::new(ChunkPipeline::new(
        device_rate,
        channels,
        target_sample_rate,
        chunk_tx,
    )));

    let err_callback = |err| {
        error!("Audio stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::I16 => {
            let flag = is_capturing.clone();
            let pipeline = pipeline.clone();
            device.build_input_stream(
                &config,
                move |data: &[i16], _| {
                    if !flag.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Ok(mut pipeline) = pipeline.lock() {
                        pipeline.push(data);
                    }
                },
                err_callback,
                None,
            )?
        }
        SampleFormat::F32 => {
            let flag = is_capturing.clone();
            let pipeline = pipeline.clone();
            device.build_input_stream(
                &config,
                move |data: &[f32], _| {
                    if !flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let samples: Vec<i16> = data
                        .iter()
                        .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16)
                        .collect();
                    if let Ok(mut pipeline) = pipeline.lock() {
                        pipeline.push(&samples);
                    }
                },
                err_callback,
                None,
            )?
        }
        other => {
            return Err(AudioCaptureError::UnsupportedFormat(format!("{:?}", other)));
        }
    };

    stream.play()?;
    info!("Audio capture started");
    let _ = ready.send(Ok(()));

    // The stream handle is not Send; it lives on this thread until stop
    while is_capturing.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(50));
    }

    drop(stream);
    Ok(())
}
