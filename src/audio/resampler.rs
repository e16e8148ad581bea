//! Mono downmix, resampling and fixed-size chunking

use super::types::AudioChunk;
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Chunk length in milliseconds
pub(crate) const CHUNK_MILLIS: u32 = 100;

/// Samples per chunk at `sample_rate`
pub(crate) fn chunk_len(sample_rate: u32) -> usize {
    (sample_rate * CHUNK_MILLIS / 1000) as usize
}

/// Converts device frames into mono chunks at the target rate
///
/// Owned by the device callback; the callback is the only caller, so no
/// locking is needed inside.
pub(crate) struct ChunkPipeline {
    channels: usize,
    target_rate: u32,
    chunk_len: usize,
    resampler: Option<SincFixedIn<f32>>,
    input_chunk_len: usize,
    input: Vec<i16>,
    output: Vec<i16>,
    sender: mpsc::Sender<AudioChunk>,
}

impl ChunkPipeline {
    pub(crate) fn new(
        device_rate: u32,
        channels: usize,
        target_rate: u32,
        sender: mpsc::Sender<AudioChunk>,
    ) -> Self {
        let chunk_len = chunk_len(target_rate);
        let (resampler, input_chunk_len) = if device_rate != target_rate {
            build_resampler(device_rate, target_rate, chunk_len)
        } else {
            (None, chunk_len)
        };

        Self {
            channels: channels.max(1),
            target_rate,
            chunk_len,
            resampler,
            input_chunk_len,
            input: Vec::with_capacity(input_chunk_len * 2),
            output: Vec::with_capacity(chunk_len * 2),
            sender,
        }
    }

    /// Feed interleaved device samples
    pub(crate) fn push(&mut self, data: &[i16]) {
        let mono = downmix(data, self.channels);

        match self.resampler.as_mut() {
            Some(resampler) => {
                self.input.extend(mono);
                while self.input.len() >= self.input_chunk_len {
                    let block: Vec<f32> = self
                        .input
                        .drain(..self.input_chunk_len)
                        .map(|s| s as f32 / 32768.0)
                        .collect();
                    match resampler.process(&[block], None) {
                        Ok(resampled) => self.output.extend(
                            resampled[0]
                                .iter()
                                .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0) as i16),
                        ),
                        Err(e) => error!("Resampling error: {}", e),
                    }
                }
            }
            None => self.output.extend(mono),
        }

        self.flush_chunks();
    }

    fn flush_chunks(&mut self) {
        while self.output.len() >= self.chunk_len {
            let chunk = AudioChunk {
                samples: self.output.drain(..self.chunk_len).collect(),
                sample_rate: self.target_rate,
            };
            // try_send keeps the device callback from blocking; a stalled
            // consumer loses the backlog rather than growing it
            if let Err(e) = self.sender.try_send(chunk) {
                warn!(
                    "Audio buffer overflow - dropping chunk and {} buffered samples: {}",
                    self.output.len(),
                    e
                );
                self.output.clear();
                return;
            }
        }
    }
}

fn downmix(data: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / frame.len() as i32) as i16
        })
        .collect()
}

fn build_resampler(
    device_rate: u32,
    target_rate: u32,
    chunk_len: usize,
) -> (Option<SincFixedIn<f32>>, usize) {
    info!("Creating resampler: {} Hz -> {} Hz", device_rate, target_rate);
    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let input_frames =
        (chunk_len as f64 * device_rate as f64 / target_rate as f64).ceil() as usize;

    match SincFixedIn::<f32>::new(
        target_rate as f64 / device_rate as f64,
        2.0,
        params,
        input_frames,
        1,
    ) {
        Ok(resampler) => (Some(resampler), input_frames),
        Err(e) => {
            error!("Failed to create resampler: {}", e);
            (None, chunk_len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_len_is_100ms() {
        assert_eq!(chunk_len(16000), 1600);
        assert_eq!(chunk_len(24000), 2400);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        assert_eq!(downmix(&[100, 300, -50, 50], 2), vec![200, 0]);
        assert_eq!(downmix(&[1, 2, 3], 1), vec![1, 2, 3]);
    }

    #[test]
    fn test_direct_path_emits_full_chunks() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut pipeline = ChunkPipeline::new(16000, 1, 16000, tx);

        pipeline.push(&vec![7i16; 1000]);
        assert!(rx.try_recv().is_err());

        pipeline.push(&vec![7i16; 2500]);
        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.samples.len(), 1600);
        assert_eq!(second.samples.len(), 1600);
        assert_eq!(first.sample_rate, 16000);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_resampled_chunks_carry_target_rate() {
        let (tx, mut rx) = mpsc::channel(64);
        let mut pipeline = ChunkPipeline::new(48000, 2, 16000, tx);

        // One second of stereo audio at 48 kHz
        pipeline.push(&vec![1000i16; 48000 * 2]);

        let mut count = 0;
        while let Ok(chunk) = rx.try_recv() {
            assert_eq!(chunk.sample_rate, 16000);
            assert_eq!(chunk.samples.len(), 1600);
            count += 1;
        }
        assert!(count >= 5, "expected several chunks, got {}", count);
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut pipeline = ChunkPipeline::new(16000, 1, 16000, tx);
        pipeline.push(&vec![0i16; 1600 * 3]);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_stalled_consumer_does_not_grow_backlog() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut pipeline = ChunkPipeline::new(16000, 1, 16000, tx);

        for _ in 0..10 {
            pipeline.push(&vec![1i16; 1600 * 4]);
            assert!(pipeline.output.len() < 1600);
        }

        // Once the consumer catches up, fresh audio flows again
        assert_eq!(rx.try_recv().unwrap().samples, vec![1i16; 1600]);
        pipeline.push(&vec![2i16; 1600]);
        assert_eq!(rx.try_recv().unwrap().samples, vec![2i16; 1600]);
    }
}
