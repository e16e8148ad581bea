//! Scoped ownership of the capture pipelines for one chanting page

use crate::events::Subscription;
use crate::sampler::{SamplerError, VolumeSampler};
use crate::speech::{SpeechEvent, SpeechListener};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureState {
    NotStarted,
    Active,
    Stopped,
}

/// Sampler and listener started and stopped together
///
/// Both components are stopped on every exit path: explicit `stop`, a
/// retry re-arm or drop of the session.
pub(crate) struct CaptureSession {
    sampler: VolumeSampler,
    listener: SpeechListener,
    state: CaptureState,
}

impl CaptureSession {
    pub(crate) fn new(sampler: VolumeSampler, listener: SpeechListener) -> Self {
        Self {
            sampler,
            listener,
            state: CaptureState::NotStarted,
        }
    }

    pub(crate) fn state(&self) -> CaptureState {
        self.state
    }

    pub(crate) fn volume_events(&self) -> Subscription<f32> {
        self.sampler.subscribe()
    }

    pub(crate) fn unsubscribe_volume(&self, subscription: &Subscription<f32>) {
        self.sampler.unsubscribe(subscription);
    }

    pub(crate) fn speech_events(&self) -> Subscription<SpeechEvent> {
        self.listener.subscribe()
    }

    pub(crate) fn speech_supported(&self) -> bool {
        self.listener.is_supported()
    }

    /// Open a capture window
    ///
    /// The listener starts even when the sampler cannot; the sampler error is
    /// returned so the caller can show a degraded indicator.
    pub(crate) async fn start(&mut self) -> Result<(), SamplerError> {
        if self.state == CaptureState::Active {
            debug!("Capture already active");
            return Ok(());
        }
        self.state = CaptureState::Active;
        self.listener.reset_transcript();
        self.listener.start();
        let result = self.sampler.start().await;
        info!(sampler = ?self.sampler.status(), speech = ?self.listener.status(), "Capture started");
        result
    }

    /// Close the capture window; safe to call repeatedly
    pub(crate) fn stop(&mut self) {
        if self.state != CaptureState::Active {
            return;
        }
        let last_volume = self.sampler.current_volume();
        self.sampler.stop();
        self.listener.stop();
        self.state = CaptureState::Stopped;
        info!(last_volume, transcript = %self.listener.transcript(), "Capture stopped");
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::testing::FakeMicrophone;
    use crate::sampler::SamplerError;
    use crate::speech::testing::{EngineProbe, FakeEngine};
    use std::sync::Arc;
    use std::time::Duration;

    fn session(mic: &Arc<FakeMicrophone>) -> (CaptureSession, EngineProbe) {
        let (engine, probe) = FakeEngine::new();
        let sampler = VolumeSampler::new(mic.clone(), Duration::from_millis(200));
        let listener = SpeechListener::new(Some(Box::new(engine)));
        (CaptureSession::new(sampler, listener), probe)
    }

    #[tokio::test]
    async fn test_start_and_stop_drive_both_components() {
        let mic = Arc::new(FakeMicrophone::granting());
        let (mut capture, probe) = session(&mic);
        assert_eq!(capture.state(), CaptureState::NotStarted);

        capture.start().await.unwrap();
        capture.start().await.unwrap();
        assert_eq!(capture.state(), CaptureState::Active);
        assert_eq!(mic.opens(), 1);
        assert_eq!(probe.starts(), 1);

        capture.stop();
        capture.stop();
        assert_eq!(capture.state(), CaptureState::Stopped);
        assert_eq!(mic.stops(), 1);
        assert_eq!(probe.stops(), 1);
    }

    #[tokio::test]
    async fn test_drop_mid_capture_releases_everything() {
        let mic = Arc::new(FakeMicrophone::granting());
        let (mut capture, probe) = session(&mic);
        capture.start().await.unwrap();
        drop(capture);
        assert_eq!(mic.stops(), 1);
        assert_eq!(probe.stops(), 1);
    }

    #[tokio::test]
    async fn test_rearm_after_stop() {
        let mic = Arc::new(FakeMicrophone::granting());
        let (mut capture, probe) = session(&mic);
        capture.start().await.unwrap();
        capture.stop();
        tokio::task::yield_now().await;
        capture.start().await.unwrap();
        assert_eq!(mic.opens(), 2);
        assert_eq!(probe.starts(), 2);
        assert_eq!(capture.state(), CaptureState::Active);
    }

    #[tokio::test]
    async fn test_denied_microphone_still_listens() {
        let mic = Arc::new(FakeMicrophone::failing(SamplerError::PermissionDenied(
            "blocked".into(),
        )));
        let (mut capture, probe) = session(&mic);
        assert!(matches!(
            capture.start().await,
            Err(SamplerError::PermissionDenied(_))
        ));
        assert_eq!(capture.state(), CaptureState::Active);
        assert_eq!(probe.starts(), 1);

        capture.stop();
        assert_eq!(probe.stops(), 1);
    }
}
