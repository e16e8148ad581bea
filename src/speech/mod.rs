//! Speech transcription listener
//!
//! Wraps a [`RecognitionEngine`] with idempotent start/stop, suppression of
//! caller-initiated aborts and a "final text wins over interim" view of the
//! current utterance.

mod engine;
mod messages;
mod realtime;

pub(crate) use engine::{EngineError, EngineEvent, RecognitionEngine, Segment};
pub(crate) use realtime::RealtimeEngine;

use crate::config::SpeechConfig;
use crate::events::{EventBus, Subscription};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Builds one recognition engine per chanting page; `None` when speech
/// recognition is unavailable
pub(crate) type EngineFactory = Arc<dyn Fn() -> Option<Box<dyn RecognitionEngine>> + Send + Sync>;

/// Realtime engines when speech is enabled and an API key is configured
pub(crate) fn engine_factory(config: &SpeechConfig) -> EngineFactory {
    match (config.enabled, config.api_key.as_deref()) {
        (true, Some(key)) if !key.is_empty() => {
            let key = Zeroizing::new(key.to_string());
            let language = Some(config.language.clone()).filter(|l| !l.is_empty());
            Arc::new(move || {
                let engine = RealtimeEngine::new(&key, language.clone());
                Some(Box::new(engine) as Box<dyn RecognitionEngine>)
            })
        }
        _ => Arc::new(|| None),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SpeechEvent {
    /// Current transcript; may shrink or change as hypotheses are revised
    Transcript(String),
    /// Engine failure other than a caller abort; listening has stopped
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListenerStatus {
    Unsupported,
    Idle,
    Listening,
}

/// Concatenated final text if the utterance has any, otherwise the interim text
pub(crate) fn current_transcript(segments: &[Segment]) -> String {
    let finals: String = segments
        .iter()
        .filter(|s| s.is_final)
        .map(|s| s.text.as_str())
        .collect();
    if !finals.is_empty() {
        return finals;
    }
    segments
        .iter()
        .filter(|s| !s.is_final)
        .map(|s| s.text.as_str())
        .collect()
}

#[derive(Debug)]
struct Shared {
    listening: bool,
    transcript: String,
}

pub(crate) struct SpeechListener {
    engine: Option<Box<dyn RecognitionEngine>>,
    shared: Arc<Mutex<Shared>>,
    events: EventBus<SpeechEvent>,
    pump: Option<JoinHandle<()>>,
}

impl SpeechListener {
    /// Listener over `engine`; `None` means the platform cannot recognize speech
    pub(crate) fn new(engine: Option<Box<dyn RecognitionEngine>>) -> Self {
        if engine.is_none() {
            warn!("Speech recognition is not available on this platform");
        }
        Self {
            engine,
            shared: Arc::new(Mutex::new(Shared {
                listening: false,
                transcript: String::new(),
            })),
            events: EventBus::new(),
            pump: None,
        }
    }

    /// Listener over a fresh engine from `engines`
    pub(crate) fn from_factory(engines: &EngineFactory) -> Self {
        Self::new(engines())
    }

    pub(crate) fn subscribe(&self) -> Subscription<SpeechEvent> {
        self.events.subscribe()
    }

    pub(crate) fn status(&self) -> ListenerStatus {
        if self.engine.is_none() {
            ListenerStatus::Unsupported
        } else if lock(&self.shared).listening {
            ListenerStatus::Listening
        } else {
            ListenerStatus::Idle
        }
    }

    pub(crate) fn is_supported(&self) -> bool {
        self.engine.is_some()
    }

    pub(crate) fn transcript(&self) -> String {
        lock(&self.shared).transcript.clone()
    }

    /// Begin listening; a no-op if already listening or unsupported
    pub(crate) fn start(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            debug!("Speech start ignored: recognition unsupported");
            return;
        };
        if lock(&self.shared).listening {
            debug!("Speech recognition already listening");
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = engine.start(tx) {
            report_error(&self.shared, &self.events, e);
            return;
        }

        lock(&self.shared).listening = true;
        if let Some(old) = self.pump.take() {
            old.abort();
        }
        self.pump = Some(tokio::spawn(pump(rx, self.shared.clone(), self.events.clone())));
        info!("Speech recognition started");
    }

    /// Stop listening; safe to call repeatedly
    pub(crate) fn stop(&mut self) {
        let mut shared = lock(&self.shared);
        if !shared.listening {
            return;
        }
        shared.listening = false;
        drop(shared);

        if let Some(engine) = self.engine.as_mut() {
            engine.stop();
        }
        info!("Speech recognition stopped");
    }

    /// Clear the displayed transcript without touching the engine
    pub(crate) fn reset_transcript(&self) {
        lock(&self.shared).transcript.clear();
        self.events.emit(SpeechEvent::Transcript(String::new()));
    }
}

impl Drop for SpeechListener {
    fn drop(&mut self) {
        self.stop();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    match shared.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn report_error(shared: &Mutex<Shared>, events: &EventBus<SpeechEvent>, error: EngineError) {
    if error == EngineError::Aborted {
        debug!("Speech recognition aborted by caller");
        return;
    }
    warn!(error = %error, "Speech recognition error");
    lock(shared).listening = false;
    events.emit(SpeechEvent::Error(error.to_string()));
}

async fn pump(
    mut rx: mpsc::UnboundedReceiver<EngineEvent>,
    shared: Arc<Mutex<Shared>>,
    events: EventBus<SpeechEvent>,
) {
    while let Some(event) = rx.recv().await {
        match event {
            EngineEvent::Result { segments } => {
                let text = current_transcript(&segments);
                lock(&shared).transcript = text.clone();
                events.emit(SpeechEvent::Transcript(text));
            }
            EngineEvent::Error(error) => report_error(&shared, &events, error),
            EngineEvent::End => {
                lock(&shared).listening = false;
                debug!("Speech recognition session ended");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted engine for listener and session tests

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    pub(crate) struct EngineProbe {
        pub(crate) starts: Arc<AtomicUsize>,
        pub(crate) stops: Arc<AtomicUsize>,
        pub(crate) sender: Arc<Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>>,
    }

    impl EngineProbe {
        pub(crate) fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        pub(crate) fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }

        pub(crate) fn emit(&self, event: EngineEvent) {
            if let Some(tx) = self.sender.lock().unwrap().as_ref() {
                let _ = tx.send(event);
            }
        }
    }

    pub(crate) struct FakeEngine {
        probe: EngineProbe,
        running: bool,
    }

    impl FakeEngine {
        pub(crate) fn new() -> (Self, EngineProbe) {
            let probe = EngineProbe::default();
            (Self::reporting_to(probe.clone()), probe)
        }

        pub(crate) fn reporting_to(probe: EngineProbe) -> Self {
            Self {
                probe,
                running: false,
            }
        }
    }

    /// Factory whose engines all report to `probe`
    pub(crate) fn fake_factory(probe: &EngineProbe) -> EngineFactory {
        let probe = probe.clone();
        Arc::new(move || {
            let engine = FakeEngine::reporting_to(probe.clone());
            Some(Box::new(engine) as Box<dyn RecognitionEngine>)
        })
    }

    impl RecognitionEngine for FakeEngine {
        fn start(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
            if self.running {
                return Err(EngineError::Other("recognition already started".into()));
            }
            self.running = true;
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            *self.probe.sender.lock().unwrap() = Some(events);
            Ok(())
        }

        fn stop(&mut self) {
            self.running = false;
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
            self.probe.emit(EngineEvent::Error(EngineError::Aborted));
            self.probe.emit(EngineEvent::End);
        }
    }
}
