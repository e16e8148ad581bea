//! Recognition engine seam

use tokio::sync::mpsc;

/// One piece of the current utterance
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    pub(crate) text: String,
    pub(crate) is_final: bool,
}

impl Segment {
    pub(crate) fn interim(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub(crate) fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Engine failures reported through [`EngineEvent::Error`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum EngineError {
    /// The caller stopped the session before it produced anything
    #[error("aborted")]
    Aborted,

    #[error("not allowed: {0}")]
    NotAllowed(String),

    #[error("network: {0}")]
    Network(String),

    #[error("audio capture: {0}")]
    AudioCapture(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineEvent {
    /// Segments of the current utterance, oldest first
    Result { segments: Vec<Segment> },
    Error(EngineError),
    /// The session has fully ended
    End,
}

/// A continuous speech recognizer
///
/// `start` must not block; results arrive on the given sender. Calling
/// `start` on a running engine is an error, so the listener guards it.
pub(crate) trait RecognitionEngine: Send {
    fn start(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError>;
    fn stop(&mut self);
}
