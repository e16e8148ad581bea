//! OpenAI Realtime transcription messages
//!
//! Uses the transcription-specific session type with the gpt-4o-transcribe
//! model.

use serde::{Deserialize, Serialize};

pub(crate) const TRANSCRIBE_MODEL: &str = "gpt-4o-transcribe";

/// Messages sent to the Realtime API
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub(crate) enum RealtimeClientMessage {
    #[serde(rename = "transcription_session.update")]
    TranscriptionSessionUpdate { session: SessionConfig },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,
}

#[derive(Debug, Serialize)]
pub(crate) struct SessionConfig {
    pub input_audio_format: String,
    pub input_audio_transcription: TranscriptionConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_noise_reduction: Option<NoiseReduction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NoiseReduction {
    /// "near_field" or "far_field"
    #[serde(rename = "type")]
    pub noise_type: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct TranscriptionConfig {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TurnDetection {
    #[serde(rename = "type")]
    pub detection_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix_padding_ms: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub silence_duration_ms: Option<u32>,
}

impl SessionConfig {
    /// Chanting is loud and short, so the far-field profile and a short
    /// silence window fit better than dictation defaults
    pub(crate) fn for_chant(language: Option<&str>) -> Self {
        Self {
            input_audio_format: "pcm16".to_string(),
            input_audio_transcription: TranscriptionConfig {
                model: TRANSCRIBE_MODEL.to_string(),
                language: language.map(String::from),
            },
            input_audio_noise_reduction: Some(NoiseReduction {
                noise_type: "far_field".to_string(),
            }),
            turn_detection: Some(TurnDetection {
                detection_type: "server_vad".to_string(),
                threshold: Some(0.5),
                prefix_padding_ms: Some(300),
                silence_duration_ms: Some(500),
            }),
        }
    }
}

/// Messages received from the Realtime API
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub(crate) enum RealtimeServerMessage {
    #[serde(rename = "transcription_session.created")]
    SessionCreated,
    #[serde(rename = "transcription_session.updated")]
    SessionUpdated,
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    TranscriptionDelta { delta: Option<String> },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: Option<String> },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "error")]
    Error { error: Option<RealtimeError> },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RealtimeError {
    pub message: Option<String>,
}

impl RealtimeServerMessage {
    pub(crate) fn error_message(&self) -> Option<String> {
        match self {
            RealtimeServerMessage::Error { error } => Some(
                error
                    .as_ref()
                    .and_then(|e| e.message.clone())
                    .unwrap_or_else(|| "unknown realtime error".to_string()),
            ),
            _ => None,
        }
    }

    /// Empty-buffer errors are expected when committing after silence
    pub(crate) fn is_empty_buffer_error(message: &str) -> bool {
        message.contains("buffer too small") || message.contains("empty")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_serialization() {
        let msg = RealtimeClientMessage::TranscriptionSessionUpdate {
            session: SessionConfig::for_chant(Some("ja")),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"transcription_session.update""#));
        assert!(json.contains("gpt-4o-transcribe"));
        assert!(json.contains(r#""language":"ja""#));
        assert!(json.contains("server_vad"));
    }

    #[test]
    fn test_commit_serialization() {
        let json = serde_json::to_string(&RealtimeClientMessage::InputAudioBufferCommit).unwrap();
        assert_eq!(json, r#"{"type":"input_audio_buffer.commit"}"#);
    }

    #[test]
    fn test_delta_and_completed_deserialization() {
        let delta: RealtimeServerMessage = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.delta","delta":"ラー"}"#,
        )
        .unwrap();
        assert!(matches!(
            delta,
            RealtimeServerMessage::TranscriptionDelta { delta: Some(ref d) } if d == "ラー"
        ));

        let done: RealtimeServerMessage = serde_json::from_str(
            r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"ラーメン"}"#,
        )
        .unwrap();
        assert!(matches!(
            done,
            RealtimeServerMessage::TranscriptionCompleted { transcript: Some(ref t) } if t == "ラーメン"
        ));
    }

    #[test]
    fn test_unknown_type_is_other() {
        let msg: RealtimeServerMessage =
            serde_json::from_str(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        assert!(matches!(msg, RealtimeServerMessage::Other));
    }

    #[test]
    fn test_error_message() {
        let msg: RealtimeServerMessage = serde_json::from_str(
            r#"{"type":"error","error":{"type":"invalid_request_error","message":"bad key"}}"#,
        )
        .unwrap();
        assert_eq!(msg.error_message().as_deref(), Some("bad key"));
        assert!(RealtimeServerMessage::is_empty_buffer_error(
            "buffer too small. Expected at least 100ms"
        ));
    }
}
