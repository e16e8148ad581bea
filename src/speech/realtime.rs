//! OpenAI Realtime transcription engine
//!
//! Captures a second microphone stream at 24 kHz, streams it as base64 PCM16
//! over the Realtime WebSocket and turns transcription deltas into interim
//! segments and completed transcriptions into final ones.

use super::engine::{EngineError, EngineEvent, RecognitionEngine, Segment};
use super::messages::{RealtimeClientMessage, RealtimeServerMessage, SessionConfig};
use crate::audio::{self, AudioCaptureHandle, AudioChunk};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use zeroize::Zeroizing;

const REALTIME_URL: &str = "wss://api.openai.com/v1/realtime?intent=transcription";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Keepalive ping for idle stretches
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for the last completed transcription after a commit
const FINAL_RESULT_WAIT: Duration = Duration::from_secs(2);

type RealtimeSocket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

pub(crate) struct RealtimeEngine {
    api_key: Zeroizing<String>,
    language: Option<String>,
    stop_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RealtimeEngine {
    pub(crate) fn new(api_key: &str, language: Option<String>) -> Self {
        Self {
            api_key: Zeroizing::new(api_key.to_string()),
            language,
            stop_tx: None,
            task: None,
        }
    }
}

impl std::fmt::Debug for RealtimeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeEngine")
            .field("api_key", &"[REDACTED]")
            .field("language", &self.language)
            .field("running", &self.task.is_some())
            .finish()
    }
}

impl RecognitionEngine for RealtimeEngine {
    fn start(&mut self, events: mpsc::UnboundedSender<EngineEvent>) -> Result<(), EngineError> {
        if self.task.as_ref().is_some_and(|t| !t.is_finished()) {
            return Err(EngineError::Other("recognition already started".into()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| EngineError::Other(format!("no async runtime: {}", e)))?;

        let (stop_tx, stop_rx) = oneshot::channel();
        let api_key = self.api_key.clone();
        let language = self.language.clone();
        self.task = Some(runtime.spawn(run_session(api_key, language, events, stop_rx)));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        // The task finishes on its own after flushing the last result
        self.task = None;
    }
}

/// Build the WebSocket request with Bearer authentication
pub(crate) fn build_request(api_key: &str) -> Result<http::Request<()>, EngineError> {
    http::Request::builder()
        .uri(REALTIME_URL)
        .header("Host", "api.openai.com")
        .header("Authorization", format!("Bearer {}", api_key))
        .header("OpenAI-Beta", "realtime=v1")
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", tungstenite::handshake::client::generate_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| EngineError::Other(e.to_string()))
}

/// Interim and final text of the utterance in progress
#[derive(Debug, Default)]
pub(crate) struct Utterance {
    interim: String,
}

impl Utterance {
    /// Apply a server message; returns the segments to report, if any
    pub(crate) fn apply(&mut self, message: &RealtimeServerMessage) -> Option<Vec<Segment>> {
        match message {
            RealtimeServerMessage::TranscriptionDelta { delta: Some(delta) } if !delta.is_empty() => {
                self.interim.push_str(delta);
                Some(vec![Segment::interim(self.interim.clone())])
            }
            RealtimeServerMessage::TranscriptionCompleted { transcript } => {
                let text = transcript.clone().unwrap_or_default();
                let interim = std::mem::take(&mut self.interim);
                let text = if text.trim().is_empty() { interim } else { text };
                if text.trim().is_empty() {
                    None
                } else {
                    Some(vec![Segment::finalized(text)])
                }
            }
            _ => None,
        }
    }
}

fn connect_error(e: tungstenite::Error) -> EngineError {
    match e {
        tungstenite::Error::Http(response)
            if matches!(response.status().as_u16(), 401 | 403) =>
        {
            EngineError::NotAllowed(format!("realtime API rejected credentials ({})", response.status()))
        }
        other => EngineError::Network(other.to_string()),
    }
}

async fn open_session(
    api_key: &str,
    language: Option<&str>,
) -> Result<(AudioCaptureHandle, mpsc::Receiver<AudioChunk>, RealtimeSocket), EngineError> {
    let (capture, chunks) =
        tokio::task::spawn_blocking(|| audio::start_capture(audio::SPEECH_SAMPLE_RATE))
            .await
            .map_err(|e| EngineError::AudioCapture(e.to_string()))?
            .map_err(|e| EngineError::AudioCapture(e.to_string()))?;

    let request = build_request(api_key)?;
    let (mut socket, _response) = timeout(CONNECT_TIMEOUT, connect_async(request))
        .await
        .map_err(|_| EngineError::Network(format!("connection timed out after {:?}", CONNECT_TIMEOUT)))?
        .map_err(connect_error)?;
    info!("Realtime transcription connected");

    let init = RealtimeClientMessage::TranscriptionSessionUpdate {
        session: SessionConfig::for_chant(language),
    };
    send_json(&mut socket, &init).await?;

    Ok((capture, chunks, socket))
}

async fn send_json<S>(sink: &mut S, message: &RealtimeClientMessage) -> Result<(), EngineError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(message).map_err(|e| EngineError::Other(e.to_string()))?;
    sink.send(Message::Text(json))
        .await
        .map_err(|e| EngineError::Network(e.to_string()))
}

async fn send_chunk<S>(sink: &mut S, chunk: &AudioChunk) -> Result<(), EngineError>
where
    S: SinkExt<Message, Error = tungstenite::Error> + Unpin,
{
    let bytes: Vec<u8> = chunk.samples.iter().flat_map(|s| s.to_le_bytes()).collect();
    let audio = base64::engine::general_purpose::STANDARD.encode(bytes);
    send_json(sink, &RealtimeClientMessage::InputAudioBufferAppend { audio }).await
}

/// Handle one inbound frame; `Err` ends the session
fn handle_frame(
    frame: Result<Message, tungstenite::Error>,
    utterance: &mut Utterance,
    events: &mpsc::UnboundedSender<EngineEvent>,
) -> Result<(), EngineError> {
    match frame {
        Ok(Message::Text(text)) => {
            trace!("Realtime message: {}", text);
            let message = match serde_json::from_str::<RealtimeServerMessage>(&text) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Failed to parse realtime message: {}", e);
                    return Ok(());
                }
            };
            if let Some(error_message) = message.error_message() {
                if RealtimeServerMessage::is_empty_buffer_error(&error_message) {
                    debug!("Realtime buffer empty (expected): {}", error_message);
                    return Ok(());
                }
                return Err(EngineError::Other(error_message));
            }
            match &message {
                RealtimeServerMessage::SessionCreated | RealtimeServerMessage::SessionUpdated => {
                    debug!("Realtime transcription session ready");
                }
                RealtimeServerMessage::SpeechStarted => debug!("Realtime VAD: speech started"),
                RealtimeServerMessage::SpeechStopped => debug!("Realtime VAD: speech stopped"),
                _ => {}
            }
            if let Some(segments) = utterance.apply(&message) {
                let _ = events.send(EngineEvent::Result { segments });
            }
            Ok(())
        }
        Ok(Message::Close(_)) => Err(EngineError::Network("closed by server".into())),
        Ok(_) => Ok(()),
        Err(e) => Err(EngineError::Network(e.to_string())),
    }
}

async fn run_session(
    api_key: Zeroizing<String>,
    language: Option<String>,
    events: mpsc::UnboundedSender<EngineEvent>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let opened = tokio::select! {
        _ = &mut stop_rx => {
            debug!("Realtime session stopped while connecting");
            let _ = events.send(EngineEvent::Error(EngineError::Aborted));
            let _ = events.send(EngineEvent::End);
            return;
        }
        result = open_session(&api_key, language.as_deref()) => result,
    };

    let (mut capture, mut chunks, socket) = match opened {
        Ok(session) => session,
        Err(e) => {
            error!(error = %e, "Realtime transcription failed to start");
            let _ = events.send(EngineEvent::Error(e));
            let _ = events.send(EngineEvent::End);
            return;
        }
    };

    let (mut sink, mut stream) = socket.split();
    let mut utterance = Utterance::default();
    let mut ping = interval(PING_INTERVAL);
    ping.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut chunks_sent = 0u64;

    let outcome: Result<(), EngineError> = loop {
        tokio::select! {
            biased;

            _ = &mut stop_rx => break Ok(()),
            frame = stream.next() => match frame {
                Some(frame) => {
                    if let Err(e) = handle_frame(frame, &mut utterance, &events) {
                        break Err(e);
                    }
                }
                None => break Err(EngineError::Network("connection ended".into())),
            },
            chunk = chunks.recv() => match chunk {
                Some(chunk) => {
                    chunks_sent += 1;
                    if let Err(e) = send_chunk(&mut sink, &chunk).await {
                        break Err(e);
                    }
                }
                None => break Err(EngineError::AudioCapture("microphone stream ended".into())),
            },
            _ = ping.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break Err(EngineError::Network("keepalive ping failed".into()));
                }
            },
        }
    };

    capture.stop();
    info!(chunks_sent, "Realtime audio stream stopped");

    match outcome {
        Ok(()) => {
            // Flush the utterance in progress before closing
            if send_json(&mut sink, &RealtimeClientMessage::InputAudioBufferCommit)
                .await
                .is_ok()
            {
                let drain = async {
                    while let Some(frame) = stream.next().await {
                        let completed = matches!(
                            &frame,
                            Ok(Message::Text(text)) if text.contains("input_audio_transcription.completed")
                        );
                        if handle_frame(frame, &mut utterance, &events).is_err() || completed {
                            break;
                        }
                    }
                };
                let _ = timeout(FINAL_RESULT_WAIT, drain).await;
            }
            let _ = sink.close().await;
        }
        Err(e) => {
            warn!(error = %e, "Realtime transcription ended with error");
            let _ = events.send(EngineEvent::Error(e));
        }
    }

    let _ = events.send(EngineEvent::End);
}
