//! Chanting: the capture window
//!
//! Enter presses the capture control, a second Enter releases it. The window
//! also closes by itself once the capture deadline passes.

use super::{PageContext, PageOutcome};
use crate::api::SocketEndpoint;
use crate::channel::{ChannelEvent, OutboundMessage, ReconnectingChannel, VolumeRelayMessage};
use crate::display::{self, StatusLine};
use crate::input::UserCommand;
use crate::sampler::{SamplerError, VolumeSampler};
use crate::session::{CaptureSession, CaptureState, SessionEffect, SessionInput};
use crate::speech::{SpeechEvent, SpeechListener};
use crate::store::MicStatus;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let state = ctx.store.snapshot();
    let Some(menu_item) = state.selected_menu else {
        return PageOutcome::Navigate(crate::navigation::Route::Menu);
    };

    let address = match ctx.api.socket_url(SocketEndpoint::VolumeRelay, &menu_item.id) {
        Ok(address) => address,
        Err(e) => {
            warn!(error = %e, "Cannot build volume relay address");
            String::new()
        }
    };
    let channel = ReconnectingChannel::open(&address, ctx.connector.clone(), ctx.channel_settings());
    let mut channel_events = channel.subscribe();

    let sampler = VolumeSampler::new(ctx.microphone.clone(), ctx.config.chant.sample_interval());
    let listener = SpeechListener::from_factory(&ctx.speech);
    let mut capture = CaptureSession::new(sampler, listener);
    let mut volumes = capture.volume_events();
    let mut speech = capture.speech_events();

    display::heading("Chant!");
    if !capture.speech_supported() {
        display::line("(speech recognition unavailable, only volume counts)");
    }
    show_prompt(&ctx.session().metrics().prompt);
    display::line("Press Enter to start chanting, Enter again to stop.");

    let mut shown_prompt = ctx.session().metrics().prompt.clone();
    let mut status = StatusLine::default();
    let mut deadline: Option<Instant> = None;
    let mut pending = Vec::new();

    let outcome = loop {
        match apply_effects(ctx, &mut capture, &channel, &mut deadline, std::mem::take(&mut pending)).await {
            Some(outcome) => break outcome,
            None if !ctx.session().is_capturing() => deadline = None,
            None => {}
        }

        let prompt = &ctx.session().metrics().prompt;
        if *prompt != shown_prompt {
            status.finish();
            show_prompt(prompt);
            shown_prompt = prompt.clone();
        }
        render(ctx, &mut status, deadline);

        tokio::select! {
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => break PageOutcome::Quit,
                Some(UserCommand::Toggle) => {
                    pending = if ctx.session().is_capturing() {
                        ctx.feed(SessionInput::Release)
                    } else {
                        let menu_selected = ctx.store.snapshot().selected_menu.is_some();
                        ctx.feed(SessionInput::Press { menu_selected })
                    };
                }
                Some(_) => {}
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                pending = ctx.feed(SessionInput::CaptureDeadline);
            }
            Some(volume) = volumes.recv() => pending = ctx.feed(SessionInput::Sample(volume)),
            Some(event) = speech.recv() => match event {
                SpeechEvent::Transcript(text) => pending = ctx.feed(SessionInput::Transcript(text)),
                SpeechEvent::Error(message) => {
                    status.finish();
                    display::line(&format!("(speech recognition stopped: {})", message));
                }
            },
            Some(event) = channel_events.recv() => {
                ctx.note_channel_event(&event);
                if let ChannelEvent::Message(message) = event {
                    match VolumeRelayMessage::from_inbound(&message) {
                        Ok(VolumeRelayMessage { average: Some(average) }) => {
                            pending = ctx.feed(SessionInput::RemoteAverage(average));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Dropping volume relay message"),
                    }
                }
            }
            Some(tagged) = ctx.background.recv() => pending = ctx.absorb(tagged),
        }
    };

    status.finish();
    if capture.state() == CaptureState::Active {
        info!("Leaving the chanting page mid-capture");
    }
    capture.unsubscribe_volume(&volumes);
    capture.stop();
    channel.unsubscribe(&channel_events);
    channel.shutdown().await;
    outcome
}

async fn apply_effects(
    ctx: &PageContext,
    capture: &mut CaptureSession,
    channel: &ReconnectingChannel,
    deadline: &mut Option<Instant>,
    effects: Vec<SessionEffect>,
) -> Option<PageOutcome> {
    for effect in effects {
        match effect {
            SessionEffect::StartCapture => {
                let mic = match capture.start().await {
                    Ok(()) => MicStatus::Granted,
                    Err(SamplerError::Unsupported(reason)) => {
                        warn!(reason = %reason, "Chanting without volume");
                        MicStatus::Unsupported
                    }
                    Err(SamplerError::PermissionDenied(reason)) => {
                        warn!(reason = %reason, "Chanting without volume");
                        MicStatus::Denied
                    }
                };
                ctx.store.update_mic(|_| mic);
            }
            SessionEffect::StopCapture => capture.stop(),
            SessionEffect::ForwardSample(value) => channel.send(OutboundMessage::volume(value)),
            SessionEffect::ArmCaptureDeadline(duration) => {
                info!(duration_secs = duration.as_secs(), "Capture deadline armed");
                *deadline = Some(Instant::now() + duration);
            }
            SessionEffect::Navigate(route) => return Some(PageOutcome::Navigate(route)),
            SessionEffect::RequestMicPermission => ctx.request_permission(),
            SessionEffect::FetchPrompt => ctx.fetch_prompt(),
        }
    }
    None
}

fn show_prompt(prompt: &str) {
    if prompt.is_empty() {
        debug!("No chant prompt yet");
        return;
    }
    display::line(&format!("Read aloud: {}", prompt));
}

fn render(ctx: &PageContext, status: &mut StatusLine, deadline: Option<Instant>) {
    let state = ctx.store.snapshot();
    let metrics = &state.chant;

    let mut text = if ctx.session().is_capturing() {
        let remaining = deadline
            .map(|d| d.saturating_duration_since(Instant::now()).as_secs())
            .unwrap_or(0);
        format!(
            "{} {:.2} | {}s left",
            display::volume_bar(metrics.current_volume, 20),
            metrics.current_volume,
            remaining
        )
    } else {
        format!("ready | {}", display::mic_text(state.mic))
    };
    if let Some(average) = metrics.remote_average {
        text.push_str(&format!(" | room {:.2}", average));
    }
    if !metrics.transcript.is_empty() {
        text.push_str(&format!(" | \"{}\"", metrics.transcript));
    }
    if let Some(banner) = display::banner_text(&state.banner) {
        text.push_str(&format!(" | {}", banner));
    }
    status.show(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::Script;
    use crate::navigation::Route;
    use crate::pages::testing::{harness, menu_item, Harness, UNREACHABLE_API};
    use crate::room::RoomSnapshot;
    use crate::session::ChantPhase;
    use chrono::{DateTime, FixedOffset, Utc};
    use std::time::Duration;
    use tokio::time::sleep;

    /// Walk the session through countdown and permission
    fn ready_to_chant(ctx: &mut PageContext) {
        let start: DateTime<FixedOffset> = Utc::now().into();
        ctx.feed(SessionInput::Room {
            snapshot: RoomSnapshot {
                occupant_count: 3,
                scheduled_start: Some(start),
            },
            now: Utc::now(),
        });
        ctx.feed(SessionInput::PermissionResolved { granted: true });
        assert_eq!(ctx.session().phase(), ChantPhase::ReadyToCapture);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_mid_capture_releases_microphone_and_socket() {
        let Harness {
            mut ctx,
            keys,
            mut server,
            mic,
            engine,
        } = harness(vec![Script::Accept], UNREACHABLE_API);
        ctx.begin_session(menu_item());
        ready_to_chant(&mut ctx);

        let user = async {
            let end = server.recv().await.unwrap();
            keys.send(UserCommand::Toggle).unwrap();
            while mic.opens() == 0 {
                sleep(Duration::from_millis(10)).await;
            }
            keys.send(UserCommand::Quit).unwrap();
            end
        };
        let (outcome, mut end) = tokio::join!(run(&mut ctx), user);

        assert_eq!(outcome, PageOutcome::Quit);
        assert!(ctx.session().is_capturing());
        assert_eq!(mic.opens(), 1);
        assert_eq!(mic.stops(), 1);
        assert_eq!(engine.starts(), 1);
        assert_eq!(engine.stops(), 1);
        while end.from_client.recv().await.is_some() {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_release_routes_to_result() {
        let Harness {
            mut ctx,
            keys,
            mut server,
            mic,
            engine,
        } = harness(vec![Script::Accept], UNREACHABLE_API);
        ctx.begin_session(menu_item());
        ready_to_chant(&mut ctx);

        let user = async {
            let end = server.recv().await.unwrap();
            keys.send(UserCommand::Toggle).unwrap();
            keys.send(UserCommand::Toggle).unwrap();
            end
        };
        let (outcome, _end) = tokio::join!(run(&mut ctx), user);

        assert_eq!(outcome, PageOutcome::Navigate(Route::ChantingResult));
        assert_eq!(ctx.session().phase(), ChantPhase::Failure);
        assert_eq!(mic.stops(), 1);
        assert_eq!(engine.stops(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_deadline_closes_window() {
        let Harness {
            mut ctx,
            keys,
            mut server,
            mic,
            ..
        } = harness(vec![Script::Accept], UNREACHABLE_API);
        ctx.begin_session(menu_item());
        ready_to_chant(&mut ctx);

        let user = async {
            let end = server.recv().await.unwrap();
            keys.send(UserCommand::Toggle).unwrap();
            (Instant::now(), end)
        };
        let (outcome, (pressed_at, _end)) = tokio::join!(run(&mut ctx), user);

        assert_eq!(outcome, PageOutcome::Navigate(Route::ChantingResult));
        assert_eq!(pressed_at.elapsed(), ctx.config.chant.capture_duration());
        assert_eq!(mic.stops(), 1);
    }
}
