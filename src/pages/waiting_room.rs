//! Waiting room: occupancy, countdown and microphone readiness

use super::{PageContext, PageOutcome};
use crate::api::SocketEndpoint;
use crate::channel::{ChannelEvent, PresenceMessage, ReconnectingChannel};
use crate::display::{self, StatusLine};
use crate::input::UserCommand;
use crate::navigation::Route;
use crate::session::{ChantPhase, Permission, SessionEffect, SessionInput};
use crate::store::ConnectionBanner;
use chrono::Utc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Countdown resolution
const TICK: Duration = Duration::from_secs(1);

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let Some(menu_item) = ctx.store.snapshot().selected_menu else {
        return PageOutcome::Navigate(Route::Menu);
    };

    let address = match ctx.api.socket_url(SocketEndpoint::Presence, &menu_item.id) {
        Ok(address) => address,
        Err(e) => {
            warn!(error = %e, "Cannot build room address");
            String::new()
        }
    };
    let channel = ReconnectingChannel::open(&address, ctx.connector.clone(), ctx.channel_settings());
    let mut events = channel.subscribe();
    debug!(address = %channel.address(), "Presence channel opened");
    ctx.store.update_banner(|_| {
        if address.is_empty() {
            ConnectionBanner::Lost
        } else {
            ConnectionBanner::Connecting
        }
    });

    display::heading("Waiting room");
    display::line(&format!("Chanting for {}. Waiting for everyone to arrive.", menu_item.name));

    let mut status = StatusLine::default();
    let mut ticks = interval_at(Instant::now() + TICK, TICK);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut armed = false;

    // Re-entry after a page change picks up a room that already locked
    let room = ctx.store.snapshot().room;
    let mut pending = ctx.feed(SessionInput::Room {
        snapshot: room,
        now: Utc::now(),
    });

    let outcome = loop {
        if let Some(outcome) = apply_effects(ctx, std::mem::take(&mut pending)) {
            break outcome;
        }
        // Count whole seconds from the moment the countdown is armed
        let now_armed = ctx.session().phase() == ChantPhase::CountdownArmed;
        if now_armed && !armed {
            ticks.reset();
        }
        armed = now_armed;
        render(ctx, &mut status);

        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Message(message)) => {
                    ctx.note_channel_event(&ChannelEvent::Message(message.clone()));
                    match PresenceMessage::from_inbound(&message) {
                        Ok(presence) => {
                            let required = ctx.config.room.required_peers;
                            let snapshot = ctx.store.update_room(|room| room.apply(&presence, required));
                            pending = ctx.feed(SessionInput::Room { snapshot, now: Utc::now() });
                        }
                        Err(e) => warn!(error = %e, "Dropping presence message"),
                    }
                }
                Some(event) => ctx.note_channel_event(&event),
                None => debug!("Channel event stream ended"),
            },
            _ = ticks.tick(), if armed => pending = ctx.feed(SessionInput::Tick),
            Some(tagged) = ctx.background.recv() => pending = ctx.absorb(tagged),
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => break PageOutcome::Quit,
                Some(_) => {}
            },
        }
    };

    status.finish();
    channel.unsubscribe(&events);
    channel.shutdown().await;
    outcome
}

fn apply_effects(ctx: &PageContext, effects: Vec<SessionEffect>) -> Option<PageOutcome> {
    for effect in effects {
        match effect {
            SessionEffect::RequestMicPermission => ctx.request_permission(),
            SessionEffect::FetchPrompt => ctx.fetch_prompt(),
            SessionEffect::Navigate(route) => return Some(PageOutcome::Navigate(route)),
            other => debug!(effect = ?other, "Effect has no meaning in the waiting room"),
        }
    }
    None
}

fn render(ctx: &PageContext, status: &mut StatusLine) {
    let state = ctx.store.snapshot();
    let mut text = format!(
        "{} / {} here",
        state.room.occupant_count, ctx.config.room.required_peers
    );
    if let Some(remaining) = ctx.session().countdown() {
        text.push_str(&format!(" | starting in {}s", remaining));
        text.push_str(&format!(" | {}", display::mic_text(state.mic)));
        if !state.speech_available {
            text.push_str(" | speech off");
        }
    }
    if ctx.session().phase() == ChantPhase::PromptFetchPending
        && ctx.session().permission() == Permission::Pending
    {
        text.push_str(" | waiting for microphone");
    }
    if let Some(banner) = display::banner_text(&state.banner) {
        text.push_str(&format!(" | {}", banner));
    }
    status.show(text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::testing::{Frame, Script};
    use crate::pages::testing::{harness, menu_item, Harness, UNREACHABLE_API};
    use tokio::time::sleep;

    fn presence(json: String) -> Result<Frame, crate::channel::ChannelError> {
        Ok(Frame::Text(json))
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_runs_from_arming() {
        let Harness {
            mut ctx,
            keys: _keys,
            mut server,
            ..
        } = harness(vec![Script::Accept], UNREACHABLE_API);
        ctx.begin_session(menu_item());

        let room = async {
            let end = server.recv().await.unwrap();
            // Arm part-way through a second of the page's lifetime
            sleep(Duration::from_millis(900)).await;
            end.to_client.send(presence(r#"{"stay_num":2}"#.into())).unwrap();
            let start = Utc::now() + chrono::Duration::milliseconds(3500);
            end.to_client
                .send(presence(format!(r#"{{"start_time":"{}"}}"#, start.to_rfc3339())))
                .unwrap();
            (Instant::now(), end)
        };
        let (outcome, (armed_at, _end)) = tokio::join!(run(&mut ctx), room);

        assert_eq!(outcome, PageOutcome::Navigate(Route::Chanting));
        assert_eq!(armed_at.elapsed(), Duration::from_secs(3));
        assert_eq!(ctx.session().countdown(), Some(0));
        assert_eq!(ctx.session().permission(), Permission::Granted);

        let room = ctx.store.snapshot().room;
        assert!(room.is_locked());
        assert_eq!(room.occupant_count, ctx.config.room.required_peers);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quit_before_lock_closes_presence_channel() {
        let Harness {
            mut ctx,
            keys,
            mut server,
            ..
        } = harness(vec![Script::Accept], UNREACHABLE_API);
        ctx.begin_session(menu_item());

        let visitor = async {
            let end = server.recv().await.unwrap();
            end.to_client.send(presence(r#"{"stay_num":1}"#.into())).unwrap();
            sleep(Duration::from_secs(2)).await;
            keys.send(UserCommand::Quit).unwrap();
            end
        };
        let (outcome, mut end) = tokio::join!(run(&mut ctx), visitor);

        assert_eq!(outcome, PageOutcome::Quit);
        assert_eq!(ctx.store.snapshot().room.occupant_count, 1);
        assert_eq!(ctx.session().phase(), ChantPhase::WaitingForPeers);
        // Client side of the socket is gone once the page has returned
        while end.from_client.recv().await.is_some() {}
    }
}
