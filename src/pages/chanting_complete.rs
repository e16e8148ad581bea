use super::{PageContext, PageOutcome};
use crate::display;
use crate::input::UserCommand;
use crate::navigation::Route;
use crate::session::{SessionEffect, SessionInput};
use tracing::warn;

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let chant = ctx.store.snapshot().chant;
    display::heading("The venue is heating up!");
    display::line(&format!("Your peak volume: {:.2}", chant.max_volume));
    if let Some(average) = chant.remote_average {
        display::line(&format!("Room average: {:.2}", average));
    }
    if !chant.transcript.is_empty() {
        display::line(&format!("We heard: \"{}\"", chant.transcript));
    }

    let dwell = tokio::time::sleep(ctx.config.chant.success_dwell());
    tokio::pin!(dwell);

    loop {
        tokio::select! {
            _ = &mut dwell => break,
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => return PageOutcome::Quit,
                Some(_) => {}
            },
        }
    }

    for effect in ctx.feed(SessionInput::DwellElapsed) {
        if let SessionEffect::Navigate(route) = effect {
            return PageOutcome::Navigate(route);
        }
    }
    warn!(phase = ?ctx.session().phase(), "Completion page reached without a successful chant");
    PageOutcome::Navigate(Route::Menu)
}
