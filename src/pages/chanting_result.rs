//! Failed chant: show how close it was and offer a retry

use super::{PageContext, PageOutcome};
use crate::display;
use crate::input::UserCommand;
use crate::session::{SessionEffect, SessionInput};

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let chant = ctx.store.snapshot().chant;
    display::heading("Not loud enough");
    display::line(&format!(
        "Your peak volume: {:.2} (average needed: {:.2})",
        chant.max_volume, ctx.config.chant.volume_threshold
    ));
    display::line("Press r to try again, q to quit.");

    loop {
        match ctx.input.recv().await {
            None | Some(UserCommand::Quit) => return PageOutcome::Quit,
            Some(UserCommand::Retry) => {
                for effect in ctx.feed(SessionInput::Retry) {
                    if let SessionEffect::Navigate(route) = effect {
                        return PageOutcome::Navigate(route);
                    }
                }
            }
            Some(_) => {}
        }
    }
}
