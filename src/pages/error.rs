//! The staged "venue too cold" refusal that leads into the waiting room

use super::{PageContext, PageOutcome};
use crate::display;
use crate::input::UserCommand;
use crate::navigation::Route;
use std::time::Duration;

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    display::heading("Order refused");
    display::line("The venue is too cold for shaved ice.");
    display::line("Warm it up: gather in the waiting room and chant together!");

    let dwell = tokio::time::sleep(Duration::from_secs(ctx.config.order.error_dwell_secs));
    tokio::pin!(dwell);

    loop {
        tokio::select! {
            _ = &mut dwell => return PageOutcome::Navigate(Route::WaitingRoom),
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => return PageOutcome::Quit,
                Some(_) => {}
            },
        }
    }
}
