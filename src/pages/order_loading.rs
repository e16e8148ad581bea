use super::{PageContext, PageOutcome};
use crate::display;
use crate::input::UserCommand;
use crate::navigation::Route;
use std::time::Duration;

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let name = ctx
        .store
        .snapshot()
        .selected_menu
        .map(|item| item.name)
        .unwrap_or_default();
    display::heading("Ordering");
    display::line(&format!("Placing your order for {}...", name));

    let dwell = tokio::time::sleep(Duration::from_secs(ctx.config.order.loading_dwell_secs));
    tokio::pin!(dwell);

    loop {
        tokio::select! {
            _ = &mut dwell => return PageOutcome::Navigate(Route::Error),
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => return PageOutcome::Quit,
                Some(_) => {}
            },
        }
    }
}
