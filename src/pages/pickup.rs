use super::{PageContext, PageOutcome};
use crate::display;
use crate::input::UserCommand;
use crate::navigation::Route;

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let state = ctx.store.snapshot();
    display::heading("Ready for pickup");
    if let Some(order) = &state.order {
        display::line(&format!("Order number: {}", order.order_id));
    }
    if let Some(item) = &state.selected_menu {
        display::line(&format!("Item: {}", item.name));
    }
    display::line("Press Enter to return to the menu, q to quit.");

    loop {
        match ctx.input.recv().await {
            None | Some(UserCommand::Quit) => return PageOutcome::Quit,
            Some(UserCommand::Toggle) => return PageOutcome::Navigate(Route::Menu),
            Some(_) => {}
        }
    }
}
