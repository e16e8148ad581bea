//! Route loop
//!
//! Resolves each requested route against the store, runs its page until the
//! page asks for another route, and repeats until the user quits.

use crate::navigation::{self, Route};
use crate::pages::{self, PageContext, PageOutcome};
use tracing::info;

pub(crate) struct App {
    ctx: PageContext,
}

impl App {
    pub(crate) fn new(ctx: PageContext) -> Self {
        Self { ctx }
    }

    pub(crate) async fn run(mut self) {
        let mut requested = Route::Menu;

        loop {
            let route = navigation::resolve(requested, &self.ctx.store.snapshot());
            self.ctx.store.set_route(route);

            let outcome = match route {
                Route::Menu => pages::menu::run(&mut self.ctx).await,
                Route::OrderLoading => pages::order_loading::run(&mut self.ctx).await,
                Route::Error => pages::error::run(&mut self.ctx).await,
                Route::WaitingRoom => pages::waiting_room::run(&mut self.ctx).await,
                Route::Chanting => pages::chanting::run(&mut self.ctx).await,
                Route::ChantingComplete => pages::chanting_complete::run(&mut self.ctx).await,
                Route::ChantingResult => pages::chanting_result::run(&mut self.ctx).await,
                Route::OrderConfirm => pages::order_confirm::run(&mut self.ctx).await,
                Route::Pickup => pages::pickup::run(&mut self.ctx).await,
            };

            match outcome {
                PageOutcome::Navigate(next) => requested = next,
                PageOutcome::Quit => {
                    info!(route = %route, "Quit requested");
                    break;
                }
            }
        }
    }
}
