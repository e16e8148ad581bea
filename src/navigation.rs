//! Logical routes and their shared-state preconditions

use crate::store::AppState;
use std::fmt;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Route {
    Menu,
    OrderLoading,
    Error,
    WaitingRoom,
    Chanting,
    ChantingComplete,
    ChantingResult,
    OrderConfirm,
    Pickup,
}

impl Route {
    pub(crate) fn path(&self) -> &'static str {
        match self {
            Route::Menu => "/",
            Route::OrderLoading => "/order/loading",
            Route::Error => "/order/error",
            Route::WaitingRoom => "/waiting",
            Route::Chanting => "/chanting",
            Route::ChantingComplete => "/chanting/complete",
            Route::ChantingResult => "/chanting/result",
            Route::OrderConfirm => "/order/confirm",
            Route::Pickup => "/pickup",
        }
    }

    fn needs_menu(&self) -> bool {
        matches!(
            self,
            Route::WaitingRoom
                | Route::Chanting
                | Route::ChantingComplete
                | Route::ChantingResult
                | Route::OrderConfirm
                | Route::Pickup
        )
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Route to actually render for a navigation request
///
/// A route whose preconditions are not met redirects to the menu.
pub(crate) fn resolve(requested: Route, state: &AppState) -> Route {
    if requested.needs_menu() && state.selected_menu.is_none() {
        warn!(route = %requested, "No menu item selected, redirecting to menu");
        return Route::Menu;
    }
    if requested == Route::Pickup && state.order.is_none() {
        warn!(route = %requested, "No order on record, redirecting to menu");
        return Route::Menu;
    }
    requested
}
