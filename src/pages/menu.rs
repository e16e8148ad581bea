//! Menu selection

use super::{PageContext, PageOutcome};
use crate::api::MenuItem;
use crate::display;
use crate::error::ApiError;
use crate::input::UserCommand;
use crate::navigation::Route;
use tokio::task::{JoinError, JoinHandle};
use tracing::{info, warn};

type MenuFetch = JoinHandle<Result<Vec<MenuItem>, ApiError>>;

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let mut items = Vec::new();
    let mut fetch = request_menu(ctx);
    let mut loading = true;

    let outcome = loop {
        tokio::select! {
            result = &mut fetch, if loading => {
                loading = false;
                items = show(result);
            }
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => break PageOutcome::Quit,
                Some(UserCommand::Retry) if !loading => {
                    fetch = request_menu(ctx);
                    loading = true;
                }
                Some(UserCommand::Select(position)) => {
                    match position.checked_sub(1).and_then(|i| items.get(i)).cloned() {
                        Some(item) => {
                            info!(menu_item = %item.id, "Menu item selected");
                            ctx.begin_session(item);
                            break PageOutcome::Navigate(Route::OrderLoading);
                        }
                        None if loading => display::line("Still loading the menu..."),
                        None => display::line(&format!("No item {}, pick 1-{}", position, items.len())),
                    }
                }
                Some(_) => {}
            },
        }
    };

    if loading {
        fetch.abort();
    }
    outcome
}

fn request_menu(ctx: &PageContext) -> MenuFetch {
    display::heading("Menu");
    display::line("Loading...");
    let api = ctx.api.clone();
    tokio::spawn(async move { api.menu().await })
}

fn show(result: Result<Result<Vec<MenuItem>, ApiError>, JoinError>) -> Vec<MenuItem> {
    let items = match result {
        Ok(Ok(items)) => items,
        Ok(Err(e)) => {
            warn!(error = %e, "Failed to load menu");
            display::line(&format!("Could not load the menu: {}", e));
            Vec::new()
        }
        Err(e) => {
            warn!(error = %e, "Menu fetch task failed");
            Vec::new()
        }
    };

    if items.is_empty() {
        display::line("Nothing on the menu. Press r to reload, q to quit.");
        return items;
    }
    for (i, item) in items.iter().enumerate() {
        if item.description.is_empty() {
            display::line(&format!("  {}. {}", i + 1, item.name));
        } else {
            display::line(&format!("  {}. {} - {}", i + 1, item.name, item.description));
        }
    }
    display::line("Type a number to order, r to reload, q to quit.");
    items
}
