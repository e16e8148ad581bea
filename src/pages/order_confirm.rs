//! Order confirmation and status polling

use super::{PageContext, PageOutcome};
use crate::display::{self, StatusLine};
use crate::input::UserCommand;
use crate::navigation::Route;
use crate::order::OrderRecord;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, timeout, Instant, MissedTickBehavior};
use tracing::{info, warn};

#[tracing::instrument(skip(ctx))]
pub(crate) async fn run(ctx: &mut PageContext) -> PageOutcome {
    let Some(menu_item) = ctx.store.snapshot().selected_menu else {
        return PageOutcome::Navigate(Route::Menu);
    };

    let record = OrderRecord::new(Utc::now().timestamp_millis());
    info!(order_id = %record.order_id, menu_item = %menu_item.id, "Order confirmed");
    ctx.store.update_order(|_| Some(record.clone()));

    display::heading("Order confirmed");
    display::line(&format!("Item: {}", menu_item.name));
    display::line(&format!("Order number: {}", record.order_id));

    // Submission is best-effort; polling proceeds without a server id
    let api = ctx.api.clone();
    let item_id = menu_item.id.clone();
    let mut submit = tokio::spawn(async move { api.create_order(&item_id).await });
    let mut submitted = false;

    let period = Duration::from_secs(ctx.config.order.poll_interval_secs);
    let mut polls = interval_at(Instant::now() + period, period);
    polls.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let (status_tx, mut statuses) = mpsc::unbounded_channel();
    let mut fetching = false;
    let mut status = StatusLine::default();

    let outcome = loop {
        if let Some(order) = ctx.store.snapshot().order {
            status.show(format!(
                "{} | checked {}/{}",
                order.status, order.polls, ctx.config.order.polls_until_ready
            ));
            if order.is_ready() {
                break PageOutcome::Navigate(Route::Pickup);
            }
        }

        tokio::select! {
            result = &mut submit, if !submitted => {
                submitted = true;
                match result {
                    Ok(Ok(response)) => {
                        ctx.store
                            .update_order(|order| order.map(|o| o.with_server_id(Some(response.id))));
                    }
                    Ok(Err(e)) => warn!(error = %e, "Order submission failed, continuing locally"),
                    Err(e) => warn!(error = %e, "Order submission task failed"),
                }
            }
            _ = polls.tick() => {
                let required = ctx.config.order.polls_until_ready;
                let order = ctx.store.update_order(|order| order.map(|o| o.record_poll(required)));
                if let Some(server_id) = order.and_then(|o| o.server_id) {
                    if !fetching {
                        fetching = true;
                        spawn_status_fetch(ctx, server_id, period, status_tx.clone());
                    }
                }
            }
            Some(server_status) = statuses.recv() => {
                fetching = false;
                ctx.store
                    .update_order(|order| order.map(|o| o.with_server_status(server_status)));
            }
            command = ctx.input.recv() => match command {
                None | Some(UserCommand::Quit) => break PageOutcome::Quit,
                Some(_) => {}
            },
        }
    };

    if !submitted {
        submit.abort();
    }
    status.finish();
    outcome
}

/// Ask the store API for the order's status, giving up after `limit`
fn spawn_status_fetch(
    ctx: &PageContext,
    server_id: String,
    limit: Duration,
    tx: mpsc::UnboundedSender<Option<String>>,
) {
    let api = ctx.api.clone();
    tokio::spawn(async move {
        let server_status = match timeout(limit, api.get_order(&server_id)).await {
            Ok(Ok(order)) => Some(order.status),
            Ok(Err(e)) => {
                warn!(error = %e, order_id = %server_id, "Order status poll failed");
                None
            }
            Err(_) => {
                warn!(order_id = %server_id, "Order status poll timed out");
                None
            }
        };
        let _ = tx.send(server_status);
    });
}
