//! Process-wide client state
//!
//! One typed record per concern. Writers go through `update_*`, which take a
//! transform of the previous value, so concurrent sources never overwrite
//! each other's fields.

use crate::api::MenuItem;
use crate::navigation::Route;
use crate::order::OrderRecord;
use crate::room::RoomSnapshot;
use crate::session::ChantMetrics;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

/// User-visible connection status line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) enum ConnectionBanner {
    #[default]
    Hidden,
    Connecting,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Stale,
    Lost,
}

/// Degraded-mode indicator for the capture pipelines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) enum MicStatus {
    #[default]
    Unknown,
    Granted,
    Denied,
    Unsupported,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AppState {
    pub(crate) route: Route,
    pub(crate) selected_menu: Option<MenuItem>,
    pub(crate) chant: ChantMetrics,
    pub(crate) room: RoomSnapshot,
    pub(crate) order: Option<OrderRecord>,
    pub(crate) banner: ConnectionBanner,
    pub(crate) mic: MicStatus,
    pub(crate) speech_available: bool,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            route: Route::Menu,
            selected_menu: None,
            chant: ChantMetrics::default(),
            room: RoomSnapshot::default(),
            order: None,
            banner: ConnectionBanner::Hidden,
            mic: MicStatus::Unknown,
            speech_available: false,
        }
    }
}

/// Shared handle to the client state
#[derive(Clone, Default)]
pub(crate) struct AppStore {
    inner: Arc<RwLock<AppState>>,
}

impl AppStore {
    pub(crate) fn new(speech_available: bool) -> Self {
        Self {
            inner: Arc::new(RwLock::new(AppState {
                speech_available,
                ..AppState::default()
            })),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, AppState> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppState> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Copy of the whole state
    pub(crate) fn snapshot(&self) -> AppState {
        self.read().clone()
    }

    /// Select a menu item and reset everything tied to the previous session
    pub(crate) fn begin_session(&self, menu_item: MenuItem) {
        let mut state = self.write();
        info!(menu_item = %menu_item.id, "Starting new chant session");
        state.selected_menu = Some(menu_item);
        state.chant = ChantMetrics::default();
        state.room = RoomSnapshot::default();
        state.order = None;
        state.banner = ConnectionBanner::Hidden;
        state.mic = MicStatus::Unknown;
    }

    pub(crate) fn set_route(&self, route: Route) {
        let mut state = self.write();
        if state.route != route {
            debug!(from = %state.route, to = %route, "Route change");
            state.route = route;
        }
    }

    /// Publish the chant session's metrics for rendering
    ///
    /// The chant session is the only writer of metrics; every change is a
    /// transform inside the session, and the store holds a read-only copy.
    pub(crate) fn mirror_chant(&self, metrics: &ChantMetrics) {
        let mut state = self.write();
        if state.chant != *metrics {
            state.chant = metrics.clone();
        }
    }

    pub(crate) fn update_room(&self, f: impl FnOnce(&RoomSnapshot) -> RoomSnapshot) -> RoomSnapshot {
        let mut state = self.write();
        state.room = f(&state.room);
        state.room.clone()
    }

    pub(crate) fn update_order(
        &self,
        f: impl FnOnce(Option<&OrderRecord>) -> Option<OrderRecord>,
    ) -> Option<OrderRecord> {
        let mut state = self.write();
        state.order = f(state.order.as_ref());
        state.order.clone()
    }

    pub(crate) fn update_banner(&self, f: impl FnOnce(&ConnectionBanner) -> ConnectionBanner) {
        let mut state = self.write();
        state.banner = f(&state.banner);
    }

    pub(crate) fn update_mic(&self, f: impl FnOnce(MicStatus) -> MicStatus) {
        let mut state = self.write();
        state.mic = f(state.mic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::PresenceMessage;

    fn menu_item(id: &str) -> MenuItem {
        MenuItem {
            id: id.into(),
            name: "Shaved ice".into(),
            description: String::new(),
        }
    }

    #[test]
    fn test_begin_session_resets_session_fields() {
        let store = AppStore::new(true);
        store.begin_session(menu_item("giiku-sai"));
        store.mirror_chant(&ChantMetrics::default().with_sample(0.9));
        store.update_order(|_| Some(OrderRecord::new(1)));
        store.update_mic(|_| MicStatus::Denied);
        store.set_route(Route::Pickup);

        store.begin_session(menu_item("giiku-haku"));
        let state = store.snapshot();
        assert_eq!(state.selected_menu.map(|m| m.id).as_deref(), Some("giiku-haku"));
        assert_eq!(state.chant, ChantMetrics::default());
        assert_eq!(state.order, None);
        assert_eq!(state.mic, MicStatus::Unknown);
        assert_eq!(state.route, Route::Pickup);
        assert!(state.speech_available);
    }

    #[test]
    fn test_updates_compose_on_previous_value() {
        let store = AppStore::default();
        store.update_order(|_| Some(OrderRecord::new(1)));
        store.update_order(|o| o.map(|o| o.record_poll(3)));
        store.update_order(|o| o.map(|o| o.with_server_status(Some("pending".into()))));
        let order = store.update_order(|o| o.map(|o| o.record_poll(3))).unwrap();

        assert_eq!(order.polls, 2);
        assert_eq!(order.server_status.as_deref(), Some("pending"));
    }

    #[test]
    fn test_chant_mirror_tracks_session_copy() {
        let store = AppStore::default();
        let metrics = ChantMetrics::default()
            .with_sample(0.4)
            .with_transcript("ラーメン".into());
        store.mirror_chant(&metrics);
        assert_eq!(store.snapshot().chant, metrics);

        // A retry window starts from the session's reset copy, not the stale one
        let reset = metrics.reset_window();
        store.mirror_chant(&reset);
        let chant = store.snapshot().chant;
        assert!(chant.history.is_empty());
        assert_eq!(chant.max_volume, 0.4);
    }

    #[test]
    fn test_update_room_returns_new_snapshot() {
        let store = AppStore::default();
        let message = PresenceMessage {
            stay_num: Some(2),
            start_time: None,
        };
        let room = store.update_room(|r| r.apply(&message, 3));
        assert_eq!(room.occupant_count, 2);
        assert_eq!(store.snapshot().room, room);
    }

    #[test]
    fn test_clones_share_state() {
        let store = AppStore::default();
        let other = store.clone();
        other.update_banner(|_| ConnectionBanner::Stale);
        assert_eq!(store.snapshot().banner, ConnectionBanner::Stale);
    }
}
