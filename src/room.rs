//! Room occupancy and countdown anchor

use crate::channel::PresenceMessage;
use chrono::{DateTime, FixedOffset, Utc};
use tracing::{debug, warn};

/// What the client knows about its waiting room
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RoomSnapshot {
    pub(crate) occupant_count: u32,
    pub(crate) scheduled_start: Option<DateTime<FixedOffset>>,
}

impl RoomSnapshot {
    /// Once a start time is known the room is locked for the countdown
    pub(crate) fn is_locked(&self) -> bool {
        self.scheduled_start.is_some()
    }

    /// Fold one presence push into the snapshot
    ///
    /// A locked snapshot ignores every later update. A start time forces the
    /// occupant count to `required_peers`.
    pub(crate) fn apply(&self, message: &PresenceMessage, required_peers: u32) -> RoomSnapshot {
        if self.is_locked() {
            debug!("Room locked, ignoring presence update");
            return self.clone();
        }

        if let Some(raw) = message.start_time.as_deref() {
            match DateTime::parse_from_rfc3339(raw) {
                Ok(start) => {
                    return RoomSnapshot {
                        occupant_count: required_peers,
                        scheduled_start: Some(start),
                    };
                }
                Err(e) => warn!(start_time = raw, error = %e, "Ignoring unparseable start time"),
            }
        }

        match message.stay_num {
            Some(count) => RoomSnapshot {
                occupant_count: count,
                scheduled_start: None,
            },
            None => self.clone(),
        }
    }
}

/// Whole seconds until `start`, never negative
pub(crate) fn countdown_seconds(start: &DateTime<FixedOffset>, now: &DateTime<Utc>) -> u64 {
    let millis = start.signed_duration_since(*now).num_milliseconds();
    millis.div_euclid(1000).max(0) as u64
}
