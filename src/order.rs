//! Local order record shown on the confirmation and pickup pages

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrderStatus {
    Preparing,
    Ready,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::Preparing => write!(f, "preparing"),
            OrderStatus::Ready => write!(f, "ready"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OrderRecord {
    /// Locally generated id shown to the attendee
    pub(crate) order_id: String,
    pub(crate) status: OrderStatus,
    /// Id assigned by the store API, when the order was submitted
    pub(crate) server_id: Option<String>,
    /// Last status the store API reported
    pub(crate) server_status: Option<String>,
    pub(crate) polls: u32,
}

impl OrderRecord {
    /// New record with an id derived from the wall clock in milliseconds
    pub(crate) fn new(created_at_millis: i64) -> Self {
        Self {
            order_id: format!("ORDER-{}", created_at_millis),
            status: OrderStatus::Preparing,
            server_id: None,
            server_status: None,
            polls: 0,
        }
    }

    pub(crate) fn with_server_id(&self, server_id: Option<String>) -> Self {
        Self {
            server_id: server_id.filter(|id| !id.is_empty()),
            ..self.clone()
        }
    }

    /// Count one confirmation poll; the order becomes ready once
    /// `polls_until_ready` polls have completed
    pub(crate) fn record_poll(&self, polls_until_ready: u32) -> Self {
        let polls = self.polls.saturating_add(1);
        let status = if polls >= polls_until_ready {
            OrderStatus::Ready
        } else {
            self.status
        };
        Self {
            polls,
            status,
            ..self.clone()
        }
    }

    /// Remember what the store API last reported; informational only
    pub(crate) fn with_server_status(&self, server_status: Option<String>) -> Self {
        Self {
            server_status: server_status
                .filter(|s| !s.is_empty())
                .or_else(|| self.server_status.clone()),
            ..self.clone()
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.status == OrderStatus::Ready
    }
}
