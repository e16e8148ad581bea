//! Request and response bodies of the store API
//!
//! Every response field is optional on the wire and defaults when absent.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct MenuItem {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct MenuResponse {
    pub(super) menu: Vec<MenuItem>,
}

/// Body shared by order creation and chant generation
#[derive(Debug, Serialize)]
pub(super) struct MenuItemRequest<'a> {
    pub(super) menu_item_id: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub(crate) struct OrderResponse {
    pub(crate) id: String,
    pub(crate) menu_item_id: String,
    pub(crate) menu_name: String,
    /// `pending`, `waitingPickup` or `completed`
    pub(crate) status: String,
    pub(crate) order_number: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ChantResponse {
    pub(super) chant: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ErrorResponse {
    pub(super) error: String,
    pub(super) message: String,
}

impl ErrorResponse {
    /// Human-readable message from an error body, falling back to the raw text
    pub(super) fn describe(body: &str) -> String {
        match serde_json::from_str::<ErrorResponse>(body) {
            Ok(parsed) if !parsed.message.is_empty() => parsed.message,
            Ok(parsed) if !parsed.error.is_empty() => parsed.error,
            _ => body.trim().to_string(),
        }
    }
}
