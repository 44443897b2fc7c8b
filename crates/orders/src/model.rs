//! Order record.

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

use crate::state::OrderStatus;

/// An order as seen by pollers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new `PENDING` order with a fresh id.
    pub fn new(item_id: ItemId, quantity: u32) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            item_id,
            quantity,
            status: OrderStatus::Pending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
