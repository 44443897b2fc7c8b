//! Stock ledger and idempotency register records.

use chrono::{DateTime, Utc};
use common::{ItemId, OrderId};
use serde::{Deserialize, Serialize};

/// Current stock of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockItem {
    pub id: ItemId,
    pub available_quantity: u32,
    pub updated_at: DateTime<Utc>,
}

/// Proof that the fulfillment effect for an order has been applied.
///
/// Written in the same atomic unit as the stock decrement and never changed
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: u32,
    pub applied_at: DateTime<Utc>,
}
