//! Messages exchanged between the order and inventory services.
//!
//! Producer and consumer may sit on different sides of a process restart, so
//! these are flat camelCase JSON structures with no derived or cached state.

use serde::{Deserialize, Serialize};

use crate::{ItemId, OrderId};

/// Queue carrying deferred fulfillment requests (order service → inventory worker).
pub const PENDING_WORK: &str = "pending-work";

/// Queue carrying fulfillment outcomes (inventory worker → order service).
pub const COMPLETION_EVENTS: &str = "completion-events";

/// A deferred fulfillment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: u32,
    /// Fault injection: stall the executor before applying the effect.
    #[serde(default)]
    pub injected_delay: bool,
}

impl WorkItem {
    pub fn new(order_id: OrderId, item_id: ItemId, quantity: u32, injected_delay: bool) -> Self {
        Self {
            order_id,
            item_id,
            quantity,
            injected_delay,
        }
    }
}

/// Body of the inventory service's fulfillment call.
///
/// Safe to send more than once for the same `order_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentRequest {
    pub order_id: OrderId,
    pub item_id: ItemId,
    pub quantity: u32,
    #[serde(default)]
    pub fault_flag: bool,
}

impl From<&WorkItem> for FulfillmentRequest {
    fn from(item: &WorkItem) -> Self {
        Self {
            order_id: item.order_id,
            item_id: item.item_id.clone(),
            quantity: item.quantity,
            fault_flag: item.injected_delay,
        }
    }
}

/// Whether a fulfillment call applied the effect or found it already applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FulfillmentStatus {
    Applied,
    AlreadyApplied,
}

/// Successful reply to a fulfillment call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentReply {
    pub order_id: OrderId,
    pub status: FulfillmentStatus,
}

/// Final result of a deferred fulfillment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Completed,
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Completed => "COMPLETED",
            Outcome::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion notification published once a work item has been processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionEvent {
    pub order_id: OrderId,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl CompletionEvent {
    /// The deferred effect has been applied (now or by an earlier attempt).
    pub fn completed(order_id: OrderId) -> Self {
        Self {
            order_id,
            outcome: Outcome::Completed,
            reason: None,
        }
    }

    /// The deferred effect could not be applied.
    pub fn failed(order_id: OrderId, reason: impl Into<String>) -> Self {
        Self {
            order_id,
            outcome: Outcome::Failed,
            reason: Some(reason.into()),
        }
    }
}
