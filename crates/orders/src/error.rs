//! Order error types.

use common::OrderId;
use thiserror::Error;

use crate::model::Order;
use crate::state::OrderStatus;

/// Errors raised by an order store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A stored row could not be read back.
    #[error("Corrupt order row: {0}")]
    Corrupt(String),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while reading or changing orders.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The input was rejected before any order was created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No order exists with the id.
    #[error("Order not found: {0}")]
    NotFound(OrderId),

    /// The order's current status does not allow the transition.
    #[error("Invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// The store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Why a placement ended in `FAILED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The inventory service had too little stock.
    InsufficientStock,
    /// The inventory service does not know the item.
    ItemNotFound,
    /// The inventory service rejected the request as malformed.
    InvalidRequest,
    /// The deadline passed and the work queue could not take the request.
    QueueUnavailable,
    /// The inventory service call failed for any other reason.
    Downstream,
}

/// Errors returned by order placement.
#[derive(Debug, Error)]
pub enum PlacementError {
    /// The input was rejected; no order was created.
    #[error("Validation error: {0}")]
    Validation(String),

    /// The order was created and is now `FAILED`.
    #[error("Order {} failed: {}", order.id, order.failure_reason.as_deref().unwrap_or("unknown"))]
    Failed { order: Box<Order>, kind: FailureKind },

    /// The order could not be recorded or updated.
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Errors from a fulfillment call to the inventory service.
#[derive(Debug, Error)]
pub enum CallError {
    /// The inventory service answered and refused the request.
    #[error("{reason}")]
    Rejected { kind: FailureKind, reason: String },

    /// The call did not produce an answer.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl CallError {
    pub fn kind(&self) -> FailureKind {
        match self {
            CallError::Rejected { kind, .. } => *kind,
            CallError::Transport(_) => FailureKind::Downstream,
        }
    }
}
