//! Inventory error types.

use common::ItemId;
use thiserror::Error;

/// Errors raised by an inventory store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Errors that can occur while fulfilling an order.
#[derive(Debug, Error)]
pub enum FulfillmentError {
    /// The item does not have enough stock left.
    #[error(
        "Insufficient stock for item {item_id}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        item_id: ItemId,
        requested: u32,
        available: u32,
    },

    /// The item is not in the ledger.
    #[error("Item not found: {0}")]
    ItemNotFound(ItemId),

    /// Invalid quantity.
    #[error("Invalid quantity: {quantity} (must be greater than 0)")]
    InvalidQuantity { quantity: u32 },

    /// The store failed; the same request may succeed later.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl FulfillmentError {
    /// Returns true if retrying the same request cannot change the outcome.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FulfillmentError::Store(_))
    }
}
