use async_trait::async_trait;
use common::{ItemId, OrderId};

use crate::StoreError;
use crate::model::{IdempotencyRecord, StockItem};

/// Result of the atomic reserve-and-record unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Stock was decremented and the record written, together.
    Applied(IdempotencyRecord),
    /// A record for the order already existed; nothing was changed.
    AlreadyApplied(IdempotencyRecord),
    /// Not enough stock; nothing was changed.
    InsufficientStock { available: u32 },
    /// The item is not in the ledger; nothing was changed.
    ItemNotFound,
}

/// Per-item stock quantities.
#[async_trait]
pub trait StockLedger: Send + Sync {
    /// Retrieves one item.
    async fn get_item(&self, item_id: &ItemId) -> Result<Option<StockItem>, StoreError>;

    /// Retrieves all items, ordered by id.
    async fn list_items(&self) -> Result<Vec<StockItem>, StoreError>;

    /// Seeds or restocks an item to an absolute quantity.
    async fn set_quantity(&self, item_id: &ItemId, quantity: u32) -> Result<StockItem, StoreError>;
}

/// Which orders have had their fulfillment effect applied.
#[async_trait]
pub trait IdempotencyRegister: Send + Sync {
    /// Returns the record for the order, if the effect has been applied.
    async fn find_record(&self, order_id: OrderId)
    -> Result<Option<IdempotencyRecord>, StoreError>;
}

/// A store holding both the ledger and the register, able to change them in
/// one atomic unit.
///
/// Implementations must guarantee:
/// - `reserve_once` either decrements stock *and* writes the record, or does
///   neither
/// - concurrent calls for the same order apply the effect at most once
/// - concurrent calls for different orders on the same item never lose an
///   update or drive the quantity negative
#[async_trait]
pub trait InventoryStore: StockLedger + IdempotencyRegister {
    /// Reserves `quantity` units of the item for the order unless the order
    /// has already been fulfilled.
    async fn reserve_once(
        &self,
        order_id: OrderId,
        item_id: &ItemId,
        quantity: u32,
    ) -> Result<ReserveOutcome, StoreError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;
}
