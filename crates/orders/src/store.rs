use async_trait::async_trait;
use common::OrderId;

use crate::error::OrderError;
use crate::model::Order;
use crate::state::OrderStatus;

/// Persistence for orders.
///
/// Every status change goes through [`OrderStore::transition`], which checks
/// the precondition and applies the change as one step: of two racing
/// transitions out of the same state, exactly one succeeds.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order.
    async fn insert(&self, order: Order) -> Result<(), OrderError>;

    /// Retrieves one order.
    async fn get(&self, id: OrderId) -> Result<Option<Order>, OrderError>;

    /// Retrieves all orders, oldest first.
    async fn list(&self) -> Result<Vec<Order>, OrderError>;

    /// Moves the order to `to` if its current status allows it.
    ///
    /// Fails with `NotFound` or `InvalidTransition`; in the latter case the
    /// order is unchanged. `failure_reason` is recorded when given.
    async fn transition(
        &self,
        id: OrderId,
        to: OrderStatus,
        failure_reason: Option<String>,
    ) -> Result<Order, OrderError>;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), OrderError>;
}
