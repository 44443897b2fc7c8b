//! Order lifecycle manager.

use std::sync::Arc;
use std::time::Duration;

use common::{
    CompletionEvent, FulfillmentRequest, ItemId, OrderId, Outcome, PENDING_WORK, WorkItem,
};
use queue::QueueHandle;

use crate::client::FulfillmentClient;
use crate::error::{CallError, FailureKind, OrderError, PlacementError};
use crate::model::Order;
use crate::state::OrderStatus;
use crate::store::OrderStore;

/// How long placement waits for the synchronous fulfillment call.
pub const DEFAULT_FULFILLMENT_DEADLINE: Duration = Duration::from_secs(2);

/// Input to [`OrderLifecycleManager::place_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaceOrder {
    pub item_id: ItemId,
    pub quantity: u32,
    pub fault_flag: bool,
}

impl PlaceOrder {
    pub fn new(item_id: impl Into<ItemId>, quantity: u32) -> Self {
        Self {
            item_id: item_id.into(),
            quantity,
            fault_flag: false,
        }
    }

    pub fn with_fault_flag(mut self, fault_flag: bool) -> Self {
        self.fault_flag = fault_flag;
        self
    }

    fn validate(&self) -> Result<(), PlacementError> {
        if self.item_id.is_blank() {
            return Err(PlacementError::Validation("itemId must not be empty".to_string()));
        }
        if self.quantity == 0 {
            return Err(PlacementError::Validation(
                "quantity must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Successful placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placement {
    /// Fulfilled within the deadline.
    Confirmed(Order),
    /// Deferred to the work queue; completion arrives asynchronously.
    Queued(Order),
}

impl Placement {
    pub fn order(&self) -> &Order {
        match self {
            Placement::Confirmed(order) | Placement::Queued(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Placement::Confirmed(order) | Placement::Queued(order) => order,
        }
    }
}

/// Result of applying a completion event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The order moved out of `QUEUED`.
    Applied(Order),
    /// The order was already terminal; nothing changed.
    Ignored(Order),
    /// The order has not reached `QUEUED` yet; retry later.
    NotQueued(Order),
}

/// Owns the order state machine.
///
/// Placement creates the order, calls the inventory service through a
/// deadline, and falls back to the work queue only when the deadline passes.
/// Completion events close out queued orders. Every status change goes
/// through [`OrderStore::transition`], so the request path and the
/// completion consumer can never both move the same order.
pub struct OrderLifecycleManager<S, C> {
    store: S,
    client: Arc<C>,
    queue: QueueHandle,
    deadline: Duration,
}

impl<S: Clone, C> Clone for OrderLifecycleManager<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            client: Arc::clone(&self.client),
            queue: self.queue.clone(),
            deadline: self.deadline,
        }
    }
}

impl<S, C> OrderLifecycleManager<S, C>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    /// Creates a manager with the default 2 s deadline.
    pub fn new(store: S, client: C, queue: QueueHandle) -> Self {
        Self {
            store,
            client: Arc::new(client),
            queue,
            deadline: DEFAULT_FULFILLMENT_DEADLINE,
        }
    }

    /// Overrides the synchronous call deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Places an order.
    ///
    /// Returns within roughly the deadline plus one queue publish. Only an
    /// exceeded deadline falls back to the queue; any other failure of the
    /// call is terminal.
    #[tracing::instrument(
        skip(self, command),
        fields(item_id = %command.item_id, quantity = command.quantity, fault = command.fault_flag, order_id)
    )]
    pub async fn place_order(&self, command: PlaceOrder) -> Result<Placement, PlacementError> {
        command.validate()?;

        let order = Order::new(command.item_id.clone(), command.quantity);
        let order_id = order.id;
        tracing::Span::current().record("order_id", tracing::field::display(order_id));
        self.store.insert(order).await?;

        let request = FulfillmentRequest {
            order_id,
            item_id: command.item_id.clone(),
            quantity: command.quantity,
            fault_flag: command.fault_flag,
        };

        // The call runs on its own task so that giving up on it here does not
        // cancel it.
        let client = Arc::clone(&self.client);
        let call = tokio::spawn(async move { client.fulfill(&request).await });

        let result = match tokio::time::timeout(self.deadline, call).await {
            Ok(Ok(Ok(reply))) => {
                tracing::info!(status = ?reply.status, "fulfilled within deadline");
                let order = self
                    .store
                    .transition(order_id, OrderStatus::Confirmed, None)
                    .await?;
                Ok(Placement::Confirmed(order))
            }
            Ok(Ok(Err(e))) => self.fail(order_id, e.kind(), e.to_string()).await,
            Ok(Err(join_error)) => {
                let e = CallError::Transport(format!("fulfillment call aborted: {join_error}"));
                self.fail(order_id, e.kind(), e.to_string()).await
            }
            Err(_) => self.defer(order_id, &command).await,
        };

        let outcome = match &result {
            Ok(Placement::Confirmed(_)) => "confirmed",
            Ok(Placement::Queued(_)) => "queued",
            Err(PlacementError::Failed { .. }) => "failed",
            Err(_) => "error",
        };
        metrics::counter!("orders_placed_total", "outcome" => outcome).increment(1);
        result
    }

    async fn defer(
        &self,
        order_id: OrderId,
        command: &PlaceOrder,
    ) -> Result<Placement, PlacementError> {
        tracing::info!(
            deadline_ms = self.deadline.as_millis() as u64,
            "deadline exceeded, deferring to work queue"
        );
        // QUEUED is written before the work item is published; a failed
        // write publishes nothing.
        let queued = self
            .store
            .transition(order_id, OrderStatus::Queued, None)
            .await?;

        let work = WorkItem::new(
            order_id,
            command.item_id.clone(),
            command.quantity,
            command.fault_flag,
        );

        match self.queue.publish(PENDING_WORK, &work).await {
            Ok(()) => Ok(Placement::Queued(queued)),
            Err(e) => {
                tracing::error!(error = %e, "work queue unavailable");
                self.fail(
                    order_id,
                    FailureKind::QueueUnavailable,
                    format!("Work queue unavailable: {e}"),
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        order_id: OrderId,
        kind: FailureKind,
        reason: String,
    ) -> Result<Placement, PlacementError> {
        tracing::warn!(?kind, %reason, "order failed");
        let order = self
            .store
            .transition(order_id, OrderStatus::Failed, Some(reason))
            .await?;
        Err(PlacementError::Failed {
            order: Box::new(order),
            kind,
        })
    }

    /// Applies a completion event to a queued order.
    ///
    /// Terminal orders are left as they are, so a redelivered event is a
    /// no-op.
    #[tracing::instrument(skip(self, event), fields(order_id = %event.order_id, outcome = %event.outcome))]
    pub async fn apply_completion(
        &self,
        event: &CompletionEvent,
    ) -> Result<CompletionOutcome, OrderError> {
        let order = self
            .store
            .get(event.order_id)
            .await?
            .ok_or(OrderError::NotFound(event.order_id))?;

        if order.is_terminal() {
            tracing::debug!(status = %order.status, "order already terminal, ignoring completion");
            return Ok(CompletionOutcome::Ignored(order));
        }
        if order.status != OrderStatus::Queued {
            return Ok(CompletionOutcome::NotQueued(order));
        }

        let (to, reason) = match event.outcome {
            Outcome::Completed => (OrderStatus::Completed, None),
            Outcome::Failed => (
                OrderStatus::Failed,
                Some(
                    event
                        .reason
                        .clone()
                        .unwrap_or_else(|| "Deferred fulfillment failed".to_string()),
                ),
            ),
        };

        match self.store.transition(event.order_id, to, reason).await {
            Ok(order) => {
                tracing::info!(status = %order.status, "completion applied");
                Ok(CompletionOutcome::Applied(order))
            }
            // Lost a race with another writer; whoever won made it terminal.
            Err(OrderError::InvalidTransition { .. }) => {
                let current = self
                    .store
                    .get(event.order_id)
                    .await?
                    .ok_or(OrderError::NotFound(event.order_id))?;
                Ok(CompletionOutcome::Ignored(current))
            }
            Err(e) => Err(e),
        }
    }

    /// Retrieves one order.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.store.get(id).await?.ok_or(OrderError::NotFound(id))
    }

    /// Retrieves all orders, oldest first.
    pub async fn list_orders(&self) -> Result<Vec<Order>, OrderError> {
        self.store.list().await
    }

    /// Checks that the order store is reachable.
    pub async fn ping(&self) -> Result<(), OrderError> {
        self.store.ping().await
    }
}
