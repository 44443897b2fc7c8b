//! `completion-events` consumer.

use async_trait::async_trait;
use common::CompletionEvent;
use queue::{Delivery, Disposition, MessageHandler};

use crate::client::FulfillmentClient;
use crate::error::OrderError;
use crate::manager::{CompletionOutcome, OrderLifecycleManager};
use crate::store::OrderStore;

/// Deliveries after which an unprocessable completion event is dropped.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Feeds completion events into the [`OrderLifecycleManager`].
pub struct CompletionHandler<S, C> {
    manager: OrderLifecycleManager<S, C>,
    max_deliveries: u32,
}

impl<S, C> CompletionHandler<S, C>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    pub fn new(manager: OrderLifecycleManager<S, C>) -> Self {
        Self {
            manager,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    fn retry_or_drop(&self, delivery: &Delivery, what: &str) -> Disposition {
        if delivery.attempt < self.max_deliveries {
            tracing::warn!(attempt = delivery.attempt, "{what}, requeueing");
            Disposition::Requeue
        } else {
            tracing::error!(attempt = delivery.attempt, "{what}, dropping completion event");
            Disposition::Reject
        }
    }
}

#[async_trait]
impl<S, C> MessageHandler for CompletionHandler<S, C>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let event: CompletionEvent = match delivery.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::error!(error = %e, tag = delivery.tag, "undecodable completion event, rejecting");
                return Disposition::Reject;
            }
        };

        match self.manager.apply_completion(&event).await {
            Ok(CompletionOutcome::Applied(_)) | Ok(CompletionOutcome::Ignored(_)) => {
                Disposition::Ack
            }
            // Work is only published once its order is QUEUED, so this is a
            // stray event; redelivered with backoff, then dropped.
            Ok(CompletionOutcome::NotQueued(order)) => {
                self.retry_or_drop(delivery, &format!("order {} is still {}", order.id, order.status))
            }
            Err(OrderError::NotFound(id)) => {
                tracing::warn!(order_id = %id, "completion for unknown order, discarding");
                Disposition::Ack
            }
            Err(e) => self.retry_or_drop(delivery, &format!("failed to apply completion: {e}")),
        }
    }
}
