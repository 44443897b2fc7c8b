//! `pending-work` consumer.

use async_trait::async_trait;
use common::{COMPLETION_EVENTS, CompletionEvent, FulfillmentRequest, WorkItem};
use queue::{Delivery, Disposition, MessageHandler, QueueHandle};

use crate::executor::FulfillmentExecutor;
use crate::store::InventoryStore;

/// Deliveries of one work item after which a store failure is reported as
/// `FAILED` instead of requeued.
pub const DEFAULT_MAX_DELIVERIES: u32 = 5;

/// Runs deferred fulfillments and reports each outcome on
/// `completion-events`.
///
/// A delivery is acknowledged only once its completion event is published.
/// Business failures are terminal and reported; store failures are retried
/// through redelivery until `max_deliveries`.
pub struct FulfillmentWorker<S> {
    executor: FulfillmentExecutor<S>,
    completions: QueueHandle,
    max_deliveries: u32,
}

impl<S> FulfillmentWorker<S>
where
    S: InventoryStore + Clone + 'static,
{
    pub fn new(executor: FulfillmentExecutor<S>, completions: QueueHandle) -> Self {
        Self {
            executor,
            completions,
            max_deliveries: DEFAULT_MAX_DELIVERIES,
        }
    }

    pub fn with_max_deliveries(mut self, max_deliveries: u32) -> Self {
        self.max_deliveries = max_deliveries.max(1);
        self
    }

    fn can_retry(&self, delivery: &Delivery) -> bool {
        delivery.attempt < self.max_deliveries
    }
}

#[async_trait]
impl<S> MessageHandler for FulfillmentWorker<S>
where
    S: InventoryStore + Clone + 'static,
{
    async fn handle(&self, delivery: &Delivery) -> Disposition {
        let item: WorkItem = match delivery.decode() {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(error = %e, tag = delivery.tag, "undecodable work item, rejecting");
                return Disposition::Reject;
            }
        };
        let order_id = item.order_id;

        let event = match self.executor.fulfill(&FulfillmentRequest::from(&item)).await {
            Ok(_) => CompletionEvent::completed(order_id),
            Err(e) if e.is_terminal() => CompletionEvent::failed(order_id, e.to_string()),
            Err(e) if self.can_retry(delivery) => {
                tracing::warn!(%order_id, attempt = delivery.attempt, error = %e, "fulfillment failed, requeueing");
                return Disposition::Requeue;
            }
            Err(e) => {
                tracing::error!(%order_id, attempt = delivery.attempt, error = %e, "fulfillment failed, giving up");
                CompletionEvent::failed(
                    order_id,
                    format!("gave up after {} deliveries: {e}", delivery.attempt),
                )
            }
        };

        match self.completions.publish(COMPLETION_EVENTS, &event).await {
            Ok(()) => {
                tracing::info!(%order_id, outcome = %event.outcome, "completion published");
                Disposition::Ack
            }
            Err(e) if self.can_retry(delivery) => {
                tracing::warn!(%order_id, error = %e, "failed to publish completion, requeueing");
                Disposition::Requeue
            }
            Err(e) => {
                tracing::error!(
                    %order_id,
                    attempt = delivery.attempt,
                    error = %e,
                    "failed to publish completion, dropping work item"
                );
                Disposition::Reject
            }
        }
    }
}
