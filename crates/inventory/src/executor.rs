//! Fulfillment executor.

use std::time::{Duration, Instant};

use common::{FulfillmentRequest, FulfillmentStatus};
use tokio::task::JoinHandle;

use crate::error::FulfillmentError;
use crate::model::IdempotencyRecord;
use crate::store::{InventoryStore, ReserveOutcome};

/// How long a request carrying the fault flag stalls before proceeding.
pub const DEFAULT_FAULT_DELAY: Duration = Duration::from_secs(5);

/// Successful result of a fulfillment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// This call decremented stock and wrote the record.
    Applied(IdempotencyRecord),
    /// An earlier call already did; nothing changed.
    AlreadyApplied(IdempotencyRecord),
}

impl FulfillmentOutcome {
    pub fn status(&self) -> FulfillmentStatus {
        match self {
            FulfillmentOutcome::Applied(_) => FulfillmentStatus::Applied,
            FulfillmentOutcome::AlreadyApplied(_) => FulfillmentStatus::AlreadyApplied,
        }
    }

    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            FulfillmentOutcome::Applied(r) | FulfillmentOutcome::AlreadyApplied(r) => r,
        }
    }
}

/// Applies the fulfillment effect of an order at most once.
///
/// The same executor backs the synchronous `/fulfill` call and the
/// `pending-work` consumer, so both paths share one idempotency register.
#[derive(Clone)]
pub struct FulfillmentExecutor<S> {
    store: S,
    fault_delay: Duration,
}

impl<S> FulfillmentExecutor<S>
where
    S: InventoryStore + Clone + 'static,
{
    /// Creates an executor over the store with the default fault delay.
    pub fn new(store: S) -> Self {
        Self {
            store,
            fault_delay: DEFAULT_FAULT_DELAY,
        }
    }

    /// Overrides the fault-injection delay.
    pub fn with_fault_delay(mut self, delay: Duration) -> Self {
        self.fault_delay = delay;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Fulfills the request.
    ///
    /// A register hit short-circuits without touching the ledger. Otherwise
    /// the store's atomic unit re-checks the register, reserves stock and
    /// writes the record together.
    #[tracing::instrument(
        skip(self, request),
        fields(order_id = %request.order_id, item_id = %request.item_id, quantity = request.quantity)
    )]
    pub async fn fulfill(
        &self,
        request: &FulfillmentRequest,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        let started = Instant::now();
        let result = self.execute(request).await;

        let label = match &result {
            Ok(FulfillmentOutcome::Applied(_)) => "applied",
            Ok(FulfillmentOutcome::AlreadyApplied(_)) => "already_applied",
            Err(FulfillmentError::InsufficientStock { .. }) => "insufficient_stock",
            Err(FulfillmentError::ItemNotFound(_)) => "item_not_found",
            Err(FulfillmentError::InvalidQuantity { .. }) => "invalid_quantity",
            Err(FulfillmentError::Store(_)) => "store_error",
        };
        metrics::counter!("fulfillments_total", "result" => label).increment(1);
        metrics::histogram!("fulfillment_duration_seconds")
            .record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => tracing::info!(status = ?outcome.status(), "fulfillment finished"),
            Err(e) if e.is_terminal() => tracing::info!(error = %e, "fulfillment rejected"),
            Err(e) => tracing::warn!(error = %e, "fulfillment failed"),
        }

        result
    }

    async fn execute(
        &self,
        request: &FulfillmentRequest,
    ) -> Result<FulfillmentOutcome, FulfillmentError> {
        if request.quantity == 0 {
            return Err(FulfillmentError::InvalidQuantity {
                quantity: request.quantity,
            });
        }

        if request.fault_flag {
            tracing::debug!(delay_ms = self.fault_delay.as_millis() as u64, "injected delay");
            tokio::time::sleep(self.fault_delay).await;
        }

        if let Some(record) = self.store.find_record(request.order_id).await? {
            return Ok(FulfillmentOutcome::AlreadyApplied(record));
        }

        match self
            .store
            .reserve_once(request.order_id, &request.item_id, request.quantity)
            .await?
        {
            ReserveOutcome::Applied(record) => Ok(FulfillmentOutcome::Applied(record)),
            ReserveOutcome::AlreadyApplied(record) => {
                Ok(FulfillmentOutcome::AlreadyApplied(record))
            }
            ReserveOutcome::InsufficientStock { available } => {
                Err(FulfillmentError::InsufficientStock {
                    item_id: request.item_id.clone(),
                    requested: request.quantity,
                    available,
                })
            }
            ReserveOutcome::ItemNotFound => {
                Err(FulfillmentError::ItemNotFound(request.item_id.clone()))
            }
        }
    }

    /// Runs the fulfillment on its own task.
    ///
    /// Dropping or abandoning the returned handle does not cancel the
    /// fulfillment, so a caller that stops waiting leaves it to finish.
    pub fn fulfill_detached(
        &self,
        request: FulfillmentRequest,
    ) -> JoinHandle<Result<FulfillmentOutcome, FulfillmentError>> {
        let executor = self.clone();
        tokio::spawn(async move { executor.fulfill(&request).await })
    }
}
