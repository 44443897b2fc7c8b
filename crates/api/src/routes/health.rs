//! Health check endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use inventory::{FulfillmentExecutor, InventoryStore};
use orders::{FulfillmentClient, OrderLifecycleManager, OrderStore};
use serde::Serialize;

/// Something whose backing store can be probed.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn is_healthy(&self) -> bool;
}

#[async_trait]
impl<S, C> HealthProbe for OrderLifecycleManager<S, C>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    async fn is_healthy(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "order store health check failed");
                false
            }
        }
    }
}

#[async_trait]
impl<S> HealthProbe for FulfillmentExecutor<S>
where
    S: InventoryStore + Clone + 'static,
{
    async fn is_healthy(&self) -> bool {
        match self.store().ping().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "inventory store health check failed");
                false
            }
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// GET /health: `UP` when the store answers, `DOWN` with 503 otherwise.
pub async fn check<P: HealthProbe>(
    State(probe): State<Arc<P>>,
) -> (StatusCode, Json<HealthResponse>) {
    if probe.is_healthy().await {
        (StatusCode::OK, Json(HealthResponse { status: "UP" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse { status: "DOWN" }),
        )
    }
}
