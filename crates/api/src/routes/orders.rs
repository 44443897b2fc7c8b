//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use common::{ItemId, OrderId};
use orders::{
    FulfillmentClient, Order, OrderLifecycleManager, OrderStatus, OrderStore, PlaceOrder,
    Placement,
};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

// -- Request types --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    pub item_id: String,
    pub quantity: u32,
    #[serde(default)]
    pub fault_flag: bool,
}

// -- Response types --

#[derive(Serialize)]
pub struct QueuedResponse {
    pub id: OrderId,
    pub status: OrderStatus,
    pub message: &'static str,
}

// -- Handlers --

/// POST /orders: place an order.
///
/// 200 with the confirmed order, or 202 when fulfillment was deferred.
#[tracing::instrument(skip(manager, req))]
pub async fn create<S, C>(
    State(manager): State<Arc<OrderLifecycleManager<S, C>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<Response, ApiError>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    let command =
        PlaceOrder::new(ItemId::new(req.item_id), req.quantity).with_fault_flag(req.fault_flag);

    match manager.place_order(command).await? {
        Placement::Confirmed(order) => Ok((StatusCode::OK, Json(order)).into_response()),
        Placement::Queued(order) => {
            let response = QueuedResponse {
                id: order.id,
                status: order.status,
                message: "Order queued, processing asynchronously",
            };
            Ok((StatusCode::ACCEPTED, Json(response)).into_response())
        }
    }
}

/// GET /orders/{id}: current state of one order.
#[tracing::instrument(skip(manager))]
pub async fn get<S, C>(
    State(manager): State<Arc<OrderLifecycleManager<S, C>>>,
    Path(id): Path<String>,
) -> Result<Json<Order>, ApiError>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    let order_id = parse_order_id(&id)?;
    Ok(Json(manager.get_order(order_id).await?))
}

/// GET /orders: all orders, oldest first.
#[tracing::instrument(skip(manager))]
pub async fn list<S, C>(
    State(manager): State<Arc<OrderLifecycleManager<S, C>>>,
) -> Result<Json<Vec<Order>>, ApiError>
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    Ok(Json(manager.list_orders().await?))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    OrderId::parse(id).map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))
}
