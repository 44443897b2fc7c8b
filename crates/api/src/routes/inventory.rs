//! Inventory endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::{FulfillmentReply, FulfillmentRequest, ItemId};
use inventory::{FulfillmentExecutor, InventoryStore, StockItem, StockLedger};
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct SetStockRequest {
    pub quantity: u32,
}

/// POST /fulfill: apply an order's fulfillment at most once.
///
/// The executor runs on its own task, so a caller that gives up does not
/// cancel the fulfillment.
#[tracing::instrument(skip(executor, req), fields(order_id = %req.order_id))]
pub async fn fulfill<S>(
    State(executor): State<Arc<FulfillmentExecutor<S>>>,
    Json(req): Json<FulfillmentRequest>,
) -> Result<Json<FulfillmentReply>, ApiError>
where
    S: InventoryStore + Clone + 'static,
{
    let order_id = req.order_id;
    let outcome = executor
        .fulfill_detached(req)
        .await
        .map_err(|e| ApiError::Internal(format!("fulfillment task failed: {e}")))??;

    Ok(Json(FulfillmentReply {
        order_id,
        status: outcome.status(),
    }))
}

/// GET /items: all stock items.
pub async fn list<S>(
    State(executor): State<Arc<FulfillmentExecutor<S>>>,
) -> Result<Json<Vec<StockItem>>, ApiError>
where
    S: InventoryStore + Clone + 'static,
{
    Ok(Json(executor.store().list_items().await?))
}

/// GET /items/{id}: one stock item.
pub async fn get<S>(
    State(executor): State<Arc<FulfillmentExecutor<S>>>,
    Path(id): Path<String>,
) -> Result<Json<StockItem>, ApiError>
where
    S: InventoryStore + Clone + 'static,
{
    let item_id = ItemId::new(id);
    executor
        .store()
        .get_item(&item_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Item {item_id} not found")))
}

/// PUT /items/{id}: seed or restock an item to an absolute quantity.
#[tracing::instrument(skip(executor, req), fields(quantity = req.quantity))]
pub async fn set<S>(
    State(executor): State<Arc<FulfillmentExecutor<S>>>,
    Path(id): Path<String>,
    Json(req): Json<SetStockRequest>,
) -> Result<Json<StockItem>, ApiError>
where
    S: InventoryStore + Clone + 'static,
{
    let item_id = ItemId::new(id);
    if item_id.is_blank() {
        return Err(ApiError::BadRequest("Item ID must not be empty".to_string()));
    }
    Ok(Json(executor.store().set_quantity(&item_id, req.quantity).await?))
}
