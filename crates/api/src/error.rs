//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use inventory::FulfillmentError;
use orders::{FailureKind, OrderError, PlacementError};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order placement error.
    Placement(PlacementError),
    /// Order read or update error.
    Order(OrderError),
    /// Fulfillment error on the inventory side.
    Fulfillment(FulfillmentError),
    /// Internal server error.
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, error_body(msg)),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
            ApiError::Placement(err) => placement_error_to_response(err),
            ApiError::Order(err) => {
                let (status, msg) = order_error_to_response(err);
                (status, error_body(msg))
            }
            ApiError::Fulfillment(err) => {
                let (status, msg) = fulfillment_error_to_response(err);
                (status, error_body(msg))
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, error_body(msg))
            }
        };

        (status, axum::Json(body)).into_response()
    }
}

fn error_body(message: String) -> serde_json::Value {
    serde_json::json!({ "error": message })
}

fn failure_kind_name(kind: FailureKind) -> &'static str {
    match kind {
        FailureKind::InsufficientStock => "INSUFFICIENT_STOCK",
        FailureKind::ItemNotFound => "ITEM_NOT_FOUND",
        FailureKind::InvalidRequest => "INVALID_REQUEST",
        FailureKind::QueueUnavailable => "QUEUE_UNAVAILABLE",
        FailureKind::Downstream => "DOWNSTREAM_ERROR",
    }
}

fn placement_error_to_response(err: PlacementError) -> (StatusCode, serde_json::Value) {
    match err {
        PlacementError::Validation(msg) => (StatusCode::BAD_REQUEST, error_body(msg)),
        PlacementError::Failed { order, kind } => {
            let status = match kind {
                FailureKind::QueueUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let body = serde_json::json!({
                "error": order.failure_reason.as_deref().unwrap_or("Order failed"),
                "orderId": order.id,
                "status": order.status,
                "reason": failure_kind_name(kind),
            });
            (status, body)
        }
        PlacementError::Order(err) => {
            let (status, msg) = order_error_to_response(err);
            (status, error_body(msg))
        }
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        OrderError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrderError::NotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        OrderError::InvalidTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        OrderError::Store(_) => {
            tracing::error!(error = %err, "order store error");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}

fn fulfillment_error_to_response(err: FulfillmentError) -> (StatusCode, String) {
    match &err {
        FulfillmentError::InsufficientStock { .. } => (StatusCode::CONFLICT, err.to_string()),
        FulfillmentError::ItemNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        FulfillmentError::InvalidQuantity { .. } => (StatusCode::BAD_REQUEST, err.to_string()),
        FulfillmentError::Store(_) => {
            tracing::error!(error = %err, "inventory store error");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
    }
}

impl From<PlacementError> for ApiError {
    fn from(err: PlacementError) -> Self {
        ApiError::Placement(err)
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

impl From<inventory::StoreError> for ApiError {
    fn from(err: inventory::StoreError) -> Self {
        ApiError::Fulfillment(FulfillmentError::Store(err))
    }
}
