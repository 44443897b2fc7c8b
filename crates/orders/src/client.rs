//! Fulfillment calls to the inventory service.

use async_trait::async_trait;
use common::{FulfillmentReply, FulfillmentRequest};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::error::{CallError, FailureKind};

/// Calls the inventory service's fulfillment operation.
///
/// Implementations carry no deadline of their own; the caller bounds the
/// call.
#[async_trait]
pub trait FulfillmentClient: Send + Sync {
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<FulfillmentReply, CallError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// [`FulfillmentClient`] over HTTP: `POST {base_url}/fulfill`.
#[derive(Debug, Clone)]
pub struct HttpFulfillmentClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFulfillmentClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl FulfillmentClient for HttpFulfillmentClient {
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn fulfill(&self, request: &FulfillmentRequest) -> Result<FulfillmentReply, CallError> {
        let response = self
            .http
            .post(format!("{}/fulfill", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(|e| CallError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<FulfillmentReply>()
                .await
                .map_err(|e| CallError::Transport(format!("invalid fulfillment reply: {e}")));
        }

        let reason = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => format!("inventory service returned {status}"),
        };
        let kind = match status {
            StatusCode::CONFLICT => FailureKind::InsufficientStock,
            StatusCode::NOT_FOUND => FailureKind::ItemNotFound,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                FailureKind::InvalidRequest
            }
            _ => return Err(CallError::Transport(reason)),
        };
        Err(CallError::Rejected { kind, reason })
    }
}

#[cfg(test)]
mod tests {
    use axum::{Json, Router, http::StatusCode as AxumStatus, routing::post};
    use common::{FulfillmentStatus, ItemId, OrderId};
    use serde_json::json;

    use super::*;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
        format!("http://{addr}")
    }

    fn request() -> FulfillmentRequest {
        FulfillmentRequest {
            order_id: OrderId::new(),
            item_id: ItemId::new("widget"),
            quantity: 1,
            fault_flag: false,
        }
    }

    #[tokio::test]
    async fn test_success_reply_is_decoded() {
        let router = Router::new().route(
            "/fulfill",
            post(|Json(req): Json<FulfillmentRequest>| async move {
                Json(FulfillmentReply {
                    order_id: req.order_id,
                    status: FulfillmentStatus::Applied,
                })
            }),
        );
        let client = HttpFulfillmentClient::new(format!("{}/", serve(router).await));
        let req = request();

        let reply = client.fulfill(&req).await.unwrap();
        assert_eq!(reply.order_id, req.order_id);
        assert_eq!(reply.status, FulfillmentStatus::Applied);
    }

    #[tokio::test]
    async fn test_conflict_maps_to_insufficient_stock() {
        let router = Router::new().route(
            "/fulfill",
            post(|| async {
                (
                    AxumStatus::CONFLICT,
                    Json(json!({"error": "Insufficient stock for item widget"})),
                )
            }),
        );
        let client = HttpFulfillmentClient::new(serve(router).await);

        let err = client.fulfill(&request()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::InsufficientStock);
        assert_eq!(err.to_string(), "Insufficient stock for item widget");
    }

    #[tokio::test]
    async fn test_server_error_is_transport() {
        let router = Router::new().route(
            "/fulfill",
            post(|| async { AxumStatus::INTERNAL_SERVER_ERROR }),
        );
        let client = HttpFulfillmentClient::new(serve(router).await);

        let err = client.fulfill(&request()).await.unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transport() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = HttpFulfillmentClient::new(format!("http://{addr}"));
        let err = client.fulfill(&request()).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Downstream);
    }
}
