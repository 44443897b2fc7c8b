//! Integration tests for the order and inventory services.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use api::Observability;
use api::latency::LatencyAggregator;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{COMPLETION_EVENTS, ItemId, OrderId, PENDING_WORK};
use inventory::{FulfillmentExecutor, FulfillmentWorker, InMemoryInventoryStore};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{
    CompletionHandler, HttpFulfillmentClient, InMemoryOrderStore, OrderLifecycleManager,
};
use queue::{ConnectionSupervisor, Consumer, InMemoryBroker, QueueHandle, RetryPolicy};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn observability() -> Observability {
    Observability::new(
        get_metrics_handle(),
        Arc::new(LatencyAggregator::new(Duration::from_secs(30))),
    )
}

fn inventory_app(store: InMemoryInventoryStore) -> axum::Router {
    let executor = FulfillmentExecutor::new(store).with_fault_delay(Duration::from_millis(600));
    api::create_inventory_app(Arc::new(executor), &observability())
}

fn order_app(store: InMemoryOrderStore, queue: QueueHandle) -> axum::Router {
    // Nothing listens here; placement fails fast with a transport error.
    let client = HttpFulfillmentClient::new("http://127.0.0.1:9");
    let manager = OrderLifecycleManager::new(store, client, queue);
    api::create_order_app(Arc::new(manager), &observability())
}

async fn send(app: &axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn with_json(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

// -- Router tests --

#[tokio::test]
async fn test_health_up_and_down() {
    let store = InMemoryOrderStore::new();
    let app = order_app(store.clone(), QueueHandle::unavailable());

    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "UP");

    store.set_unavailable(true);
    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "DOWN");
}

#[tokio::test]
async fn test_inventory_health_reflects_store() {
    let store = InMemoryInventoryStore::new();
    let app = inventory_app(store.clone());

    let (status, _) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);

    store.set_unavailable(true);
    let (status, json) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "DOWN");
}

#[tokio::test]
async fn test_create_order_validation() {
    let app = order_app(InMemoryOrderStore::new(), QueueHandle::unavailable());

    let (status, json) = send(
        &app,
        with_json("POST", "/orders", json!({"itemId": "widget", "quantity": 0})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("quantity"));

    let (status, _) = send(
        &app,
        with_json("POST", "/orders", json!({"itemId": "widget", "quantity": -3})),
    )
    .await;
    assert!(status.is_client_error());

    let (status, json) = send(&app, get("/orders")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!([]));
}

#[tokio::test]
async fn test_downstream_failure_reports_failed_order() {
    let app = order_app(InMemoryOrderStore::new(), QueueHandle::unavailable());

    let (status, json) = send(
        &app,
        with_json("POST", "/orders", json!({"itemId": "widget", "quantity": 1})),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], "FAILED");
    assert_eq!(json["reason"], "DOWNSTREAM_ERROR");

    let order_id = json["orderId"].as_str().unwrap().to_string();
    let (status, json) = send(&app, get(&format!("/orders/{order_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "FAILED");
}

#[tokio::test]
async fn test_get_order_bad_and_unknown_id() {
    let app = order_app(InMemoryOrderStore::new(), QueueHandle::unavailable());

    let (status, _) = send(&app, get("/orders/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, get(&format!("/orders/{}", OrderId::new()))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_fulfill_is_idempotent() {
    let store = InMemoryInventoryStore::with_items([("widget", 10)]);
    let app = inventory_app(store);
    let body = json!({
        "orderId": OrderId::new(),
        "itemId": "widget",
        "quantity": 4,
        "faultFlag": false,
    });

    let (status, json) = send(&app, with_json("POST", "/fulfill", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "APPLIED");

    let (status, json) = send(&app, with_json("POST", "/fulfill", body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ALREADY_APPLIED");

    let (_, item) = send(&app, get("/items/widget")).await;
    assert_eq!(item["availableQuantity"], 6);
}

#[tokio::test]
async fn test_fulfill_rejections() {
    let store = InMemoryInventoryStore::with_items([("gadget", 1)]);
    let app = inventory_app(store);

    let (status, json) = send(
        &app,
        with_json(
            "POST",
            "/fulfill",
            json!({"orderId": OrderId::new(), "itemId": "gadget", "quantity": 2}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Insufficient stock"));

    let (status, _) = send(
        &app,
        with_json(
            "POST",
            "/fulfill",
            json!({"orderId": OrderId::new(), "itemId": "ghost", "quantity": 1}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stock_endpoints() {
    let app = inventory_app(InMemoryInventoryStore::new());

    let (status, json) = send(&app, with_json("PUT", "/items/widget", json!({"quantity": 7}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["id"], "widget");
    assert_eq!(json["availableQuantity"], 7);

    let (status, json) = send(&app, get("/items")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/items/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_endpoints() {
    let app = inventory_app(InMemoryInventoryStore::new());
    send(&app, get("/items")).await;

    let response = app.clone().oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("http_request_duration_seconds"));

    let (status, json) = send(&app, get("/metrics/latency")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["windowSeconds"], 30);
    assert!(json["samples"].as_u64().unwrap() >= 2);
    assert!(json["averageSeconds"].as_f64().unwrap() >= 0.0);
}

// -- End-to-end over real listeners --

const DEADLINE: Duration = Duration::from_millis(200);
const FAULT_DELAY: Duration = Duration::from_millis(600);

struct Stack {
    order_url: String,
    inventory_url: String,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl Drop for Stack {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(app: axum::Router, shutdown: CancellationToken) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .unwrap();
    });
    format!("http://{addr}")
}

async fn start_stack(stock: &[(&str, u32)], queue_available: bool) -> Stack {
    let shutdown = CancellationToken::new();
    let broker = InMemoryBroker::new();
    let supervisor = ConnectionSupervisor::new(
        Arc::new(broker.clone()),
        &[PENDING_WORK, COMPLETION_EVENTS],
        RetryPolicy::Fixed(Duration::from_millis(10)),
    );
    let (connected, _) = supervisor.spawn(shutdown.clone());
    connected.ready().await.unwrap();
    let queue = if queue_available {
        connected.clone()
    } else {
        QueueHandle::unavailable()
    };

    let inventory_store =
        InMemoryInventoryStore::with_items(stock.iter().map(|(id, qty)| (*id, *qty)));
    let executor = FulfillmentExecutor::new(inventory_store).with_fault_delay(FAULT_DELAY);
    let worker = FulfillmentWorker::new(executor.clone(), connected.clone());
    tokio::spawn(Consumer::new(PENDING_WORK, connected.clone(), worker).run(shutdown.clone()));
    let inventory_url = serve(
        api::create_inventory_app(Arc::new(executor), &observability()),
        shutdown.clone(),
    )
    .await;

    let manager = OrderLifecycleManager::new(
        InMemoryOrderStore::new(),
        HttpFulfillmentClient::new(inventory_url.clone()),
        queue,
    )
    .with_deadline(DEADLINE);
    let handler = CompletionHandler::new(manager.clone());
    tokio::spawn(Consumer::new(COMPLETION_EVENTS, connected.clone(), handler).run(shutdown.clone()));
    let order_url = serve(
        api::create_order_app(Arc::new(manager), &observability()),
        shutdown.clone(),
    )
    .await;

    Stack {
        order_url,
        inventory_url,
        http: reqwest::Client::new(),
        shutdown,
    }
}

impl Stack {
    async fn place(&self, item: &str, quantity: u32, fault_flag: bool) -> (StatusCode, Value) {
        let response = self
            .http
            .post(format!("{}/orders", self.order_url))
            .json(&json!({"itemId": item, "quantity": quantity, "faultFlag": fault_flag}))
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        (status, response.json().await.unwrap())
    }

    async fn order(&self, id: &str) -> Value {
        self.http
            .get(format!("{}/orders/{id}", self.order_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn stock(&self, item: &ItemId) -> u64 {
        let item: Value = self
            .http
            .get(format!("{}/items/{item}", self.inventory_url))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        item["availableQuantity"].as_u64().unwrap()
    }

    async fn wait_for_status(&self, id: &str, status: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let order = self.order(id).await;
            if order["status"] == status {
                return order;
            }
            assert!(
                Instant::now() < deadline,
                "order {id} stuck at {}",
                order["status"]
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_a_fulfilled_within_deadline() {
    let stack = start_stack(&[("widget", 10)], true).await;

    let (status, order) = stack.place("widget", 3, false).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["status"], "CONFIRMED");
    assert_eq!(stack.stock(&ItemId::new("widget")).await, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_b_slow_fulfillment_is_queued_then_completed_once() {
    let stack = start_stack(&[("widget", 10)], true).await;

    let started = Instant::now();
    let (status, body) = stack.place("widget", 2, true).await;
    let waited = started.elapsed();

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "QUEUED");
    assert!(waited >= DEADLINE, "returned before the deadline: {waited:?}");
    assert!(waited < FAULT_DELAY, "waited for the slow call: {waited:?}");

    let id = body["id"].as_str().unwrap().to_string();
    stack.wait_for_status(&id, "COMPLETED").await;

    // Both the abandoned synchronous call and the queued retry have run by
    // now; the effect was applied once.
    tokio::time::sleep(FAULT_DELAY * 2).await;
    assert_eq!(stack.stock(&ItemId::new("widget")).await, 8);
    assert_eq!(stack.order(&id).await["status"], "COMPLETED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn scenario_c_insufficient_stock_fails_without_change() {
    let stack = start_stack(&[("gadget", 2)], true).await;

    let (status, body) = stack.place("gadget", 5, false).await;

    assert!(status.is_server_error());
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["reason"], "INSUFFICIENT_STOCK");
    assert!(body["error"].as_str().unwrap().contains("Insufficient stock"));

    let id = body["orderId"].as_str().unwrap().to_string();
    let order = stack.order(&id).await;
    assert_eq!(order["status"], "FAILED");
    assert!(order["failureReason"].as_str().unwrap().contains("Insufficient stock"));
    assert_eq!(stack.stock(&ItemId::new("gadget")).await, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_unavailable_at_fallback_fails_the_order() {
    let stack = start_stack(&[("widget", 10)], false).await;

    let (status, body) = stack.place("widget", 1, true).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["reason"], "QUEUE_UNAVAILABLE");
    assert!(body["orderId"].as_str().is_some());

    let id = body["orderId"].as_str().unwrap().to_string();
    assert_eq!(stack.order(&id).await["status"], "FAILED");
}
