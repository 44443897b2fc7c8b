//! HTTP services for the order fulfillment protocol.
//!
//! Two routers, one per service, each with structured logging (tracing),
//! Prometheus metrics and its own rolling latency window:
//! - [`create_order_app`]: order placement and polling
//! - [`create_inventory_app`]: idempotent fulfillment and stock

pub mod config;
pub mod error;
pub mod latency;
pub mod middleware;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use inventory::{FulfillmentExecutor, InventoryStore};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{FulfillmentClient, OrderLifecycleManager, OrderStore};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use latency::LatencyAggregator;

/// Metrics plumbing shared by a service's router.
#[derive(Clone)]
pub struct Observability {
    pub metrics: PrometheusHandle,
    pub latency: Arc<LatencyAggregator>,
}

impl Observability {
    pub fn new(metrics: PrometheusHandle, latency: Arc<LatencyAggregator>) -> Self {
        Self { metrics, latency }
    }
}

fn observability_routes(observability: &Observability) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(observability.metrics.clone());
    let latency_router = Router::new()
        .route("/metrics/latency", get(routes::metrics::latency))
        .with_state(Arc::clone(&observability.latency));

    metrics_router.merge(latency_router)
}

fn finish(router: Router, observability: &Observability) -> Router {
    router
        .merge(observability_routes(observability))
        .route_layer(axum::middleware::from_fn_with_state(
            Arc::clone(&observability.latency),
            middleware::track_latency,
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the order service router.
pub fn create_order_app<S, C>(
    manager: Arc<OrderLifecycleManager<S, C>>,
    observability: &Observability,
) -> Router
where
    S: OrderStore + Clone + 'static,
    C: FulfillmentClient + 'static,
{
    let router = Router::new()
        .route("/health", get(routes::health::check::<OrderLifecycleManager<S, C>>))
        .route("/orders", post(routes::orders::create::<S, C>))
        .route("/orders", get(routes::orders::list::<S, C>))
        .route("/orders/{id}", get(routes::orders::get::<S, C>))
        .with_state(manager);

    finish(router, observability)
}

/// Creates the inventory service router.
pub fn create_inventory_app<S>(
    executor: Arc<FulfillmentExecutor<S>>,
    observability: &Observability,
) -> Router
where
    S: InventoryStore + Clone + 'static,
{
    let router = Router::new()
        .route("/health", get(routes::health::check::<FulfillmentExecutor<S>>))
        .route("/fulfill", post(routes::inventory::fulfill::<S>))
        .route("/items", get(routes::inventory::list::<S>))
        .route(
            "/items/{id}",
            get(routes::inventory::get::<S>).put(routes::inventory::set::<S>),
        )
        .with_state(executor);

    finish(router, observability)
}
