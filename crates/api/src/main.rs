//! Service entry point.

use std::sync::Arc;

use api::Observability;
use api::config::Config;
use api::latency::LatencyAggregator;
use common::{COMPLETION_EVENTS, PENDING_WORK};
use inventory::{
    FulfillmentExecutor, FulfillmentWorker, InMemoryInventoryStore, InventoryStore,
    PostgresInventoryStore, StockLedger,
};
use metrics_exporter_prometheus::PrometheusHandle;
use orders::{
    CompletionHandler, HttpFulfillmentClient, InMemoryOrderStore, OrderLifecycleManager,
    OrderStore, PostgresOrderStore,
};
use queue::{ConnectionSupervisor, Consumer, InMemoryBroker, PgTransport, RetryPolicy, Transport};
use tokio::signal;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

async fn serve(name: &'static str, addr: String, app: axum::Router, shutdown: CancellationToken) {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    tracing::info!(service = name, %addr, "starting HTTP server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .expect("server error");

    tracing::info!(service = name, "server shut down gracefully");
}

/// Starts every service this process's role asks for and waits for them to
/// stop.
async fn run<IS, OS>(
    config: Config,
    inventory_store: IS,
    order_store: OS,
    transport: Arc<dyn Transport>,
    metrics: PrometheusHandle,
    shutdown: CancellationToken,
) where
    IS: InventoryStore + Clone + 'static,
    OS: OrderStore + Clone + 'static,
{
    let mut tasks = JoinSet::new();

    // One supervised connection for every producer and consumer.
    let supervisor = ConnectionSupervisor::new(
        transport,
        &[PENDING_WORK, COMPLETION_EVENTS],
        RetryPolicy::Fixed(config.reconnect_delay),
    );
    let (queue, supervisor_task) = supervisor.spawn(shutdown.clone());
    tracing::info!("waiting for work queue connection");
    tokio::select! {
        () = shutdown.cancelled() => return,
        ready = queue.ready() => {
            ready.expect("queue supervisor stopped before connecting");
        }
    }

    if config.role.runs_inventory() {
        let executor = FulfillmentExecutor::new(inventory_store).with_fault_delay(config.fault_delay);
        let worker = FulfillmentWorker::new(executor.clone(), queue.clone())
            .with_max_deliveries(config.max_deliveries);
        tasks.spawn(Consumer::new(PENDING_WORK, queue.clone(), worker).run(shutdown.clone()));

        let latency = Arc::new(LatencyAggregator::new(config.latency_window));
        latency.spawn_sweeper(config.latency_sweep, shutdown.clone());
        let app = api::create_inventory_app(
            Arc::new(executor),
            &Observability::new(metrics.clone(), latency),
        );
        tasks.spawn(serve("inventory", config.inventory_addr(), app, shutdown.clone()));
    }

    if config.role.runs_orders() {
        let client = HttpFulfillmentClient::new(config.inventory_url.clone());
        let manager = OrderLifecycleManager::new(order_store, client, queue.clone())
            .with_deadline(config.fulfillment_deadline);
        let handler =
            CompletionHandler::new(manager.clone()).with_max_deliveries(config.max_deliveries);
        tasks.spawn(Consumer::new(COMPLETION_EVENTS, queue.clone(), handler).run(shutdown.clone()));

        let latency = Arc::new(LatencyAggregator::new(config.latency_window));
        latency.spawn_sweeper(config.latency_sweep, shutdown.clone());
        let app = api::create_order_app(
            Arc::new(manager),
            &Observability::new(metrics.clone(), latency),
        );
        tasks.spawn(serve("order", config.order_addr(), app, shutdown.clone()));
    }

    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            tracing::error!(error = %e, "service task failed");
            shutdown.cancel();
        }
    }
    let _ = supervisor_task.await;
}

#[tokio::main]
async fn main() {
    // 1. Load configuration
    let config = Config::from_env().expect("invalid configuration");

    // 2. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 3. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 4. Shutdown on SIGINT/SIGTERM
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    tracing::info!(role = ?config.role, in_memory = config.database_url.is_none(), "starting");

    // 5. Stores and queue transport, then run
    match config.database_url.clone() {
        Some(url) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(10)
                .connect(&url)
                .await
                .expect("failed to connect to database");
            let inventory_store = PostgresInventoryStore::new(pool.clone());
            inventory_store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            let order_store = PostgresOrderStore::new(pool);
            let transport: Arc<dyn Transport> = Arc::new(PgTransport::new(url));

            run(config, inventory_store, order_store, transport, metrics_handle, shutdown).await;
        }
        None => {
            if config.role != api::config::ServiceRole::All {
                tracing::warn!(
                    "no DATABASE_URL: the in-process broker is not shared with other processes"
                );
            }
            let inventory_store = InMemoryInventoryStore::new();
            for (item_id, quantity) in &config.seed_stock {
                inventory_store
                    .set_quantity(item_id, *quantity)
                    .await
                    .expect("failed to seed stock");
            }
            let order_store = InMemoryOrderStore::new();
            let transport: Arc<dyn Transport> = Arc::new(InMemoryBroker::new());

            run(config, inventory_store, order_store, transport, metrics_handle, shutdown).await;
        }
    }

    tracing::info!("shut down complete");
}
