//! Prometheus metrics and rolling latency endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::latency::LatencyAggregator;

/// GET /metrics: returns Prometheus-formatted metrics.
pub async fn get(State(handle): State<PrometheusHandle>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        handle.render(),
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyResponse {
    pub window_seconds: u64,
    pub average_seconds: f64,
    pub samples: usize,
}

/// GET /metrics/latency: the rolling request-duration average.
pub async fn latency(State(aggregator): State<Arc<LatencyAggregator>>) -> Json<LatencyResponse> {
    let summary = aggregator.summary();
    Json(LatencyResponse {
        window_seconds: aggregator.window().as_secs(),
        average_seconds: summary.average,
        samples: summary.samples,
    })
}
