use axum::{
    extract::{MatchedPath, Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Instant;

use crate::middleware::logger::response_size;
use crate::{MiddlewareError, MiddlewareResult};

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Process-wide Prometheus handle; the recorder is installed on first use.
pub fn prometheus_handle() -> MiddlewareResult<PrometheusHandle> {
    PROMETHEUS
        .get_or_try_init(|| {
            PrometheusBuilder::new()
                // Latency buckets in seconds
                .set_buckets_for_metric(
                    Matcher::Suffix("_request_duration_seconds".to_string()),
                    &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
                )
                .map_err(|e| MiddlewareError::Metrics(format!("set histogram buckets: {e}")))?
                .install_recorder()
                .map_err(|e| MiddlewareError::Metrics(format!("install prometheus recorder: {e}")))
        })
        .cloned()
}

/// Metric names, all sharing one prefix.
#[derive(Clone, Debug)]
pub struct Collector {
    requests_total: String,
    request_duration: String,
    request_size: String,
    response_size: String,
}

impl Collector {
    pub fn new(prefix: &str) -> Self {
        Self {
            requests_total: format!("{prefix}_requests_total"),
            request_duration: format!("{prefix}_request_duration_seconds"),
            request_size: format!("{prefix}_request_size_bytes"),
            response_size: format!("{prefix}_response_size_bytes"),
        }
    }
}

/// Middleware that records count, latency and sizes of every request.
pub async fn collect_metrics(
    State(collector): State<Arc<Collector>>,
    request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();

    // Route template keeps label cardinality bounded
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let request_size = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(0.0);

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    let duration = start.elapsed().as_secs_f64();

    counter!(
        collector.requests_total.clone(),
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => status
    )
    .increment(1);

    histogram!(
        collector.request_duration.clone(),
        "method" => method,
        "route" => route.clone()
    )
    .record(duration);

    histogram!(collector.request_size.clone(), "route" => route.clone()).record(request_size);
    histogram!(collector.response_size.clone(), "route" => route)
        .record(response_size(&response) as f64);

    response
}

/// Renders every metric in the Prometheus text format.
pub async fn render(handle: PrometheusHandle) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}
