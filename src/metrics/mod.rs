pub mod collector;
pub mod profiling;
pub mod server;

use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Duration;

pub use collector::prometheus_handle;
pub use server::{new_server, MetricsServer, ShutdownOutcome};

use crate::{MiddlewareError, MiddlewareResult};

pub const DEFAULT_ADDR: &str = "localhost:8080";
pub const DEFAULT_PPROF_PATH: &str = "/pprof";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_METRIC_PREFIX: &str = "http";
pub const DEFAULT_GRACE_WAIT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct MetricsOptions {
    pub addr: String,
    pub pprof_path: String,
    pub metrics_path: String,
    pub metric_prefix: String,
    /// How long shutdown waits for in-flight requests.
    pub grace_wait: Duration,
}

impl Default for MetricsOptions {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            pprof_path: DEFAULT_PPROF_PATH.to_string(),
            metrics_path: DEFAULT_METRICS_PATH.to_string(),
            metric_prefix: DEFAULT_METRIC_PREFIX.to_string(),
            grace_wait: DEFAULT_GRACE_WAIT,
        }
    }
}

impl MetricsOptions {
    pub fn with_addr(mut self, addr: impl Into<String>) -> Self {
        self.addr = addr.into();
        self
    }

    pub fn with_pprof_path(mut self, path: impl Into<String>) -> Self {
        self.pprof_path = path.into();
        self
    }

    pub fn with_metrics_path(mut self, path: impl Into<String>) -> Self {
        self.metrics_path = path.into();
        self
    }

    pub fn with_metric_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metric_prefix = prefix.into();
        self
    }

    pub fn with_grace_wait(mut self, wait: Duration) -> Self {
        self.grace_wait = wait;
        self
    }

    /// Checks the options and returns the normalized pprof prefix.
    pub fn validate(&self) -> MiddlewareResult<String> {
        if self.addr.is_empty() {
            return Err(MiddlewareError::Config("addr is empty".to_string()));
        }

        check_route_path("metrics", &self.metrics_path)?;

        if self.metric_prefix.is_empty()
            || !self
                .metric_prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MiddlewareError::Config(format!(
                "metric prefix should be [a-zA-Z0-9_]+, got {:?}",
                self.metric_prefix
            )));
        }

        let pprof_path = self.pprof_path.trim_end_matches('/');
        check_route_path("pprof", pprof_path)?;

        if pprof_path == self.metrics_path {
            return Err(MiddlewareError::Config(format!(
                "pprof path and metrics path are both {pprof_path}"
            )));
        }

        if self
            .metrics_path
            .strip_prefix(pprof_path)
            .is_some_and(|rest| rest.starts_with('/'))
        {
            return Err(MiddlewareError::Config(format!(
                "metrics path {} is under pprof path {pprof_path}",
                self.metrics_path
            )));
        }

        Ok(pprof_path.to_string())
    }
}

/// A static route path: leading slash, not root, no empty segments and no
/// axum captures or wildcards.
fn check_route_path(name: &str, path: &str) -> MiddlewareResult<()> {
    let segments = match path.strip_prefix('/') {
        Some(rest) if !rest.is_empty() => rest.split('/'),
        _ => {
            return Err(MiddlewareError::Config(format!(
                "{name} path should start with / and not be root, got {path:?}"
            )))
        }
    };

    for segment in segments {
        if segment.is_empty()
            || segment.contains(['{', '}'])
            || segment.starts_with([':', '*'])
        {
            return Err(MiddlewareError::Config(format!(
                "{name} path should be a static route, got {path:?}"
            )));
        }
    }

    Ok(())
}

/// Adds Prometheus metrics and profiler endpoints to an existing router.
///
/// Every route already on `router` is measured by the collector middleware;
/// the metrics and profiler routes added here are not. Call it once per
/// router, duplicate routes make axum panic.
pub fn enable<S>(router: Router<S>, opts: &MetricsOptions) -> MiddlewareResult<Router<S>>
where
    S: Clone + Send + Sync + 'static,
{
    let pprof_path = opts.validate()?;
    let handle = prometheus_handle()?;
    let names = Arc::new(collector::Collector::new(&opts.metric_prefix));

    let router = router
        .layer(middleware::from_fn_with_state(
            names,
            collector::collect_metrics,
        ))
        .route(
            &opts.metrics_path,
            get(move || collector::render(handle.clone())),
        );

    tracing::debug!(
        metrics_path = %opts.metrics_path,
        pprof_path = %pprof_path,
        "metrics enabled"
    );

    Ok(profiling::register(router, &pprof_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode};
    use tower::ServiceExt;

    fn get_req(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn body_string(resp: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_validate() {
        assert_eq!(MetricsOptions::default().validate().unwrap(), "/pprof");
        assert_eq!(
            MetricsOptions::default()
                .with_pprof_path("/debug/pprof/")
                .validate()
                .unwrap(),
            "/debug/pprof"
        );

        for bad in [
            MetricsOptions::default().with_pprof_path("pprof"),
            MetricsOptions::default().with_pprof_path("/"),
            MetricsOptions::default().with_metrics_path("metrics"),
            MetricsOptions::default().with_addr(""),
            MetricsOptions::default().with_metric_prefix("my-app"),
            MetricsOptions::default().with_pprof_path("/metrics"),
        ] {
            assert!(matches!(bad.validate(), Err(MiddlewareError::Config(_))), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_enable_registers_default_pprof_prefix() {
        let app = Router::new().route("/hello", get(|| async { "hello" }));
        let app = enable(app, &MetricsOptions::default()).unwrap();

        let resp = app.clone().oneshot(get_req("/pprof")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_string(resp).await.contains("/pprof/profile"));

        let resp = app.clone().oneshot(get_req("/pprof/cmdline")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app
            .clone()
            .oneshot(get_req("/pprof/profile?seconds=0"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app.clone().oneshot(get_req("/hello")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.oneshot(get_req("/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains("http_requests_total"));
        assert!(body.contains("route=\"/hello\""));
    }

    #[tokio::test]
    async fn test_enable_with_custom_prefix() {
        let opts = MetricsOptions::default()
            .with_pprof_path("/debug/pprof")
            .with_metrics_path("/internal/metrics")
            .with_metric_prefix("custom");
        let app = enable(Router::new(), &opts).unwrap();

        let resp = app.clone().oneshot(get_req("/debug/pprof")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = app.clone().oneshot(get_req("/pprof")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app.oneshot(get_req("/internal/metrics")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[test]
    fn test_enable_rejects_bad_options() {
        let opts = MetricsOptions::default().with_pprof_path("no-slash");
        let result = enable(Router::<()>::new(), &opts);
        assert!(matches!(result, Err(MiddlewareError::Config(_))));
    }

    #[test]
    fn test_enable_rejects_non_static_paths() {
        let pprof_paths = ["/:pprof", "/*rest", "/pp{x", "/pp}x", "/debug//pprof", "/debug/:id"];
        for path in pprof_paths {
            let opts = MetricsOptions::default().with_pprof_path(path);
            let result = enable(Router::<()>::new(), &opts);
            assert!(matches!(result, Err(MiddlewareError::Config(_))), "{path}");
        }

        let metrics_paths = ["/:metrics", "/*all", "/{metrics}", "/metrics/", "/a//b"];
        for path in metrics_paths {
            let opts = MetricsOptions::default().with_metrics_path(path);
            let result = enable(Router::<()>::new(), &opts);
            assert!(matches!(result, Err(MiddlewareError::Config(_))), "{path}");
        }
    }

    #[test]
    fn test_metrics_path_under_pprof_prefix() {
        let opts = MetricsOptions::default().with_metrics_path("/pprof/metrics");
        assert!(matches!(opts.validate(), Err(MiddlewareError::Config(_))));

        // a shared name prefix is not nesting
        let opts = MetricsOptions::default().with_metrics_path("/pprofmetrics");
        assert_eq!(opts.validate().unwrap(), "/pprof");
    }
}
