use axum::Router;
use std::future::IntoFuture;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::timeout::RequestBodyTimeoutLayer;

use super::{enable, MetricsOptions};
use crate::{MiddlewareError, MiddlewareResult};

/// Upper bound for reading a request body on the metrics server.
pub const READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How a metrics server ended after cancellation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// In-flight requests finished within the grace period.
    Graceful,
    /// The server stopped waiting for in-flight requests.
    TimedOut(Duration),
    Failed(String),
    /// The server was dropped without being served.
    NotStarted,
}

/// Dedicated HTTP server exposing only metrics and profiler endpoints.
///
/// Created by [`new_server`]; nothing listens until [`MetricsServer::serve`]
/// or [`MetricsServer::serve_with_listener`] is awaited.
pub struct MetricsServer {
    addr: String,
    router: Router,
    cancel: CancellationToken,
    grace_wait: Duration,
    outcome_tx: oneshot::Sender<ShutdownOutcome>,
    watcher: Option<JoinHandle<ShutdownOutcome>>,
}

/// Builds a metrics server and spawns the task that shuts it down once
/// `cancel` fires. Must be called inside a tokio runtime.
pub fn new_server(cancel: CancellationToken, opts: &MetricsOptions) -> MiddlewareResult<MetricsServer> {
    let runtime = Handle::try_current().map_err(|e| {
        MiddlewareError::Config(format!("metrics server needs a tokio runtime: {e}"))
    })?;

    let router = enable(Router::new(), opts)
        .map_err(|e| MiddlewareError::Config(format!("enable metric: {e}")))?
        .layer(RequestBodyTimeoutLayer::new(READ_TIMEOUT))
        .layer(CatchPanicLayer::new());

    let (outcome_tx, outcome_rx) = oneshot::channel();
    let watcher = runtime.spawn(watch_shutdown(cancel.clone(), opts.addr.clone(), outcome_rx));

    Ok(MetricsServer {
        addr: opts.addr.clone(),
        router,
        cancel,
        grace_wait: opts.grace_wait,
        outcome_tx,
        watcher: Some(watcher),
    })
}

async fn watch_shutdown(
    cancel: CancellationToken,
    addr: String,
    outcome_rx: oneshot::Receiver<ShutdownOutcome>,
) -> ShutdownOutcome {
    cancel.cancelled().await;
    tracing::info!(addr, "got signal to shutdown metric server");

    let outcome = outcome_rx.await.unwrap_or(ShutdownOutcome::NotStarted);
    match &outcome {
        ShutdownOutcome::Graceful => tracing::info!(addr, "metric server shut down"),
        ShutdownOutcome::TimedOut(wait) => tracing::error!(
            addr,
            grace_wait = ?wait,
            "shutdown metrics server: in-flight requests outlived the grace period"
        ),
        ShutdownOutcome::Failed(error) => {
            tracing::error!(addr, error, "shutdown metrics server")
        }
        ShutdownOutcome::NotStarted => tracing::info!(addr, "metric server was not running"),
    }

    outcome
}

impl MetricsServer {
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Handle of the shutdown task; resolves to the outcome it logged.
    pub fn take_shutdown_handle(&mut self) -> Option<JoinHandle<ShutdownOutcome>> {
        self.watcher.take()
    }

    /// Binds the configured address and serves until cancelled.
    pub async fn serve(self) -> MiddlewareResult<()> {
        let listener = TcpListener::bind(&self.addr).await.map_err(|e| {
            std::io::Error::new(e.kind(), format!("bind metrics server {}: {e}", self.addr))
        })?;
        self.serve_with_listener(listener).await
    }

    /// Serves on `listener` until cancelled. After cancellation no new
    /// connections are accepted and in-flight requests get `grace_wait`.
    pub async fn serve_with_listener(self, listener: TcpListener) -> MiddlewareResult<()> {
        let MetricsServer {
            router,
            cancel,
            grace_wait,
            outcome_tx,
            ..
        } = self;

        if let Ok(local) = listener.local_addr() {
            tracing::info!(addr = %local, "metric server listening");
        }

        let server = axum::serve(listener, router)
            .with_graceful_shutdown(cancel.clone().cancelled_owned())
            .into_future();
        let deadline = async {
            cancel.cancelled().await;
            tokio::time::sleep(grace_wait).await;
        };

        let (result, outcome) = tokio::select! {
            res = server => match res {
                Ok(()) => (Ok(()), ShutdownOutcome::Graceful),
                Err(e) => {
                    let outcome = ShutdownOutcome::Failed(e.to_string());
                    (Err(MiddlewareError::Io(e)), outcome)
                }
            },
            _ = deadline => (Ok(()), ShutdownOutcome::TimedOut(grace_wait)),
        };

        // the watcher may be gone already; nothing else to report to
        let _ = outcome_tx.send(outcome);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    fn opts() -> MetricsOptions {
        MetricsOptions::default()
            .with_addr("127.0.0.1:0")
            .with_grace_wait(Duration::from_millis(500))
    }

    #[test]
    fn test_needs_runtime() {
        let result = new_server(CancellationToken::new(), &opts());
        assert!(matches!(result, Err(MiddlewareError::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_options() {
        let result = new_server(CancellationToken::new(), &opts().with_pprof_path("x"));
        assert!(matches!(result, Err(MiddlewareError::Config(_))));
    }

    #[tokio::test]
    async fn test_cancel_stops_server_within_grace() {
        let cancel = CancellationToken::new();
        let mut server = new_server(cancel.clone(), &opts()).unwrap();
        let watcher = server.take_shutdown_handle().unwrap();
        assert!(server.take_shutdown_handle().is_none());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve_with_listener(listener));

        let resp = reqwest::get(format!("http://{addr}/metrics")).await.unwrap();
        assert!(resp.status().is_success());
        resp.text().await.unwrap();

        let resp = reqwest::get(format!("http://{addr}/pprof")).await.unwrap();
        assert!(resp.status().is_success());
        resp.text().await.unwrap();

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), serving)
            .await
            .expect("server should stop within the grace period")
            .unwrap();
        assert!(result.is_ok());

        let outcome = tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Graceful);

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_slow_request_outlives_grace_period() {
        let grace_wait = Duration::from_millis(200);
        let cancel = CancellationToken::new();
        let mut server = new_server(cancel.clone(), &opts().with_grace_wait(grace_wait)).unwrap();
        let watcher = server.take_shutdown_handle().unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = tokio::spawn(server.serve_with_listener(listener));

        let slow = tokio::spawn(reqwest::get(format!(
            "http://{addr}/pprof/profile?seconds=2&frequency=10"
        )));
        tokio::time::sleep(Duration::from_millis(300)).await;

        let started = std::time::Instant::now();
        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), serving)
            .await
            .expect("server should give up after the grace period")
            .unwrap();
        assert!(result.is_ok());
        assert!(started.elapsed() >= grace_wait);

        let outcome = tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::TimedOut(grace_wait));

        slow.abort();
    }

    #[tokio::test]
    async fn test_dropped_server_reports_not_started() {
        let cancel = CancellationToken::new();
        let mut server = new_server(cancel.clone(), &opts()).unwrap();
        let watcher = server.take_shutdown_handle().unwrap();
        drop(server);

        cancel.cancel();
        assert_eq!(watcher.await.unwrap(), ShutdownOutcome::NotStarted);
    }

    #[tokio::test]
    async fn test_serve_reports_bind_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let server = new_server(CancellationToken::new(), &opts().with_addr(addr)).unwrap();
        assert!(matches!(server.serve().await, Err(MiddlewareError::Io(_))));
    }
}
