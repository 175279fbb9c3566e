use tokio_util::sync::CancellationToken;

use axum_middlewares::demo::DemoConfig;
use axum_middlewares::{new_server, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_subscriber("info,axum_middlewares=debug");

    let config = DemoConfig::from_env().map_err(|e| {
        tracing::error!("Configuration error: {}", e);
        e
    })?;

    let cancel = CancellationToken::new();
    let mut server = new_server(cancel.clone(), &config.metrics_options())?;
    let shutdown = server.take_shutdown_handle();

    tokio::spawn(async move {
        shutdown_signal().await;
        cancel.cancel();
    });

    tracing::info!("start metrics server at {}", server.addr());
    server.serve().await?;

    // wait for the shutdown outcome to be logged
    if let Some(handle) = shutdown {
        let outcome = handle.await?;
        tracing::info!(?outcome, "exit");
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
