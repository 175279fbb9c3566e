use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use axum_middlewares::demo::DemoConfig;
use axum_middlewares::{
    context_middleware, enable, logger_middleware, telemetry, tracing_middleware, Auth,
    CookieOptions, Issue, MiddlewareResult, RequestContext, StandardClaims, TracingOptions,
};

#[derive(Clone)]
struct AppState {
    auth: Auth,
}

#[derive(Deserialize)]
struct LoginRequest {
    user_id: String,
}

async fn login(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    ctx: RequestContext,
    Json(body): Json<LoginRequest>,
) -> MiddlewareResult<Json<Value>> {
    let claims = StandardClaims::new(body.user_id, state.auth.expire_duration());
    let token = state
        .auth
        .set_login_cookie(&ctx, Issue::signed(claims), CookieOptions::new().http_only(true))?;

    tracing::info!(parent: &axum_middlewares::middleware::get_logger(&ctx), "user logged in");
    Ok(Json(json!({ "token": token })))
}

async fn me(
    axum::extract::State(state): axum::extract::State<Arc<AppState>>,
    ctx: RequestContext,
) -> Result<Json<StandardClaims>, (StatusCode, Json<Value>)> {
    // the caller decides how auth failures are answered
    state.auth.user_claims::<StandardClaims>(&ctx).map(Json).map_err(|e| {
        tracing::warn!(error = %e, "user invalidate");
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": e.to_string() })))
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    telemetry::init_subscriber("info,axum_middlewares=debug,demo_router=debug");

    let config = DemoConfig::from_env().map_err(|e| {
        tracing::error!("Configuration error: {}", e);
        e
    })?;

    let state = Arc::new(AppState {
        auth: Auth::new(&config.auth_secret)?,
    });

    let app = Router::new()
        .route("/login", post(login))
        .route("/me", get(me))
        .with_state(state);

    // pprof and metrics share the application port
    let app = enable(app, &config.metrics_options())?
        .layer(middleware::from_fn_with_state(
            Arc::new(config.logger_options()),
            logger_middleware,
        ))
        .layer(middleware::from_fn_with_state(
            Arc::new(TracingOptions::default()),
            tracing_middleware,
        ))
        .layer(middleware::from_fn(context_middleware));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
