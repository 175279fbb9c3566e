//! Middleware helpers for axum services: JWT auth in cookies or headers,
//! per-request logging with trace correlation, trace/span ID propagation,
//! and Prometheus metrics plus CPU profiling endpoints.

pub mod auth;
pub mod context;
pub mod demo;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod telemetry;
pub mod trace;

pub use auth::{Auth, AuthBuilder, CookieOptions, Issue, StandardClaims, TokenSource};
pub use context::{context_middleware, RequestContext};
pub use error::{AuthError, MiddlewareError, MiddlewareResult};
pub use self::metrics::{enable, new_server, MetricsOptions, MetricsServer, ShutdownOutcome};
pub use middleware::{logger_middleware, LogLevel, LoggerOptions};
pub use trace::{span_id, trace_id, tracing_middleware, SpanId, TraceId, TracingOptions};
