use axum::{
    body::HttpBody,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use colored::Colorize;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{field, Span};

use crate::context::RequestContext;
use crate::trace::{header_value, trace_id_with, TracingOptions};
use crate::MiddlewareError;

pub const DEFAULT_CTX_KEY_LOGGER: &str = "mw-logger";

/// Level of the per-request record. Only debug and info are supported.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    #[default]
    Debug,
    Info,
}

impl FromStr for LogLevel {
    type Err = MiddlewareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            other => Err(MiddlewareError::Config(format!(
                "log level should be debug or info, got {other}"
            ))),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggerOptions {
    /// Parent of every request span when no logger is found in the context.
    pub logger: Span,
    pub colored: bool,
    pub level: LogLevel,
    pub ctx_key_logger: String,
    pub tracing: TracingOptions,
}

impl Default for LoggerOptions {
    fn default() -> Self {
        Self {
            logger: Span::none(),
            colored: false,
            level: LogLevel::Debug,
            ctx_key_logger: DEFAULT_CTX_KEY_LOGGER.to_string(),
            tracing: TracingOptions::default(),
        }
    }
}

impl LoggerOptions {
    pub fn colored(mut self) -> Self {
        self.colored = true;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_logger(mut self, logger: Span) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_logger_ctx_key(mut self, key: impl Into<String>) -> Self {
        self.ctx_key_logger = key.into();
        self
    }

    pub fn with_tracing(mut self, tracing: TracingOptions) -> Self {
        self.tracing = tracing;
        self
    }
}

/// Stores `logger` as the request's logger under the default key.
pub fn set_logger(ctx: &RequestContext, logger: Span) {
    ctx.set(DEFAULT_CTX_KEY_LOGGER, logger);
}

/// Logger of the current request, or the current span outside one.
pub fn get_logger(ctx: &RequestContext) -> Span {
    get_logger_with_key(ctx, DEFAULT_CTX_KEY_LOGGER)
}

pub fn get_logger_with_key(ctx: &RequestContext, key: &str) -> Span {
    ctx.get::<Span>(key)
        .filter(|span| !span.is_none())
        .unwrap_or_else(Span::current)
}

/// Middleware that emits one record per request with its latency and sizes.
pub async fn logger_middleware(
    State(opts): State<Arc<LoggerOptions>>,
    mut request: Request,
    next: Next,
) -> Response {
    let start = Instant::now();
    let ctx = RequestContext::ensure(&mut request);
    let trace = trace_id_with(&ctx, &opts.tracing);

    let parent = ctx
        .get::<Span>(&opts.ctx_key_logger)
        .filter(|span| !span.is_none())
        .unwrap_or_else(|| opts.logger.clone());

    let remote = ctx
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_default();
    let span = tracing::info_span!(
        parent: &parent,
        "request",
        url = %ctx.uri(),
        remote = %remote,
        host = %ctx.host(),
        trace_id = %trace,
        cost = field::Empty,
        request_size = field::Empty,
        response_size = field::Empty
    );

    let method = ctx.method().clone();
    if logs_request_size(&method) {
        let size = ctx
            .header(header::CONTENT_LENGTH)
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        span.record("request_size", human_bytes(size).as_str());
    }

    ctx.set(opts.ctx_key_logger.clone(), span.clone());

    let mut response = next.run(request).await;
    ctx.flush(&mut response);

    if let Some(v) = header_value(trace.as_str()) {
        response
            .headers_mut()
            .insert(opts.tracing.trace_header.clone(), v);
    }

    span.record("cost", cost_secs(start.elapsed()).as_str());
    span.record("response_size", human_bytes(response_size(&response)).as_str());

    let status = if opts.colored {
        colored_status(response.status(), &method)
    } else {
        plain_status(response.status(), &method)
    };

    match opts.level {
        LogLevel::Info => tracing::info!(parent: &span, "{}", status),
        LogLevel::Debug => tracing::debug!(parent: &span, "{}", status),
    }

    response
}

fn logs_request_size(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

pub(crate) fn response_size(response: &Response) -> u64 {
    response
        .body()
        .size_hint()
        .exact()
        .or_else(|| {
            response
                .headers()
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0)
}

fn plain_status(status: StatusCode, method: &Method) -> String {
    format!("{} {}", status.as_u16(), method)
}

// Color goes into the message; structured field values get escaped.
fn colored_status(status: StatusCode, method: &Method) -> String {
    let text = plain_status(status, method);
    match status.as_u16() / 100 {
        2 => text.green().to_string(),
        4 => text.yellow().to_string(),
        5 => text.red().to_string(),
        _ => text.cyan().to_string(),
    }
}

fn cost_secs(elapsed: Duration) -> String {
    format!("{:.3}s", elapsed.as_secs_f64())
}

/// SI byte count, e.g. `999 B`, `1.5 kB`, `2.0 MB`.
pub fn human_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1000;
    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}
