use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::RequestContext;

pub const DEFAULT_TRACE_HEADER: &str = "uber-trace-id";
pub const DEFAULT_SPAN_HEADER: &str = "uber-span-id";

/// Where trace and span identifiers are looked up and stored.
///
/// The context keys default to the header names, so a value read from a
/// header and a value stored by an upstream middleware share one slot.
#[derive(Clone, Debug)]
pub struct TracingOptions {
    pub trace_header: HeaderName,
    pub span_header: HeaderName,
    pub trace_ctx_key: String,
    pub span_ctx_key: String,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            trace_header: HeaderName::from_static(DEFAULT_TRACE_HEADER),
            span_header: HeaderName::from_static(DEFAULT_SPAN_HEADER),
            trace_ctx_key: DEFAULT_TRACE_HEADER.to_string(),
            span_ctx_key: DEFAULT_SPAN_HEADER.to_string(),
        }
    }
}

impl TracingOptions {
    pub fn with_trace_header(mut self, name: HeaderName) -> Self {
        self.trace_header = name;
        self
    }

    pub fn with_span_header(mut self, name: HeaderName) -> Self {
        self.span_header = name;
        self
    }

    pub fn with_trace_ctx_key(mut self, key: impl Into<String>) -> Self {
        self.trace_ctx_key = key.into();
        self
    }

    pub fn with_span_ctx_key(mut self, key: impl Into<String>) -> Self {
        self.span_ctx_key = key.into();
        self
    }
}

/// Correlation ID of one request, usually `{trace}:{span}:{parent}:{flags}`.
///
/// Inbound values are kept verbatim, whatever their format.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TraceId(String);

impl TraceId {
    /// New Jaeger-style ID with random trace and span parts, no parent, sampled.
    pub fn generate() -> Self {
        let trace = Uuid::new_v4().as_u128();
        let span: u64 = rand::random();
        TraceId(format!("{trace:032x}:{span:016x}:0:1"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpanId(String);

impl SpanId {
    pub fn generate() -> Self {
        let span: u64 = rand::random();
        SpanId(format!("{span:016x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reads the stored value, else the inbound header, else generates one,
/// and stores the result so later lookups in the same request agree.
fn lookup_or_generate(
    ctx: &RequestContext,
    key: &str,
    header: &HeaderName,
    generate: impl FnOnce() -> String,
) -> String {
    let value = ctx
        .get_string(key)
        .or_else(|| {
            ctx.header(header)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        })
        .unwrap_or_else(generate);

    ctx.set(key, value.clone());
    value
}

pub fn trace_id(ctx: &RequestContext) -> TraceId {
    trace_id_with(ctx, &TracingOptions::default())
}

pub fn trace_id_with(ctx: &RequestContext, opts: &TracingOptions) -> TraceId {
    TraceId(lookup_or_generate(
        ctx,
        &opts.trace_ctx_key,
        &opts.trace_header,
        || TraceId::generate().0,
    ))
}

pub fn span_id(ctx: &RequestContext) -> SpanId {
    span_id_with(ctx, &TracingOptions::default())
}

pub fn span_id_with(ctx: &RequestContext, opts: &TracingOptions) -> SpanId {
    SpanId(lookup_or_generate(
        ctx,
        &opts.span_ctx_key,
        &opts.span_header,
        || SpanId::generate().0,
    ))
}

pub(crate) fn header_value(value: &str) -> Option<HeaderValue> {
    match HeaderValue::from_str(value) {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::debug!(value, "identifier is not a valid header value, not echoed");
            None
        }
    }
}

/// Middleware that assigns trace and span IDs to each request and echoes
/// them back as response headers.
pub async fn tracing_middleware(
    State(opts): State<Arc<TracingOptions>>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = RequestContext::ensure(&mut request);
    let trace = trace_id_with(&ctx, &opts);
    let span = span_id_with(&ctx, &opts);

    tracing::Span::current().record("trace_id", trace.as_str());

    let mut response = next.run(request).await;
    ctx.flush(&mut response);

    if let Some(v) = header_value(trace.as_str()) {
        response.headers_mut().insert(opts.trace_header.clone(), v);
    }
    if let Some(v) = header_value(span.as_str()) {
        response.headers_mut().insert(opts.span_header.clone(), v);
    }

    response
}
