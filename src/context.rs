use axum::{
    extract::{ConnectInfo, FromRequestParts, Request},
    http::{header, request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, Method, Uri},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::CookieJar;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::{MiddlewareError, MiddlewareResult};

type Value = Box<dyn Any + Send + Sync>;

struct PendingHeader {
    name: HeaderName,
    value: HeaderValue,
    replace: bool,
}

struct Inner {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    remote_addr: Option<SocketAddr>,
    values: Mutex<HashMap<String, Value>>,
    pending: Mutex<Vec<PendingHeader>>,
}

/// Per-request handle shared by the middlewares and the handler of one request.
///
/// Holds a snapshot of the inbound request (method, URI, headers, peer address),
/// a string-keyed value store for request-scoped values (logger, trace ID,
/// span ID), and a queue of response headers that is flushed onto the
/// response once the handler chain returns.
///
/// Handlers reach it through the extractor:
///
/// ```ignore
/// async fn handler(ctx: RequestContext) -> String {
///     ctx.header("user-agent").unwrap_or_default().to_string()
/// }
/// ```
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.inner.method)
            .field("uri", &self.inner.uri)
            .field("remote_addr", &self.inner.remote_addr)
            .finish_non_exhaustive()
    }
}

impl RequestContext {
    pub fn new<B>(request: &axum::http::Request<B>) -> Self {
        let remote_addr = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0);

        Self {
            inner: Arc::new(Inner {
                method: request.method().clone(),
                uri: request.uri().clone(),
                headers: request.headers().clone(),
                remote_addr,
                values: Mutex::new(HashMap::new()),
                pending: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Returns the context already attached to `request`, or attaches a new one.
    pub fn ensure(request: &mut Request) -> Self {
        if let Some(ctx) = request.extensions().get::<RequestContext>() {
            return ctx.clone();
        }

        let ctx = RequestContext::new(request);
        request.extensions_mut().insert(ctx.clone());
        ctx
    }

    pub fn from_extensions(extensions: &Extensions) -> MiddlewareResult<Self> {
        extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or(MiddlewareError::ContextMissing)
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn uri(&self) -> &Uri {
        &self.inner.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn header(&self, name: impl header::AsHeaderName) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Host as sent by the client, falling back to the URI authority.
    pub fn host(&self) -> String {
        self.header(header::HOST)
            .map(str::to_string)
            .or_else(|| self.inner.uri.host().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    pub fn cookie(&self, name: &str) -> Option<String> {
        CookieJar::from_headers(&self.inner.headers)
            .get(name)
            .map(|c| c.value().to_string())
    }

    pub fn set<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.inner.values.lock().insert(key.into(), Box::new(value));
    }

    /// Returns the value stored under `key` if it has type `T`.
    pub fn get<T>(&self, key: &str) -> Option<T>
    where
        T: Any + Clone,
    {
        self.inner
            .values
            .lock()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get::<String>(key).filter(|s| !s.is_empty())
    }

    /// Queues a header that replaces any value of the same name on the response.
    pub fn set_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.pending.lock().push(PendingHeader {
            name,
            value,
            replace: true,
        });
    }

    /// Queues a header appended next to existing values, e.g. `Set-Cookie`.
    pub fn append_response_header(&self, name: HeaderName, value: HeaderValue) {
        self.inner.pending.lock().push(PendingHeader {
            name,
            value,
            replace: false,
        });
    }

    /// Moves queued headers onto `response`. Later calls only see headers
    /// queued since the previous flush.
    pub fn flush(&self, response: &mut Response) {
        let pending = std::mem::take(&mut *self.inner.pending.lock());
        let headers = response.headers_mut();
        for h in pending {
            if h.replace {
                headers.insert(h.name, h.value);
            } else {
                headers.append(h.name, h.value);
            }
        }
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = MiddlewareError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        std::future::ready(RequestContext::from_extensions(&parts.extensions))
    }
}

/// Middleware that makes a [`RequestContext`] reachable from every handler
/// and flushes the response headers queued on it.
pub async fn context_middleware(mut request: Request, next: Next) -> Response {
    let ctx = RequestContext::ensure(&mut request);

    let mut response = next.run(request).await;
    ctx.flush(&mut response);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn request(uri: &str) -> Request {
        axum::http::Request::builder()
            .uri(uri)
            .header(header::HOST, "example.com:3000")
            .header(header::COOKIE, "token=abc; other=1")
            .body(Body::empty())
            .unwrap()
    }

    #[test]
    fn test_snapshot_of_request() {
        let ctx = RequestContext::new(&request("/hello?x=1"));

        assert_eq!(*ctx.method(), Method::GET);
        assert_eq!(ctx.uri().path(), "/hello");
        assert_eq!(ctx.host(), "example.com:3000");
        assert_eq!(ctx.cookie("token").as_deref(), Some("abc"));
        assert_eq!(ctx.cookie("missing"), None);
        assert!(ctx.remote_addr().is_none());
    }

    #[test]
    fn test_values_are_typed() {
        let ctx = RequestContext::new(&request("/"));
        ctx.set("trace", "abc".to_string());
        ctx.set("count", 3_u32);

        assert_eq!(ctx.get_string("trace").as_deref(), Some("abc"));
        assert_eq!(ctx.get::<u32>("count"), Some(3));
        assert_eq!(ctx.get::<String>("count"), None);
        assert_eq!(ctx.get_string("nope"), None);
    }

    #[test]
    fn test_ensure_reuses_existing_context() {
        let mut req = request("/");
        let first = RequestContext::ensure(&mut req);
        first.set("k", "v".to_string());

        let second = RequestContext::ensure(&mut req);
        assert_eq!(second.get_string("k").as_deref(), Some("v"));
    }

    #[test]
    fn test_missing_context_is_an_error() {
        let req = request("/");
        let err = RequestContext::from_extensions(req.extensions()).unwrap_err();
        assert!(matches!(err, MiddlewareError::ContextMissing));
    }

    #[tokio::test]
    async fn test_queued_headers_reach_response() {
        async fn handler(ctx: RequestContext) -> &'static str {
            ctx.set_response_header(
                HeaderName::from_static("x-one"),
                HeaderValue::from_static("1"),
            );
            ctx.append_response_header(header::SET_COOKIE, HeaderValue::from_static("a=1"));
            ctx.append_response_header(header::SET_COOKIE, HeaderValue::from_static("b=2"));
            "ok"
        }

        let app = Router::new()
            .route("/", get(handler))
            .layer(middleware::from_fn(context_middleware));

        let resp = app.oneshot(request("/")).await.unwrap();
        assert_eq!(resp.headers()["x-one"], "1");
        let cookies: Vec<_> = resp.headers().get_all(header::SET_COOKIE).iter().collect();
        assert_eq!(cookies.len(), 2);
    }

    #[tokio::test]
    async fn test_extractor_rejects_without_bridge() {
        async fn handler(_ctx: RequestContext) -> &'static str {
            "ok"
        }

        let app = Router::new().route("/", get(handler));
        let resp = app.oneshot(request("/")).await.unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    }
}
