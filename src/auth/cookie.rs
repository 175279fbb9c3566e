use axum::http::{header, HeaderValue};
use cookie::{time, Cookie};

use crate::context::RequestContext;
use crate::{MiddlewareError, MiddlewareResult};

pub const DEFAULT_COOKIE_PATH: &str = "/";
pub const DEFAULT_COOKIE_SECURE: bool = false;
pub const DEFAULT_COOKIE_HTTP_ONLY: bool = false;

/// Overrides for the attributes of a cookie written to the response.
///
/// Anything left unset falls back to path `/`, not secure, not httpOnly,
/// the request's own host, and the caller's default max-age.
#[derive(Clone, Debug, Default)]
pub struct CookieOptions {
    max_age: Option<i64>,
    path: Option<String>,
    host: Option<String>,
    secure: Option<bool>,
    http_only: Option<bool>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Max-age in seconds. Negative values are rejected when the cookie is written.
    pub fn max_age(mut self, secs: i64) -> Self {
        self.max_age = Some(secs);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        let path = path.into();
        tracing::debug!(path, "set auth cookie path");
        self.path = Some(path);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        tracing::debug!(host, "set auth cookie host");
        self.host = Some(host);
        self
    }

    pub fn secure(mut self, secure: bool) -> Self {
        tracing::debug!(secure, "set auth cookie secure");
        self.secure = Some(secure);
        self
    }

    pub fn http_only(mut self, http_only: bool) -> Self {
        tracing::debug!(http_only, "set auth cookie httpOnly");
        self.http_only = Some(http_only);
        self
    }

    pub(crate) fn resolve(
        self,
        ctx: &RequestContext,
        default_max_age: i64,
    ) -> MiddlewareResult<ResolvedCookie> {
        let max_age = self.max_age.unwrap_or(default_max_age);
        if max_age < 0 {
            return Err(MiddlewareError::Config(format!(
                "maxAge should not less than 0, got {max_age}"
            )));
        }

        Ok(ResolvedCookie {
            max_age,
            path: self.path.unwrap_or_else(|| DEFAULT_COOKIE_PATH.to_string()),
            host: self.host.unwrap_or_else(|| default_host(ctx)),
            secure: self.secure.unwrap_or(DEFAULT_COOKIE_SECURE),
            http_only: self.http_only.unwrap_or(DEFAULT_COOKIE_HTTP_ONLY),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResolvedCookie {
    pub max_age: i64,
    pub path: String,
    pub host: String,
    pub secure: bool,
    pub http_only: bool,
}

impl ResolvedCookie {
    /// `Set-Cookie` value. A max-age of 0 leaves the attribute out, and the
    /// port is dropped from the domain since cookies are not port scoped.
    pub fn render(&self, name: &str, value: &str) -> MiddlewareResult<HeaderValue> {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .path(self.path.clone())
            .secure(self.secure)
            .http_only(self.http_only);

        if self.max_age > 0 {
            builder = builder.max_age(time::Duration::seconds(self.max_age));
        }

        let domain = strip_port(&self.host);
        if !domain.is_empty() {
            builder = builder.domain(domain.to_string());
        }

        HeaderValue::from_str(&builder.build().to_string())
            .map_err(|e| MiddlewareError::Config(format!("invalid cookie {name}: {e}")))
    }
}

/// Request host, with the URI port appended when the host lacks one.
fn default_host(ctx: &RequestContext) -> String {
    let mut host = ctx.host();
    if let Some(port) = ctx.uri().port_u16() {
        if !host.is_empty() && strip_port(&host) == host {
            host = format!("{host}:{port}");
        }
    }
    host
}

fn strip_port(host: &str) -> &str {
    // bracketed IPv6, e.g. [::1]:8080
    if let Some(end) = host.find(']') {
        return &host[..=end];
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Queues a `Set-Cookie` for `name` on the response of the request behind `ctx`.
pub fn set_cookie(
    ctx: &RequestContext,
    name: &str,
    value: &str,
    opts: CookieOptions,
) -> MiddlewareResult<()> {
    let cookie = opts.resolve(ctx, 0)?;
    ctx.append_response_header(header::SET_COOKIE, cookie.render(name, value)?);
    Ok(())
}
