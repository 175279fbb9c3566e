pub mod claims;
pub mod cookie;
pub mod jwt;

use axum::http::{header, HeaderValue};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use self::claims::StandardClaims;
pub use self::cookie::{set_cookie, CookieOptions};
pub use self::jwt::{JwtSigner, TokenSigner};

use crate::context::RequestContext;
use crate::{AuthError, MiddlewareError, MiddlewareResult};

pub const DEFAULT_TOKEN_NAME: &str = "token";
const AUTH_HEADER_PREFIX: &str = "Bearer";

pub fn default_expire_duration() -> chrono::Duration {
    chrono::Duration::days(7)
}

/// Where [`Auth::user_claims`] looks for the token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TokenSource {
    /// `Authorization: Bearer <token>`
    Header,
    /// Cookie named after the auth token name.
    Cookie,
    /// Cookie first, then the header.
    #[default]
    Either,
}

pub struct AuthBuilder {
    secret: Vec<u8>,
    signer: Option<Arc<dyn TokenSigner>>,
    expire: chrono::Duration,
    token_name: String,
    source: TokenSource,
}

impl AuthBuilder {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
            signer: None,
            expire: default_expire_duration(),
            token_name: DEFAULT_TOKEN_NAME.to_string(),
            source: TokenSource::default(),
        }
    }

    /// Lifetime of issued auth cookies.
    pub fn expire_duration(mut self, d: chrono::Duration) -> Self {
        self.expire = d;
        self
    }

    pub fn token_name(mut self, name: impl Into<String>) -> Self {
        self.token_name = name.into();
        self
    }

    pub fn token_source(mut self, source: TokenSource) -> Self {
        self.source = source;
        self
    }

    /// Replaces the default HS256 signer built from the secret.
    pub fn signer(mut self, signer: impl TokenSigner + 'static) -> Self {
        self.signer = Some(Arc::new(signer));
        self
    }

    pub fn build(self) -> MiddlewareResult<Auth> {
        if self.expire < chrono::Duration::zero() {
            return Err(MiddlewareError::Config(format!(
                "duration should not less than 0, got {}",
                self.expire
            )));
        }

        if self.token_name.is_empty() {
            return Err(MiddlewareError::Config("token name is empty".to_string()));
        }

        let signer = match self.signer {
            Some(signer) => signer,
            None if self.secret.is_empty() => {
                return Err(MiddlewareError::Config(
                    "try to create Auth got error: secret is empty".to_string(),
                ))
            }
            None => Arc::new(JwtSigner::hs256(&self.secret)),
        };

        Ok(Auth {
            signer,
            expire: self.expire,
            token_name: self.token_name,
            source: self.source,
        })
    }
}

/// JWT token generator and validator.
///
/// Tokens are read from the `Authorization` header and/or a cookie named
/// `token`, and issued into either of them.
#[derive(Clone)]
pub struct Auth {
    signer: Arc<dyn TokenSigner>,
    expire: chrono::Duration,
    token_name: String,
    source: TokenSource,
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("expire", &self.expire)
            .field("token_name", &self.token_name)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// What to issue: claims to sign, or an already signed token. Exactly one
/// of the two must be set.
pub struct Issue<C> {
    claims: Option<C>,
    token: Option<String>,
}

impl<C> Default for Issue<C> {
    fn default() -> Self {
        Self {
            claims: None,
            token: None,
        }
    }
}

impl<C: Serialize> Issue<C> {
    pub fn signed(claims: C) -> Self {
        Self::default().claims(claims)
    }

    pub fn claims(mut self, claims: C) -> Self {
        self.claims = Some(claims);
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn into_token(self, auth: &Auth) -> MiddlewareResult<String> {
        match (self.claims, self.token) {
            (Some(_), Some(_)) => Err(MiddlewareError::Config(
                "claim and token should not be set at the same time".to_string(),
            )),
            (None, None) => Err(MiddlewareError::Config(
                "claim or token should be set".to_string(),
            )),
            (None, Some(token)) if token.is_empty() => {
                Err(MiddlewareError::Config("token is empty".to_string()))
            }
            (None, Some(token)) => Ok(token),
            (Some(claims), None) => auth.sign(&claims),
        }
    }
}

impl Issue<Value> {
    pub fn presigned(token: impl Into<String>) -> Self {
        Self::default().token(token)
    }
}

impl Auth {
    pub fn new(secret: impl AsRef<[u8]>) -> MiddlewareResult<Self> {
        AuthBuilder::new(secret).build()
    }

    pub fn builder(secret: impl AsRef<[u8]>) -> AuthBuilder {
        AuthBuilder::new(secret)
    }

    pub fn expire_duration(&self) -> chrono::Duration {
        self.expire
    }

    pub fn sign<C: Serialize>(&self, claims: &C) -> MiddlewareResult<String> {
        let value = serde_json::to_value(claims)
            .map_err(|e| MiddlewareError::Sign(format!("serialize claims: {e}")))?;
        self.signer.sign(&value)
    }

    pub fn parse<C: DeserializeOwned>(&self, token: &str) -> MiddlewareResult<C> {
        let value = self.signer.parse(token)?;
        serde_json::from_value(value)
            .map_err(|e| AuthError::Invalid(format!("decode claims: {e}")).into())
    }

    /// Raw token carried by the request, per the configured [`TokenSource`].
    pub fn token_from_request(&self, ctx: &RequestContext) -> Result<String, AuthError> {
        let token = match self.source {
            TokenSource::Header => token_from_header(ctx),
            TokenSource::Cookie => ctx.cookie(&self.token_name),
            TokenSource::Either => ctx
                .cookie(&self.token_name)
                .filter(|t| !t.is_empty())
                .or_else(|| token_from_header(ctx)),
        };

        token.filter(|t| !t.is_empty()).ok_or_else(|| {
            AuthError::Missing(format!(
                "no {} cookie or {} header",
                self.token_name,
                header::AUTHORIZATION
            ))
        })
    }

    /// Validates the request's token and returns its claims.
    pub fn user_claims<C: DeserializeOwned>(&self, ctx: &RequestContext) -> MiddlewareResult<C> {
        let token = self.token_from_request(ctx)?;
        self.parse(&token)
    }

    /// Writes `Authorization: Bearer <token>` to the response and returns the token.
    pub fn set_auth_header<C: Serialize>(
        &self,
        ctx: &RequestContext,
        issue: Issue<C>,
    ) -> MiddlewareResult<String> {
        let token = issue.into_token(self)?;
        let value = HeaderValue::from_str(&format!("{AUTH_HEADER_PREFIX} {token}"))
            .map_err(|e| MiddlewareError::Sign(format!("token is not a valid header: {e}")))?;

        ctx.set_response_header(header::AUTHORIZATION, value);
        Ok(token)
    }

    /// Writes the token cookie to the response and returns the token.
    ///
    /// The cookie's max-age defaults to the auth expiry.
    pub fn set_login_cookie<C: Serialize>(
        &self,
        ctx: &RequestContext,
        issue: Issue<C>,
        opts: CookieOptions,
    ) -> MiddlewareResult<String> {
        tracing::debug!(name = %self.token_name, "set login cookie");
        let cookie = opts.resolve(ctx, self.expire.num_seconds())?;
        let token = issue.into_token(self)?;

        ctx.append_response_header(header::SET_COOKIE, cookie.render(&self.token_name, &token)?);
        Ok(token)
    }
}

fn token_from_header(ctx: &RequestContext) -> Option<String> {
    if let Some(auth) = ctx.headers().typed_get::<Authorization<Bearer>>() {
        return Some(auth.token().to_string());
    }

    // tokens sent without the scheme are taken as is
    ctx.header(header::AUTHORIZATION)
        .map(|v| v.trim())
        .filter(|v| !v.starts_with(AUTH_HEADER_PREFIX))
        .map(str::to_string)
}
