use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jsonwebtoken::errors::ErrorKind;
use serde_json::json;

/// Why a token could not be turned into claims.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token not found: {0}")]
    Missing(String),

    #[error("token expired")]
    Expired,

    #[error("token invalidate: {0}")]
    Invalid(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::Invalid(err.to_string()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MiddlewareError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Auth(#[from] AuthError),

    #[error("try to generate token got error: {0}")]
    Sign(String),

    #[error("request context not found, is context_middleware installed?")]
    ContextMissing,

    #[error("Bad Request: {0}")]
    BadRequest(String),

    #[error("metrics: {0}")]
    Metrics(String),

    #[error("profiling: {0}")]
    Profiling(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl From<pprof::Error> for MiddlewareError {
    fn from(err: pprof::Error) -> Self {
        MiddlewareError::Profiling(err.to_string())
    }
}

impl IntoResponse for MiddlewareError {
    fn into_response(self) -> Response {
        let status = match &self {
            MiddlewareError::Auth(_) => StatusCode::UNAUTHORIZED,
            MiddlewareError::BadRequest(_) => StatusCode::BAD_REQUEST,
            MiddlewareError::Config(_)
            | MiddlewareError::Sign(_)
            | MiddlewareError::ContextMissing
            | MiddlewareError::Metrics(_)
            | MiddlewareError::Profiling(_)
            | MiddlewareError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

pub type MiddlewareResult<T> = Result<T, MiddlewareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_signature_is_distinguishable() {
        let err = jsonwebtoken::errors::Error::from(ErrorKind::ExpiredSignature);
        assert!(matches!(AuthError::from(err), AuthError::Expired));

        let err = jsonwebtoken::errors::Error::from(ErrorKind::InvalidSignature);
        assert!(matches!(AuthError::from(err), AuthError::Invalid(_)));
    }

    #[test]
    fn test_status_per_variant() {
        let resp = MiddlewareError::Auth(AuthError::Expired).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = MiddlewareError::Config("bad".into()).into_response();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let resp = MiddlewareError::BadRequest("seconds".into()).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
