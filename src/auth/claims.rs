use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

/// Registered claims most callers need. Any serde type works as claims;
/// this one is a ready-made default.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StandardClaims {
    pub sub: String, // Subject, usually a user ID
    pub exp: i64,    // Expiration timestamp
    pub iat: i64,    // Issued at timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl StandardClaims {
    pub fn new(sub: impl Into<String>, expires_in: Duration) -> Self {
        let now = Utc::now().timestamp();
        Self {
            sub: sub.into(),
            exp: now + expires_in.num_seconds(),
            iat: now,
            iss: None,
        }
    }

    pub fn with_issuer(mut self, iss: impl Into<String>) -> Self {
        self.iss = Some(iss.into());
        self
    }
}
