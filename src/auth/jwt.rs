use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value;

use crate::{AuthError, MiddlewareError, MiddlewareResult};

/// Signs and verifies tokens on behalf of [`Auth`](super::Auth).
///
/// Claims travel as JSON values so the trait stays object safe; `Auth`
/// converts them from and to the caller's claims type.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, claims: &Value) -> MiddlewareResult<String>;

    fn parse(&self, token: &str) -> Result<Value, AuthError>;
}

/// `jsonwebtoken` backed signer.
#[derive(Clone)]
pub struct JwtSigner {
    header: Header,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtSigner {
    pub fn new(algorithm: Algorithm, encoding_key: EncodingKey, decoding_key: DecodingKey) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = true;

        Self {
            header: Header::new(algorithm),
            encoding_key,
            decoding_key,
            validation,
        }
    }

    pub fn hs256(secret: &[u8]) -> Self {
        Self::new(
            Algorithm::HS256,
            EncodingKey::from_secret(secret),
            DecodingKey::from_secret(secret),
        )
    }

    /// Replaces the validation rules, e.g. to require an issuer.
    pub fn with_validation(mut self, validation: Validation) -> Self {
        self.validation = validation;
        self
    }
}

impl TokenSigner for JwtSigner {
    fn sign(&self, claims: &Value) -> MiddlewareResult<String> {
        encode(&self.header, claims, &self.encoding_key)
            .map_err(|e| MiddlewareError::Sign(e.to_string()))
    }

    fn parse(&self, token: &str) -> Result<Value, AuthError> {
        let data = decode::<Value>(token, &self.decoding_key, &self.validation)?;
        Ok(data.claims)
    }
}
