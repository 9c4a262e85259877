use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::JwtConfig;
use crate::{Error, Result};

/// Bearer token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (caller identity)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
}

/// Signs and verifies the short-lived credentials presented when opening a
/// stream. Issuance normally happens elsewhere; `sign_token` serves the CLI
/// and tests.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: Arc<EncodingKey>,
    decoding_key: Arc<DecodingKey>,
    algorithm: Algorithm,
    token_ttl: Duration,
}

impl std::fmt::Debug for JwtService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtService")
            .field("algorithm", &self.algorithm)
            .field("token_ttl", &self.token_ttl)
            .finish()
    }
}

impl JwtService {
    /// Create an HS256 service from a shared secret
    pub fn new(secret: &[u8], token_ttl: Duration) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Configuration("JWT secret must not be empty".to_string()));
        }

        Ok(Self {
            encoding_key: Arc::new(EncodingKey::from_secret(secret)),
            decoding_key: Arc::new(DecodingKey::from_secret(secret)),
            algorithm: Algorithm::HS256,
            token_ttl,
        })
    }

    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        let minutes = i64::try_from(config.access_token_duration_minutes)
            .map_err(|_| Error::Configuration("Token duration out of range".to_string()))?;
        Self::new(config.secret.as_bytes(), Duration::minutes(minutes))
    }

    pub fn sign_token(&self, subject: &str) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now.timestamp(),
            exp: (now + self.token_ttl).timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|e| Error::Internal(format!("Failed to sign token: {e}")))
    }

    /// Verify a token and extract claims
    pub fn verify_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = true;
        validation.validate_nbf = false;
        validation.leeway = 60; // clock skew
        validation.required_spec_claims = ["exp", "sub"].iter().map(ToString::to_string).collect();

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Authentication("Token expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Error::Authentication("Invalid token signature".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    Error::Authentication("Invalid token".to_string())
                }
                _ => Error::Authentication(format!("Token verification failed: {e}")),
            })
    }

    /// Strip an optional `Bearer ` prefix and verify
    pub fn verify_bearer(&self, value: &str) -> Result<Claims> {
        let token = value
            .strip_prefix("Bearer ")
            .or_else(|| value.strip_prefix("bearer "))
            .unwrap_or(value)
            .trim();
        if token.is_empty() {
            return Err(Error::Authentication("Empty bearer token".to_string()));
        }
        self.verify_token(token)
    }
}
