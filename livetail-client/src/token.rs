use async_trait::async_trait;
use livetail_core::auth::JwtService;

use crate::ConnectorError;

/// Supplies a credential before every connection attempt
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String, ConnectorError>;
}

/// Always hands out the same token
#[derive(Debug, Clone)]
pub struct StaticToken(pub String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String, ConnectorError> {
        Ok(self.0.clone())
    }
}

/// Signs a fresh short-lived token per attempt with a shared secret
#[derive(Debug, Clone)]
pub struct JwtTokenProvider {
    jwt_service: JwtService,
    subject: String,
}

impl JwtTokenProvider {
    pub fn new(jwt_service: JwtService, subject: impl Into<String>) -> Self {
        Self {
            jwt_service,
            subject: subject.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for JwtTokenProvider {
    async fn token(&self) -> Result<String, ConnectorError> {
        self.jwt_service
            .sign_token(&self.subject)
            .map_err(|e| ConnectorError::Credential(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_jwt_provider_signs_verifiable_tokens() {
        let jwt = JwtService::new(b"client-test-secret-0123", chrono::Duration::minutes(5)).unwrap();
        let provider = JwtTokenProvider::new(jwt.clone(), "tail-cli");

        let token = provider.token().await.unwrap();
        assert_eq!(jwt.verify_token(&token).unwrap().sub, "tail-cli");
    }
}
