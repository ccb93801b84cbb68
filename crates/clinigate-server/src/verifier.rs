//! Bearer token verification against the identity provider.
//!
//! Every request outside the public allowlist carries a caller-supplied
//! bearer token. The verifier resolves it to a caller identity and a
//! tenant; a token without a tenant claim is rejected even when the
//! token itself is valid.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use clinigate_core::{AuthError, CallerId, TenantId};

use crate::config::AuthConfig;

/// Identity resolved from a verified token.
#[derive(Debug, Clone)]
pub struct VerifiedCaller {
    pub tenant: TenantId,
    pub caller: CallerId,
}

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<VerifiedCaller, AuthError>;
}

/// Verifier that delegates to the platform's `/auth/v1/user` endpoint.
pub struct HttpVerifier {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpVerifier {
    pub fn new(config: &AuthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn tenant_claim(user: &Value) -> Option<&str> {
        user.pointer("/user_metadata/clinic_id")
            .and_then(Value::as_str)
            .or_else(|| user.pointer("/app_metadata/clinic_id").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }
}

#[async_trait]
impl TokenVerifier for HttpVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedCaller, AuthError> {
        let response = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "identity provider unreachable");
                AuthError::InvalidToken
            })?;

        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), "token rejected by identity provider");
            return Err(AuthError::InvalidToken);
        }

        let user: Value = response.json().await.map_err(|e| {
            tracing::warn!(error = %e, "unreadable identity provider response");
            AuthError::InvalidToken
        })?;

        let caller = user
            .get("id")
            .and_then(Value::as_str)
            .ok_or(AuthError::InvalidToken)?;
        let tenant = Self::tenant_claim(&user).ok_or(AuthError::MissingTenant)?;

        Ok(VerifiedCaller {
            tenant: TenantId::new(tenant),
            caller: CallerId::new(caller),
        })
    }
}

/// In-process verifier with a fixed token table, for tests.
#[derive(Default)]
pub struct StaticVerifier {
    identities: HashMap<String, (Option<TenantId>, CallerId)>,
}

impl StaticVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        tenant: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        self.identities.insert(
            token.into(),
            (Some(TenantId::new(tenant)), CallerId::new(caller)),
        );
        self
    }

    /// Registers a valid token whose identity carries no tenant claim.
    pub fn with_tenantless_token(
        mut self,
        token: impl Into<String>,
        caller: impl Into<String>,
    ) -> Self {
        self.identities
            .insert(token.into(), (None, CallerId::new(caller)));
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticVerifier {
    async fn verify(&self, token: &str) -> Result<VerifiedCaller, AuthError> {
        match self.identities.get(token) {
            Some((Some(tenant), caller)) => Ok(VerifiedCaller {
                tenant: tenant.clone(),
                caller: caller.clone(),
            }),
            Some((None, _)) => Err(AuthError::MissingTenant),
            None => Err(AuthError::InvalidToken),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_for(server: &MockServer) -> AuthConfig {
        AuthConfig {
            base_url: server.uri(),
            api_key: "anon-key".to_string(),
            timeout_ms: 2_000,
        }
    }

    #[tokio::test]
    async fn resolves_tenant_from_user_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-1",
                "user_metadata": { "clinic_id": "clinic-a" }
            })))
            .mount(&server)
            .await;

        let verifier = HttpVerifier::new(&config_for(&server)).unwrap();
        let caller = verifier.verify("tok-1").await.unwrap();
        assert_eq!(caller.tenant.as_str(), "clinic-a");
        assert_eq!(caller.caller.as_str(), "user-1");
    }

    #[tokio::test]
    async fn falls_back_to_app_metadata() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-2",
                "user_metadata": {},
                "app_metadata": { "clinic_id": "clinic-b" }
            })))
            .mount(&server)
            .await;

        let verifier = HttpVerifier::new(&config_for(&server)).unwrap();
        let caller = verifier.verify("tok-2").await.unwrap();
        assert_eq!(caller.tenant.as_str(), "clinic-b");
    }

    #[tokio::test]
    async fn missing_tenant_claim_is_distinguished_from_bad_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "user-3",
                "user_metadata": {}
            })))
            .mount(&server)
            .await;

        let verifier = HttpVerifier::new(&config_for(&server)).unwrap();
        assert!(matches!(
            verifier.verify("tok-3").await,
            Err(AuthError::MissingTenant)
        ));
    }

    #[tokio::test]
    async fn provider_rejection_maps_to_invalid_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "message": "invalid JWT"
            })))
            .mount(&server)
            .await;

        let verifier = HttpVerifier::new(&config_for(&server)).unwrap();
        assert!(matches!(
            verifier.verify("expired").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn unreachable_provider_maps_to_invalid_token() {
        let config = AuthConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            api_key: String::new(),
            timeout_ms: 500,
        };
        let verifier = HttpVerifier::new(&config).unwrap();
        assert!(matches!(
            verifier.verify("tok").await,
            Err(AuthError::InvalidToken)
        ));
    }

    #[tokio::test]
    async fn static_verifier_covers_all_outcomes() {
        let verifier = StaticVerifier::new()
            .with_token("good", "clinic-a", "user-1")
            .with_tenantless_token("orphan", "user-2");

        assert!(verifier.verify("good").await.is_ok());
        assert!(matches!(
            verifier.verify("orphan").await,
            Err(AuthError::MissingTenant)
        ));
        assert!(matches!(
            verifier.verify("unknown").await,
            Err(AuthError::InvalidToken)
        ));
    }
}
