use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::jwt::jwks::JwksService;

/// Downstream JWTs are deliberately short-lived.
pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 60;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    /// Resolved permissions: `<entity-tag> -> <juju-permission>`.
    pub access: BTreeMap<String, String>,
}

/// Mints RS256 JWTs asserting a caller's identity and resolved permissions
/// for a specific downstream controller.
pub struct JwtService {
    jwks: Arc<JwksService>,
    issuer: String,
    lifetime: Duration,
}

impl JwtService {
    pub fn new(jwks: Arc<JwksService>, issuer: impl Into<String>) -> Self {
        JwtService {
            jwks,
            issuer: issuer.into(),
            lifetime: Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS),
        }
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Mint a token for `subject` addressed to controller `audience`.
    /// Returns the serialized token and its expiry.
    pub async fn mint(
        &self,
        now: DateTime<Utc>,
        subject: &str,
        audience: &Uuid,
        access: BTreeMap<String, String>,
    ) -> Result<(String, DateTime<Utc>), DomainError> {
        let (kid, key) = self.jwks.signing_key().await?;
        let expiry = now + self.lifetime;
        let claims = Claims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: audience.to_string(),
            exp: expiry.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            access,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid);
        let token = jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| DomainError::Internal(format!("signing JWT: {}", e)))?;
        Ok((token, expiry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::vault::testing::MemorySecretStore;
    use jsonwebtoken::{decode, DecodingKey, Validation};

    #[tokio::test]
    async fn test_minted_token_verifies_against_served_set() {
        let jwks = Arc::new(JwksService::with_key_bits(
            Arc::new(MemorySecretStore::default()),
            2048,
        ));
        let now = Utc::now();
        jwks.ensure(now).await.unwrap();
        let svc = JwtService::new(jwks.clone(), "jimm.example.com");

        let controller = Uuid::new_v4();
        let mut access = BTreeMap::new();
        access.insert(format!("controller-{}", controller), "login".to_string());
        access.insert("model-00000000-0000-0000-0000-000000000001".to_string(), "write".to_string());
        let (token, expiry) = svc
            .mint(now, "alice@canonical.com", &controller, access.clone())
            .await
            .unwrap();
        assert_eq!(expiry, now + Duration::seconds(DEFAULT_TOKEN_LIFETIME_SECS));

        let (set, _) = jwks.current().await.unwrap().unwrap();
        let n = set["keys"][0]["n"].as_str().unwrap();
        let e = set["keys"][0]["e"].as_str().unwrap();
        let decoding = DecodingKey::from_rsa_components(n, e).unwrap();
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[controller.to_string()]);
        let data = decode::<Claims>(&token, &decoding, &validation).unwrap();
        assert_eq!(data.claims.sub, "alice@canonical.com");
        assert_eq!(data.claims.iss, "jimm.example.com");
        assert_eq!(data.claims.access, access);
    }

    #[tokio::test]
    async fn test_mint_without_keys_fails_with_jwks_kind() {
        let jwks = Arc::new(JwksService::with_key_bits(
            Arc::new(MemorySecretStore::default()),
            2048,
        ));
        let svc = JwtService::new(jwks, "jimm.example.com");
        let err = svc
            .mint(Utc::now(), "alice@x.com", &Uuid::new_v4(), BTreeMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::JwksRetrieval(_)));
    }
}
