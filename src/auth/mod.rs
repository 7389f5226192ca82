//! Authentication flows: OIDC browser and device login, browser sessions,
//! self-issued HS256 session tokens and service-account client credentials.

pub mod oidc;

use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::entities::{Identity, Session};
use crate::domain::errors::DomainError;
use crate::domain::repositories::{IdentityRepository, SessionRepository};
use crate::domain::value_objects::{is_valid_identity_name, SERVICE_ACCOUNT_DOMAIN};
use crate::infra::vault::SecretStore;
use oidc::{DeviceAuthResponse, OidcClient, TokenResponse};

/// Cookie under which the server-side browser session is keyed.
pub const SESSION_NAME: &str = "jimm-browser-session";

const SESSION_TOKEN_LIFETIME_HOURS: i64 = 24;
const BROWSER_SESSION_LIFETIME_HOURS: i64 = 24;

#[derive(Debug, Serialize, Deserialize)]
struct SessionTokenClaims {
    iss: String,
    sub: String,
    exp: i64,
    iat: i64,
}

/// Self-issued symmetric session tokens used by CLI logins. The HS256 key
/// is separate material from the asymmetric JWKS used for downstream JWTs.
pub struct SessionTokens {
    secrets: Arc<dyn SecretStore>,
    issuer: String,
    key_init: tokio::sync::Mutex<()>,
}

impl SessionTokens {
    pub fn new(secrets: Arc<dyn SecretStore>, issuer: impl Into<String>) -> Self {
        SessionTokens {
            secrets,
            issuer: issuer.into(),
            key_init: tokio::sync::Mutex::new(()),
        }
    }

    /// The symmetric key, generated on first use.
    async fn oauth_key(&self) -> Result<Vec<u8>, DomainError> {
        if let Some(key) = self.secrets.get_oauth_key().await? {
            return Ok(key);
        }
        let _guard = self.key_init.lock().await;
        if let Some(key) = self.secrets.get_oauth_key().await? {
            return Ok(key);
        }
        let mut key = vec![0u8; 64];
        rand::rngs::OsRng.fill_bytes(&mut key);
        self.secrets.put_oauth_key(&key).await?;
        debug!("generated OAuth session-token key");
        Ok(key)
    }

    /// Mint a base64-wrapped HS256 session token.
    pub async fn mint(&self, email: &str, now: DateTime<Utc>) -> Result<String, DomainError> {
        let key = self.oauth_key().await?;
        let claims = SessionTokenClaims {
            iss: self.issuer.clone(),
            sub: email.to_string(),
            exp: (now + Duration::hours(SESSION_TOKEN_LIFETIME_HOURS)).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(&key),
        )
        .map_err(|e| DomainError::Internal(format!("signing session token: {}", e)))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(token))
    }

    /// Decode and verify a base64-wrapped session token. The subject must be
    /// an email-shaped identity name.
    pub async fn verify(&self, wrapped: &str) -> Result<String, DomainError> {
        let invalid = |msg: &str| DomainError::SessionTokenInvalid(msg.to_string());
        let raw = base64::engine::general_purpose::STANDARD
            .decode(wrapped.trim().as_bytes())
            .map_err(|_| invalid("token is not valid base64"))?;
        let token = String::from_utf8(raw).map_err(|_| invalid("token is not valid UTF-8"))?;
        let key = self.oauth_key().await?;
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        let data = decode::<SessionTokenClaims>(
            &token,
            &DecodingKey::from_secret(&key),
            &validation,
        )
        .map_err(|_| invalid("token signature or expiry is invalid"))?;
        if !is_valid_identity_name(&data.claims.sub) {
            return Err(invalid("token subject is not a valid identity"));
        }
        Ok(data.claims.sub)
    }
}

pub struct AuthenticationService {
    oidc: Arc<OidcClient>,
    identities: Arc<dyn IdentityRepository>,
    sessions: Arc<dyn SessionRepository>,
    tokens: Arc<SessionTokens>,
    dashboard_url: String,
}

impl AuthenticationService {
    pub fn new(
        oidc: Arc<OidcClient>,
        identities: Arc<dyn IdentityRepository>,
        sessions: Arc<dyn SessionRepository>,
        tokens: Arc<SessionTokens>,
        dashboard_url: impl Into<String>,
    ) -> Self {
        AuthenticationService {
            oidc,
            identities,
            sessions,
            tokens,
            dashboard_url: dashboard_url.into(),
        }
    }

    pub fn dashboard_url(&self) -> &str {
        &self.dashboard_url
    }

    pub fn tokens(&self) -> &Arc<SessionTokens> {
        &self.tokens
    }

    // ---- browser flow -----------------------------------------------------

    pub fn login_redirect_url(
        &self,
        redirect_uri: &str,
        state: &str,
    ) -> Result<String, DomainError> {
        self.oidc.authorization_url(redirect_uri, state)
    }

    /// Complete the authorization-code flow: exchange the code, verify the
    /// ID token, upsert the identity and open a server-side session.
    pub async fn callback(
        &self,
        code: &str,
        redirect_uri: &str,
        now: DateTime<Utc>,
    ) -> Result<(Identity, Session), DomainError> {
        let tokens = self.oidc.exchange_code(code, redirect_uri).await?;
        let identity = self.identity_from_tokens(&tokens, now).await?;
        let session = self.open_session(&identity, now).await?;
        Ok((identity, session))
    }

    async fn identity_from_tokens(
        &self,
        tokens: &TokenResponse,
        now: DateTime<Utc>,
    ) -> Result<Identity, DomainError> {
        let id_token = tokens
            .id_token
            .as_deref()
            .ok_or(DomainError::Unauthorized)?;
        let claims = self.oidc.extract_and_verify_id_token(id_token).await?;
        let email = claims.email.unwrap_or(claims.sub);
        if !is_valid_identity_name(&email) {
            return Err(DomainError::Unauthorized);
        }
        let identity = self.identities.upsert(&email, now).await?;
        self.identities.set_last_login(&email, now).await?;
        Ok(identity)
    }

    async fn open_session(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<Session, DomainError> {
        // Reap opportunistically so the table does not accrete.
        let _ = self.sessions.delete_expired(now).await;
        let mut raw = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut raw);
        let session = Session {
            id: hex::encode(raw),
            identity: identity.name.clone(),
            created_at: now,
            expires_at: now + Duration::hours(BROWSER_SESSION_LIFETIME_HOURS),
        };
        self.sessions.put(&session).await?;
        Ok(session)
    }

    /// Resolve a browser-session cookie to its identity. A missing or
    /// expired session is an authentication failure; callers decide whether
    /// the absence of the cookie itself is one.
    pub async fn session_identity(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, DomainError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(DomainError::Unauthorized)?;
        if session.is_expired(now) {
            self.sessions.delete(&session.id).await?;
            return Err(DomainError::Unauthorized);
        }
        self.identities
            .get(&session.identity)
            .await?
            .ok_or(DomainError::Unauthorized)
    }

    pub async fn logout(&self, session_id: &str) -> Result<(), DomainError> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or(DomainError::Unauthorized)?;
        self.sessions.delete(session_id).await
    }

    // ---- device flow ------------------------------------------------------

    pub async fn device(&self) -> Result<DeviceAuthResponse, DomainError> {
        self.oidc.device().await
    }

    /// Wait for the device grant, then hand back a session token for the
    /// authenticated subject.
    pub async fn device_session_token(
        &self,
        device: &DeviceAuthResponse,
        now: DateTime<Utc>,
    ) -> Result<(Identity, String), DomainError> {
        let tokens = self.oidc.device_access_token(device).await?;
        let identity = self.identity_from_tokens(&tokens, now).await?;
        let token = self.tokens.mint(&identity.name, now).await?;
        Ok((identity, token))
    }

    /// Verify a base64 session token and resolve it to a stored identity.
    pub async fn verify_session_token(
        &self,
        wrapped: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, DomainError> {
        let email = self.tokens.verify(wrapped).await?;
        let identity = self.identities.upsert(&email, now).await?;
        self.identities.set_last_login(&email, now).await?;
        Ok(identity)
    }

    // ---- client credentials ----------------------------------------------

    /// Service-account login. The client ID must live in the reserved
    /// `serviceaccount` domain.
    pub async fn verify_client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
        now: DateTime<Utc>,
    ) -> Result<Identity, DomainError> {
        let name = match client_id.split_once('@') {
            None => format!("{}@{}", client_id, SERVICE_ACCOUNT_DOMAIN),
            Some((local, domain)) if domain == SERVICE_ACCOUNT_DOMAIN && !local.is_empty() => {
                client_id.to_string()
            }
            Some(_) => {
                return Err(DomainError::Unauthorized);
            }
        };
        let bare_id = name.split('@').next().unwrap_or(&name);
        self.oidc
            .verify_client_credentials(bare_id, client_secret)
            .await?;
        let identity = self.identities.upsert(&name, now).await?;
        self.identities.set_last_login(&name, now).await?;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::vault::testing::MemorySecretStore;

    fn tokens() -> SessionTokens {
        SessionTokens::new(Arc::new(MemorySecretStore::default()), "jimm.example.com")
    }

    #[tokio::test]
    async fn test_session_token_round_trip() {
        let svc = tokens();
        let now = Utc::now();
        let wrapped = svc.mint("alice@canonical.com", now).await.unwrap();
        let subject = svc.verify(&wrapped).await.unwrap();
        assert_eq!(subject, "alice@canonical.com");
    }

    #[tokio::test]
    async fn test_non_email_subject_is_rejected() {
        let svc = tokens();
        let now = Utc::now();
        let wrapped = svc.mint("not-an-email", now).await.unwrap();
        let err = svc.verify(&wrapped).await.unwrap_err();
        assert!(matches!(err, DomainError::SessionTokenInvalid(_)));
    }

    #[tokio::test]
    async fn test_garbage_token_is_invalid() {
        let svc = tokens();
        for bad in ["%%%", "bm90IGEgand0", ""] {
            let err = svc.verify(bad).await.unwrap_err();
            assert!(matches!(err, DomainError::SessionTokenInvalid(_)), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_token_signed_with_other_key_is_invalid() {
        let minter = tokens();
        let verifier = tokens();
        let wrapped = minter.mint("alice@x.com", Utc::now()).await.unwrap();
        let err = verifier.verify(&wrapped).await.unwrap_err();
        assert!(matches!(err, DomainError::SessionTokenInvalid(_)));
    }

    #[tokio::test]
    async fn test_expired_token_is_invalid() {
        let svc = tokens();
        let past = Utc::now() - Duration::hours(SESSION_TOKEN_LIFETIME_HOURS + 2);
        let wrapped = svc.mint("alice@x.com", past).await.unwrap();
        let err = svc.verify(&wrapped).await.unwrap_err();
        assert!(matches!(err, DomainError::SessionTokenInvalid(_)));
    }
}
