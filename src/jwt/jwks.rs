use std::sync::Arc;

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::domain::errors::DomainError;
use crate::infra::vault::SecretStore;

/// Keys rotate every three months.
pub const ROTATION_PERIOD: Duration = Duration::days(90);

const DEFAULT_KEY_BITS: usize = 4096;

/// Owns the signing key set lifecycle:
/// `absent → generating → present(T) → rotating → present(T')`.
///
/// The internal mutex guarantees a single rotator; a present-but-expired
/// state found on startup triggers immediate regeneration.
pub struct JwksService {
    secrets: Arc<dyn SecretStore>,
    rotator: tokio::sync::Mutex<()>,
    key_bits: usize,
}

impl JwksService {
    pub fn new(secrets: Arc<dyn SecretStore>) -> Self {
        Self::with_key_bits(secrets, DEFAULT_KEY_BITS)
    }

    /// Smaller keys keep the test suite fast; production uses the default.
    pub fn with_key_bits(secrets: Arc<dyn SecretStore>, key_bits: usize) -> Self {
        JwksService {
            secrets,
            rotator: tokio::sync::Mutex::new(()),
            key_bits,
        }
    }

    /// Make sure a non-expired key set exists, generating one if the stored
    /// state is absent or already expired. Returns the effective expiry.
    pub async fn ensure(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        let _guard = self.rotator.lock().await;
        if let Some(expiry) = self.secrets.get_jwks_expiry().await? {
            if expiry > now && self.secrets.get_jwks().await?.is_some() {
                return Ok(expiry);
            }
        }
        self.rotate_locked(now).await
    }

    /// Generate a fresh key pair and swap it in. Guarded so concurrent
    /// callers serialize behind a single rotation.
    pub async fn rotate(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        let _guard = self.rotator.lock().await;
        self.rotate_locked(now).await
    }

    async fn rotate_locked(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, DomainError> {
        let key_bits = self.key_bits;
        let key = tokio::task::spawn_blocking(move || {
            let mut rng = rand::rngs::OsRng;
            RsaPrivateKey::new(&mut rng, key_bits)
        })
        .await
        .map_err(|e| DomainError::Internal(format!("key generation task: {}", e)))?
        .map_err(|e| DomainError::Internal(format!("generating RSA key: {}", e)))?;

        let kid = Uuid::new_v4().to_string();
        let set = jwks_document(&key, &kid);
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| DomainError::Internal(format!("encoding private key: {}", e)))?;
        let expiry = now + ROTATION_PERIOD;

        // The public set is overwritten in place, so readers always observe
        // a complete document. The expiry lands last.
        self.secrets.put_jwks_private_key(&pem).await?;
        self.secrets.put_jwks(&set).await?;
        self.secrets.put_jwks_expiry(expiry).await?;
        info!(%kid, %expiry, "rotated JWKS");
        Ok(expiry)
    }

    /// The served key set and its expiry, or `None` before first generation.
    pub async fn current(&self) -> Result<Option<(Value, DateTime<Utc>)>, DomainError> {
        let set = self.secrets.get_jwks().await?;
        let expiry = self.secrets.get_jwks_expiry().await?;
        match (set, expiry) {
            (Some(set), Some(expiry)) => Ok(Some((set, expiry))),
            _ => Ok(None),
        }
    }

    /// Signing material for the minting service.
    pub async fn signing_key(&self) -> Result<(String, jsonwebtoken::EncodingKey), DomainError> {
        let pem = self
            .secrets
            .get_jwks_private_key()
            .await?
            .ok_or_else(|| DomainError::JwksRetrieval("no private key stored".to_string()))?;
        let set = self
            .secrets
            .get_jwks()
            .await?
            .ok_or_else(|| DomainError::JwksRetrieval("no key set stored".to_string()))?;
        let kid = set["keys"]
            .get(0)
            .and_then(|k| k["kid"].as_str())
            .ok_or_else(|| DomainError::JwksRetrieval("stored key set has no kid".to_string()))?
            .to_string();
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| DomainError::JwksRetrieval(format!("stored private key: {}", e)))?;
        Ok((kid, key))
    }

    /// Background rotation loop; re-checks hourly so an expired set is
    /// replaced promptly after downtime.
    pub async fn run_rotator(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        loop {
            if let Err(e) = self.ensure(Utc::now()).await {
                tracing::warn!(error = %e, "JWKS rotation check failed");
            }
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_secs(3600)) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}

fn b64url(bytes: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

fn jwks_document(key: &RsaPrivateKey, kid: &str) -> Value {
    let public = key.to_public_key();
    json!({
        "keys": [{
            "kty": "RSA",
            "use": "sig",
            "alg": "RS256",
            "kid": kid,
            "n": b64url(&public.n().to_bytes_be()),
            "e": b64url(&public.e().to_bytes_be()),
        }]
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::vault::testing::MemorySecretStore;

    fn service() -> JwksService {
        JwksService::with_key_bits(Arc::new(MemorySecretStore::default()), 2048)
    }

    #[tokio::test]
    async fn test_absent_then_generated() {
        let svc = service();
        assert!(svc.current().await.unwrap().is_none());
        let now = Utc::now();
        let expiry = svc.ensure(now).await.unwrap();
        assert_eq!(expiry, now + ROTATION_PERIOD);
        let (set, stored_expiry) = svc.current().await.unwrap().unwrap();
        assert_eq!(stored_expiry, expiry);
        assert_eq!(set["keys"].as_array().unwrap().len(), 1);
        assert_eq!(set["keys"][0]["alg"], "RS256");
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_while_fresh() {
        let svc = service();
        let now = Utc::now();
        let first = svc.ensure(now).await.unwrap();
        let (set_before, _) = svc.current().await.unwrap().unwrap();
        let second = svc.ensure(now + Duration::days(1)).await.unwrap();
        assert_eq!(first, second);
        let (set_after, _) = svc.current().await.unwrap().unwrap();
        assert_eq!(set_before, set_after);
    }

    #[tokio::test]
    async fn test_expired_state_triggers_regeneration() {
        let svc = service();
        let now = Utc::now();
        svc.ensure(now).await.unwrap();
        let (old_set, _) = svc.current().await.unwrap().unwrap();
        let later = now + ROTATION_PERIOD + Duration::seconds(1);
        svc.ensure(later).await.unwrap();
        let (new_set, new_expiry) = svc.current().await.unwrap().unwrap();
        assert_ne!(old_set["keys"][0]["kid"], new_set["keys"][0]["kid"]);
        assert_eq!(new_expiry, later + ROTATION_PERIOD);
    }

    #[tokio::test]
    async fn test_rotation_never_exposes_empty_set() {
        let svc = service();
        let now = Utc::now();
        svc.ensure(now).await.unwrap();
        svc.rotate(now + Duration::days(30)).await.unwrap();
        // After any number of rotations the set is present and non-empty.
        let (set, _) = svc.current().await.unwrap().unwrap();
        assert!(!set["keys"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_signing_key_matches_served_kid() {
        let svc = service();
        svc.ensure(Utc::now()).await.unwrap();
        let (kid, _key) = svc.signing_key().await.unwrap();
        let (set, _) = svc.current().await.unwrap().unwrap();
        assert_eq!(set["keys"][0]["kid"], kid.as_str());
    }
}
