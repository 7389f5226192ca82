//! =============================================================================
//! VAULT INTEGRATION MODULE
//! =============================================================================
//! Módulo para integração segura com HashiCorp Vault
//! Armazena cloud credentials, credenciais de controllers, JWKS e a chave OAuth

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::domain::errors::DomainError;

const CONTROLLERS_PREFIX: &str = "controllers";
const CREDS_PREFIX: &str = "creds";
const JWKS_SET_PATH: &str = "jwks/set";
const JWKS_PRIVATE_KEY_PATH: &str = "jwks/private-key";
const JWKS_EXPIRY_PATH: &str = "jwks/expiry";
const OAUTH_KEY_PATH: &str = "oauth/key";

/// Opaque scoped key-value secret store (§ cloud credentials, controller
/// admin credentials, JWKS material, OAuth signing key).
///
/// Reads of an absent secret return `Ok(None)`: absence is a routine state.
/// Writes are last-write-wins; an empty attribute map deletes the secret.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get(&self, path: &str) -> Result<Option<HashMap<String, String>>, DomainError>;
    async fn put(&self, path: &str, attrs: &HashMap<String, String>) -> Result<(), DomainError>;
    async fn delete(&self, path: &str) -> Result<(), DomainError>;

    async fn get_cloud_credential(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
    ) -> Result<Option<HashMap<String, String>>, DomainError> {
        self.get(&format!("{}/{}/{}/{}", CREDS_PREFIX, cloud, owner, name))
            .await
    }

    async fn put_cloud_credential(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
        attrs: &HashMap<String, String>,
    ) -> Result<(), DomainError> {
        self.put(&format!("{}/{}/{}/{}", CREDS_PREFIX, cloud, owner, name), attrs)
            .await
    }

    async fn get_controller_credentials(
        &self,
        controller: &str,
    ) -> Result<Option<(String, String)>, DomainError> {
        let attrs = self
            .get(&format!("{}/{}", CONTROLLERS_PREFIX, controller))
            .await?;
        Ok(attrs.and_then(|attrs| {
            match (attrs.get("username"), attrs.get("password")) {
                (Some(u), Some(p)) => Some((u.clone(), p.clone())),
                _ => None,
            }
        }))
    }

    async fn put_controller_credentials(
        &self,
        controller: &str,
        username: &str,
        password: &str,
    ) -> Result<(), DomainError> {
        let mut attrs = HashMap::new();
        attrs.insert("username".to_string(), username.to_string());
        attrs.insert("password".to_string(), password.to_string());
        self.put(&format!("{}/{}", CONTROLLERS_PREFIX, controller), &attrs)
            .await
    }

    async fn get_jwks(&self) -> Result<Option<Value>, DomainError> {
        match self.get(JWKS_SET_PATH).await? {
            Some(attrs) => match attrs.get("jwks") {
                Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
                None => Ok(None),
            },
            None => Ok(None),
        }
    }

    async fn put_jwks(&self, jwks: &Value) -> Result<(), DomainError> {
        let mut attrs = HashMap::new();
        attrs.insert("jwks".to_string(), serde_json::to_string(jwks)?);
        self.put(JWKS_SET_PATH, &attrs).await
    }

    async fn get_jwks_private_key(&self) -> Result<Option<String>, DomainError> {
        Ok(self
            .get(JWKS_PRIVATE_KEY_PATH)
            .await?
            .and_then(|attrs| attrs.get("pem").cloned()))
    }

    async fn put_jwks_private_key(&self, pem: &str) -> Result<(), DomainError> {
        let mut attrs = HashMap::new();
        attrs.insert("pem".to_string(), pem.to_string());
        self.put(JWKS_PRIVATE_KEY_PATH, &attrs).await
    }

    async fn get_jwks_expiry(&self) -> Result<Option<DateTime<Utc>>, DomainError> {
        let attrs = self.get(JWKS_EXPIRY_PATH).await?;
        match attrs.and_then(|attrs| attrs.get("expiry").cloned()) {
            Some(raw) => {
                let t = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                    DomainError::Internal(format!("stored JWKS expiry is invalid: {}", e))
                })?;
                Ok(Some(t.with_timezone(&Utc)))
            }
            None => Ok(None),
        }
    }

    async fn put_jwks_expiry(&self, expiry: DateTime<Utc>) -> Result<(), DomainError> {
        let mut attrs = HashMap::new();
        attrs.insert("expiry".to_string(), expiry.to_rfc3339());
        self.put(JWKS_EXPIRY_PATH, &attrs).await
    }

    async fn cleanup_jwks(&self) -> Result<(), DomainError> {
        self.delete(JWKS_SET_PATH).await?;
        self.delete(JWKS_PRIVATE_KEY_PATH).await?;
        self.delete(JWKS_EXPIRY_PATH).await
    }

    async fn get_oauth_key(&self) -> Result<Option<Vec<u8>>, DomainError> {
        match self
            .get(OAUTH_KEY_PATH)
            .await?
            .and_then(|attrs| attrs.get("key").cloned())
        {
            Some(raw) => {
                let key = base64::engine::general_purpose::STANDARD
                    .decode(raw.as_bytes())
                    .map_err(|e| {
                        DomainError::Internal(format!("stored OAuth key is invalid: {}", e))
                    })?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    async fn put_oauth_key(&self, key: &[u8]) -> Result<(), DomainError> {
        let mut attrs = HashMap::new();
        attrs.insert(
            "key".to_string(),
            base64::engine::general_purpose::STANDARD.encode(key),
        );
        self.put(OAUTH_KEY_PATH, &attrs).await
    }

    async fn cleanup_oauth(&self) -> Result<(), DomainError> {
        self.delete(OAUTH_KEY_PATH).await
    }
}

/// Configuração do cliente Vault
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub addr: String,
    pub token: String,
    pub mount: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            addr: std::env::var("VAULT_ADDR").unwrap_or_else(|_| "http://vault:8200".to_string()),
            token: std::env::var("VAULT_TOKEN").unwrap_or_default(),
            mount: std::env::var("VAULT_MOUNT").unwrap_or_else(|_| "jimm-kv".to_string()),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Deserialize)]
struct KvReadResponse {
    data: KvData,
}

#[derive(Debug, Deserialize)]
struct KvData {
    data: HashMap<String, String>,
}

/// Cliente Vault (KV v2) com retry automático.
#[derive(Clone)]
pub struct VaultClient {
    config: VaultConfig,
    client: Client,
}

impl VaultClient {
    pub fn new(config: VaultConfig) -> anyhow::Result<Self> {
        if config.token.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "VAULT_TOKEN must be set before initializing VaultClient"
            ));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Self::new(VaultConfig::default())
    }

    pub async fn health_check(&self) -> anyhow::Result<bool> {
        let url = format!("{}/v1/sys/health", self.config.addr);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.status().is_success())
    }

    async fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<Value>,
    ) -> Result<reqwest::Response, DomainError> {
        let mut retries = 0;
        loop {
            let mut request = self
                .client
                .request(method.clone(), url)
                .header("X-Vault-Token", &self.config.token)
                .header("Content-Type", "application/json");
            if let Some(body) = &body {
                request = request.json(body);
            }
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    retries += 1;
                    if retries >= self.config.max_retries {
                        error!(url, error = %e, "vault request failed after retries");
                        return Err(DomainError::Internal(format!("vault: {}", e)));
                    }
                    warn!(url, attempt = retries, error = %e, "vault request failed; retrying");
                    tokio::time::sleep(self.config.retry_delay).await;
                }
            }
        }
    }

    fn data_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/data/{}",
            self.config.addr,
            self.config.mount,
            path.trim_start_matches('/')
        )
    }

    fn metadata_url(&self, path: &str) -> String {
        format!(
            "{}/v1/{}/metadata/{}",
            self.config.addr,
            self.config.mount,
            path.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl SecretStore for VaultClient {
    async fn get(&self, path: &str) -> Result<Option<HashMap<String, String>>, DomainError> {
        let resp = self
            .request(reqwest::Method::GET, &self.data_url(path), None)
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(DomainError::Internal(format!(
                "vault read {}: {}",
                path,
                resp.status()
            )));
        }
        let body: KvReadResponse = resp
            .json()
            .await
            .map_err(|e| DomainError::Internal(format!("vault response: {}", e)))?;
        debug!(path, "vault secret read");
        Ok(Some(body.data.data))
    }

    async fn put(&self, path: &str, attrs: &HashMap<String, String>) -> Result<(), DomainError> {
        if attrs.is_empty() {
            return self.delete(path).await;
        }
        let body = serde_json::json!({ "data": attrs });
        let resp = self
            .request(reqwest::Method::POST, &self.data_url(path), Some(body))
            .await?;
        if !resp.status().is_success() {
            return Err(DomainError::Internal(format!(
                "vault write {}: {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<(), DomainError> {
        let resp = self
            .request(reqwest::Method::DELETE, &self.metadata_url(path), None)
            .await?;
        // Deleting an absent secret is not an error.
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(DomainError::Internal(format!(
                "vault delete {}: {}",
                path,
                resp.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use parking_lot::Mutex;

    /// In-memory secret store used by unit tests.
    #[derive(Default)]
    pub struct MemorySecretStore {
        secrets: Mutex<HashMap<String, HashMap<String, String>>>,
    }

    #[async_trait]
    impl SecretStore for MemorySecretStore {
        async fn get(
            &self,
            path: &str,
        ) -> Result<Option<HashMap<String, String>>, DomainError> {
            Ok(self.secrets.lock().get(path).cloned())
        }

        async fn put(
            &self,
            path: &str,
            attrs: &HashMap<String, String>,
        ) -> Result<(), DomainError> {
            if attrs.is_empty() {
                self.secrets.lock().remove(path);
            } else {
                self.secrets
                    .lock()
                    .insert(path.to_string(), attrs.clone());
            }
            Ok(())
        }

        async fn delete(&self, path: &str) -> Result<(), DomainError> {
            self.secrets.lock().remove(path);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemorySecretStore;
    use super::*;

    #[tokio::test]
    async fn test_absent_secret_reads_as_none() {
        let store = MemorySecretStore::default();
        assert!(store.get_jwks().await.unwrap().is_none());
        assert!(store.get_jwks_expiry().await.unwrap().is_none());
        assert!(store
            .get_controller_credentials("ctl1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_controller_credentials_round_trip() {
        let store = MemorySecretStore::default();
        store
            .put_controller_credentials("ctl1", "admin", "hunter2")
            .await
            .unwrap();
        let (user, password) = store
            .get_controller_credentials("ctl1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user, "admin");
        assert_eq!(password, "hunter2");
    }

    #[tokio::test]
    async fn test_empty_put_deletes() {
        let store = MemorySecretStore::default();
        let mut attrs = HashMap::new();
        attrs.insert("k".to_string(), "v".to_string());
        store.put("creds/aws/alice@x.com/c1", &attrs).await.unwrap();
        store
            .put("creds/aws/alice@x.com/c1", &HashMap::new())
            .await
            .unwrap();
        assert!(store
            .get("creds/aws/alice@x.com/c1")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_jwks_material_round_trip() {
        let store = MemorySecretStore::default();
        let jwks = serde_json::json!({"keys": [{"kty": "RSA", "kid": "k1"}]});
        store.put_jwks(&jwks).await.unwrap();
        let expiry = Utc::now() + chrono::Duration::days(90);
        store.put_jwks_expiry(expiry).await.unwrap();
        assert_eq!(store.get_jwks().await.unwrap().unwrap(), jwks);
        assert_eq!(store.get_jwks_expiry().await.unwrap().unwrap(), expiry);
        store.cleanup_jwks().await.unwrap();
        assert!(store.get_jwks().await.unwrap().is_none());
    }
}
