use std::time::Duration;

use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};
use url::Url;

use crate::domain::errors::DomainError;

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub issuer: String,
    pub client_id: String,
    pub client_secret: String,
    pub scopes: Vec<String>,
}

/// Relevant subset of the provider's discovery document.
#[derive(Debug, Clone, Deserialize)]
pub struct Discovery {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub device_authorization_endpoint: Option<String>,
    pub jwks_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceAuthResponse {
    #[serde(rename = "device-code", alias = "device_code")]
    pub device_code: String,
    #[serde(rename = "user-code", alias = "user_code")]
    pub user_code: String,
    #[serde(rename = "verification-uri", alias = "verification_uri")]
    pub verification_uri: String,
    #[serde(
        rename = "verification-uri-complete",
        alias = "verification_uri_complete",
        default
    )]
    pub verification_uri_complete: Option<String>,
    #[serde(rename = "expires-in", alias = "expires_in", default)]
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Client for the OIDC identity provider. Endpoints come from discovery;
/// the provider's JWKS is cached and refreshed on unknown key ids.
pub struct OidcClient {
    config: OidcConfig,
    discovery: Discovery,
    http: Client,
    provider_keys: RwLock<Value>,
}

impl OidcClient {
    pub async fn discover(config: OidcConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        let url = format!(
            "{}/.well-known/openid-configuration",
            config.issuer.trim_end_matches('/')
        );
        let discovery: Discovery = http.get(&url).send().await?.json().await?;
        Ok(OidcClient {
            config,
            discovery,
            http,
            provider_keys: RwLock::new(serde_json::json!({})),
        })
    }

    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Result<String, DomainError> {
        let mut url = Url::parse(&self.discovery.authorization_endpoint).map_err(|e| {
            DomainError::Internal(format!("invalid authorization endpoint: {}", e))
        })?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state);
        Ok(url.into())
    }

    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse, DomainError> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &self.config.client_id),
            ("client_secret", &self.config.client_secret),
        ];
        let resp = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DomainError::Internal(format!("token exchange: {}", e)))?;
        if !resp.status().is_success() {
            return Err(DomainError::Unauthorized);
        }
        resp.json()
            .await
            .map_err(|e| DomainError::Internal(format!("token response: {}", e)))
    }

    /// Start the device flow: the user visits `verification_uri` and enters
    /// `user_code` while the caller polls.
    pub async fn device(&self) -> Result<DeviceAuthResponse, DomainError> {
        let endpoint = self
            .discovery
            .device_authorization_endpoint
            .as_deref()
            .ok_or_else(|| {
                DomainError::NotImplemented
            })?;
        let scopes = self.config.scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", scopes.as_str()),
        ];
        let resp = self
            .http
            .post(endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DomainError::Internal(format!("device authorization: {}", e)))?;
        if !resp.status().is_success() {
            return Err(DomainError::Internal(format!(
                "device authorization: {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| DomainError::Internal(format!("device response: {}", e)))
    }

    /// Poll the token endpoint until the user approves, the code expires,
    /// or the caller's context is cancelled (by dropping the future).
    pub async fn device_access_token(
        &self,
        device: &DeviceAuthResponse,
    ) -> Result<TokenResponse, DomainError> {
        let mut interval = device.interval.max(1);
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(device.expires_in.max(interval));
        loop {
            sleep(Duration::from_secs(interval)).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(DomainError::Unauthorized);
            }
            let params = [
                ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                ("device_code", device.device_code.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ];
            let resp = self
                .http
                .post(&self.discovery.token_endpoint)
                .form(&params)
                .send()
                .await
                .map_err(|e| DomainError::Internal(format!("device token: {}", e)))?;
            let body: TokenResponse = resp
                .json()
                .await
                .map_err(|e| DomainError::Internal(format!("device token response: {}", e)))?;
            match body.error.as_deref() {
                None => return Ok(body),
                Some("authorization_pending") => continue,
                Some("slow_down") => {
                    interval += 5;
                    debug!(interval, "device flow slow_down");
                }
                Some("expired_token") | Some("access_denied") => {
                    return Err(DomainError::Unauthorized)
                }
                Some(other) => {
                    return Err(DomainError::Internal(format!("device token: {}", other)))
                }
            }
        }
    }

    async fn refresh_provider_keys(&self) -> Result<(), DomainError> {
        let keys: Value = self
            .http
            .get(&self.discovery.jwks_uri)
            .send()
            .await
            .map_err(|e| DomainError::JwksRetrieval(e.to_string()))?
            .json()
            .await
            .map_err(|e| DomainError::JwksRetrieval(e.to_string()))?;
        *self.provider_keys.write() = keys;
        Ok(())
    }

    fn provider_key(&self, kid: &str) -> Option<DecodingKey> {
        let keys = self.provider_keys.read();
        for k in keys["keys"].as_array().unwrap_or(&vec![]) {
            if k["kid"].as_str() == Some(kid) && k["kty"] == "RSA" {
                if let (Some(n), Some(e)) = (k["n"].as_str(), k["e"].as_str()) {
                    return DecodingKey::from_rsa_components(n, e).ok();
                }
            }
        }
        None
    }

    /// Verify an ID token against the provider's keys and return the
    /// authenticated subject claims.
    pub async fn extract_and_verify_id_token(
        &self,
        id_token: &str,
    ) -> Result<IdTokenClaims, DomainError> {
        let header = decode_header(id_token).map_err(|_| DomainError::Unauthorized)?;
        let kid = header.kid.ok_or(DomainError::Unauthorized)?;
        if self.provider_key(&kid).is_none() {
            self.refresh_provider_keys().await?;
        }
        let key = self.provider_key(&kid).ok_or(DomainError::Unauthorized)?;
        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[self.config.client_id.clone()]);
        validation.set_issuer(&[self.discovery.issuer.clone()]);
        let data = decode::<IdTokenClaims>(id_token, &key, &validation).map_err(|e| {
            warn!(error = %e, "ID token verification failed");
            DomainError::Unauthorized
        })?;
        Ok(data.claims)
    }

    /// Validate a service-account login by performing a client-credentials
    /// grant as that client.
    pub async fn verify_client_credentials(
        &self,
        client_id: &str,
        client_secret: &str,
    ) -> Result<(), DomainError> {
        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];
        let resp = self
            .http
            .post(&self.discovery.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| DomainError::Internal(format!("client credentials: {}", e)))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(DomainError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OidcClient {
        OidcClient {
            config: OidcConfig {
                issuer: "https://idp.example.com".into(),
                client_id: "jimm".into(),
                client_secret: String::new(),
                scopes: vec!["openid".into(), "email".into()],
            },
            discovery: Discovery {
                issuer: "https://idp.example.com".into(),
                authorization_endpoint: "https://idp.example.com/authorize".into(),
                token_endpoint: "https://idp.example.com/token".into(),
                device_authorization_endpoint: None,
                jwks_uri: "https://idp.example.com/jwks".into(),
            },
            http: Client::new(),
            provider_keys: RwLock::new(serde_json::json!({})),
        }
    }

    #[test]
    fn test_authorization_url_encodes_query() {
        let url = client()
            .authorization_url("https://jimm.example.com/auth/callback", "abc 123")
            .unwrap();
        assert!(url.starts_with("https://idp.example.com/authorize?response_type=code"));
        assert!(url.contains("client_id=jimm"));
        assert!(url.contains("scope=openid+email"));
        assert!(url.contains("state=abc+123"));
        assert!(url.contains("redirect_uri=https%3A%2F%2Fjimm.example.com%2Fauth%2Fcallback"));
    }

    #[test]
    fn test_bad_authorization_endpoint_is_an_error() {
        let mut client = client();
        client.discovery.authorization_endpoint = "not a url".into();
        assert!(client.authorization_url("https://x", "s").is_err());
    }

    #[test]
    fn test_device_response_accepts_both_casings() {
        let snake = r#"{"device_code":"d","user_code":"u","verification_uri":"https://idp/x","expires_in":300,"interval":5}"#;
        let resp: DeviceAuthResponse = serde_json::from_str(snake).unwrap();
        assert_eq!(resp.device_code, "d");
        assert_eq!(resp.interval, 5);
    }
}
