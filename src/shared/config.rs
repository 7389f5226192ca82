// ============================================================================
// CONFIGURAÇÃO DO SERVIÇO
// ============================================================================
// Opções reconhecidas no arquivo de configuração (key: value). Os nomes das
// chaves são os históricos do serviço; `mongo-addr` é o endereço do banco.

use serde::Deserialize;
use uuid::Uuid;

/// Required fields, reported in this order when missing.
const REQUIRED: &[(&str, fn(&Config) -> bool)] = &[
    ("mongo-addr", |c| c.mongo_addr.is_some()),
    ("api-addr", |c| c.api_addr.is_some()),
    ("state-server-admin", |c| c.controller_admin.is_some()),
    ("identity-location", |c| c.identity_location.is_some()),
    ("controller-uuid", |c| c.controller_uuid.is_some()),
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database address (historical key name preserved on the wire).
    #[serde(rename = "mongo-addr", default)]
    pub mongo_addr: Option<String>,
    #[serde(rename = "dbname", default)]
    pub dbname: Option<String>,
    #[serde(rename = "api-addr", default)]
    pub api_addr: Option<String>,
    #[serde(
        rename = "state-server-admin",
        alias = "controller-admin",
        default
    )]
    pub controller_admin: Option<String>,
    #[serde(rename = "identity-public-key", default)]
    pub identity_public_key: Option<String>,
    /// Location of the OIDC identity provider.
    #[serde(rename = "identity-location", default)]
    pub identity_location: Option<String>,
    #[serde(rename = "agent-username", default)]
    pub agent_username: Option<String>,
    #[serde(rename = "agent-key", default)]
    pub agent_key: Option<String>,
    #[serde(rename = "access-log", default)]
    pub access_log: Option<String>,
    #[serde(rename = "autocert", default)]
    pub autocert: Option<bool>,
    #[serde(rename = "autocert-url", default)]
    pub autocert_url: Option<String>,
    #[serde(rename = "tls-cert", default)]
    pub tls_cert: Option<String>,
    #[serde(rename = "tls-key", default)]
    pub tls_key: Option<String>,
    #[serde(rename = "controller-uuid", default)]
    pub controller_uuid: Option<String>,
    #[serde(rename = "max-mgo-sessions", default)]
    pub max_mgo_sessions: Option<u32>,
    #[serde(rename = "gui-location", default)]
    pub gui_location: Option<String>,
    #[serde(rename = "logging-level", default)]
    pub logging_level: Option<String>,
    #[serde(rename = "usage-sender-url", default)]
    pub usage_sender_url: Option<String>,
    #[serde(rename = "domain", default)]
    pub domain: Option<String>,
}

impl Config {
    pub fn read(path: &str) -> anyhow::Result<Config> {
        let raw = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Yaml))
            .build()?;
        let cfg: Config = raw.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// All required options must be present; a missing set fails with one
    /// error enumerating every absent field.
    pub fn validate(&self) -> anyhow::Result<()> {
        let missing: Vec<&str> = REQUIRED
            .iter()
            .filter(|(_, present)| !present(self))
            .map(|(name, _)| *name)
            .collect();
        if !missing.is_empty() {
            return Err(anyhow::anyhow!(
                "missing fields {} in config file",
                missing.join(", ")
            ));
        }
        Uuid::parse_str(self.controller_uuid.as_deref().unwrap_or_default())
            .map_err(|_| anyhow::anyhow!("invalid controller-uuid in config file"))?;
        Ok(())
    }

    // Accessors for fields guaranteed present after `validate`.

    pub fn database_addr(&self) -> &str {
        self.mongo_addr.as_deref().unwrap_or_default()
    }

    pub fn api_addr(&self) -> &str {
        self.api_addr.as_deref().unwrap_or_default()
    }

    pub fn controller_admins(&self) -> Vec<String> {
        self.controller_admin
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn identity_location(&self) -> &str {
        self.identity_location.as_deref().unwrap_or_default()
    }

    pub fn controller_uuid(&self) -> Uuid {
        Uuid::parse_str(self.controller_uuid.as_deref().unwrap_or_default())
            .unwrap_or(Uuid::nil())
    }

    pub fn max_sessions(&self) -> u32 {
        self.max_mgo_sessions.unwrap_or(100)
    }

    pub fn agent_username(&self) -> &str {
        self.agent_username.as_deref().unwrap_or("jimm")
    }

    pub fn dashboard_url(&self) -> &str {
        self.gui_location.as_deref().unwrap_or("/")
    }

    pub fn logging_level(&self) -> &str {
        self.logging_level.as_deref().unwrap_or("info")
    }

    /// Public host of this deployment, used as token issuer.
    pub fn public_host(&self) -> String {
        self.domain
            .clone()
            .unwrap_or_else(|| self.api_addr().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> String {
        let path = std::env::temp_dir().join(format!("jimm-config-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_unrelated_config_reports_every_missing_field() {
        let path = write_temp("unrelated.yaml", "foo: 1\n");
        let err = Config::read(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing fields mongo-addr, api-addr, state-server-admin, identity-location, controller-uuid in config file"
        );
    }

    #[test]
    fn test_partial_config_reports_only_missing() {
        let path = write_temp(
            "partial.yaml",
            "mongo-addr: postgres://localhost/jimm\napi-addr: :17070\n",
        );
        let err = Config::read(&path).unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing fields state-server-admin, identity-location, controller-uuid in config file"
        );
    }

    #[test]
    fn test_complete_config_parses() {
        let path = write_temp(
            "complete.yaml",
            concat!(
                "mongo-addr: postgres://localhost/jimm\n",
                "api-addr: 0.0.0.0:8080\n",
                "state-server-admin: controller-admin\n",
                "identity-location: https://idp.example.com\n",
                "controller-uuid: 914487b5-60e7-42bb-bd63-1adc3fd3a388\n",
                "agent-username: foo\n",
                "max-mgo-sessions: 25\n",
                "gui-location: https://dashboard.example.com\n",
            ),
        );
        let cfg = Config::read(&path).unwrap();
        assert_eq!(cfg.database_addr(), "postgres://localhost/jimm");
        assert_eq!(cfg.controller_admins(), vec!["controller-admin".to_string()]);
        assert_eq!(cfg.agent_username(), "foo");
        assert_eq!(cfg.max_sessions(), 25);
        assert_eq!(
            cfg.controller_uuid().to_string(),
            "914487b5-60e7-42bb-bd63-1adc3fd3a388"
        );
    }

    #[test]
    fn test_invalid_controller_uuid_is_its_own_error() {
        let path = write_temp(
            "baduuid.yaml",
            concat!(
                "mongo-addr: postgres://localhost/jimm\n",
                "api-addr: 0.0.0.0:8080\n",
                "state-server-admin: controller-admin\n",
                "identity-location: https://idp.example.com\n",
                "controller-uuid: not-a-uuid\n",
            ),
        );
        let err = Config::read(&path).unwrap_err();
        assert_eq!(err.to_string(), "invalid controller-uuid in config file");
    }

    #[test]
    fn test_controller_admin_accepts_alias() {
        let path = write_temp(
            "alias.yaml",
            concat!(
                "mongo-addr: postgres://localhost/jimm\n",
                "api-addr: 0.0.0.0:8080\n",
                "controller-admin: alice\n",
                "identity-location: https://idp.example.com\n",
                "controller-uuid: 914487b5-60e7-42bb-bd63-1adc3fd3a388\n",
            ),
        );
        let cfg = Config::read(&path).unwrap();
        assert_eq!(cfg.controller_admins(), vec!["alice".to_string()]);
    }
}
