use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::value_objects::{is_service_account, Life, Tag};

/// Uma identidade autenticada (usuário humano ou service account).
/// Identities are created on first authenticated sighting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl Identity {
    pub fn new(name: String, now: DateTime<Utc>) -> Self {
        let display_name = name.split('@').next().unwrap_or(&name).to_string();
        Identity {
            name,
            display_name,
            created_at: now,
            last_login: None,
        }
    }

    pub fn is_service_account(&self) -> bool {
        is_service_account(&self.name)
    }

    pub fn tag(&self) -> Tag {
        if self.is_service_account() {
            Tag::new(crate::domain::value_objects::Kind::ServiceAccount, &self.name)
        } else {
            Tag::user(&self.name)
        }
    }
}

/// Grupo de acesso. Membership lives in the relation store, never here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cloud {
    pub name: String,
    pub cloud_type: String,
    pub endpoint: Option<String>,
    pub identity_endpoint: Option<String>,
    pub storage_endpoint: Option<String>,
    pub auth_types: Vec<String>,
    pub regions: Vec<CloudRegion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudRegion {
    pub cloud: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub identity_endpoint: Option<String>,
    pub storage_endpoint: Option<String>,
}

/// Cloud credential metadata. Attribute values live in the secret store;
/// the database keeps only the key and auth type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudCredential {
    pub cloud: String,
    pub owner: String,
    pub name: String,
    pub auth_type: String,
}

impl CloudCredential {
    /// Stable `(cloud, owner, name)` key, also used as the secret-store path.
    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.cloud, self.owner, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
    pub scope: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub name: String,
    pub uuid: Uuid,
    pub public_address: Option<String>,
    pub ca_cert: Option<String>,
    pub admin_user: String,
    pub host_ports: Vec<Vec<HostPort>>,
    pub cloud: String,
    pub region: Option<String>,
    pub agent_version: Option<String>,
    pub deprecated: bool,
    pub unavailable_since: Option<DateTime<Utc>>,
    pub monitor_lease_owner: Option<String>,
    pub monitor_lease_expiry: Option<DateTime<Utc>>,
    pub stats: ControllerStats,
}

impl Controller {
    pub fn tag(&self) -> Tag {
        Tag::controller(&self.uuid)
    }

    /// Addresses to try when dialing, most specific first.
    pub fn dial_addresses(&self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(addr) = &self.public_address {
            out.push(addr.clone());
        }
        for group in &self.host_ports {
            for hp in group {
                let addr = format!("{}:{}", hp.host, hp.port);
                if !out.contains(&addr) {
                    out.push(addr);
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStats {
    pub model_count: i64,
    pub machine_count: i64,
    pub application_count: i64,
    pub unit_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCounts {
    pub machines: i64,
    pub units: i64,
    pub applications: i64,
    pub cores: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub uuid: Uuid,
    pub controller: String,
    pub cloud_credential: Option<String>,
    pub owner: String,
    pub name: String,
    pub cloud: String,
    pub region: Option<String>,
    pub life: Life,
    pub counts: ModelCounts,
    pub status: Option<String>,
    pub migration_target: Option<String>,
}

impl Model {
    pub fn tag(&self) -> Tag {
        Tag::model(&self.uuid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationOffer {
    pub uuid: Uuid,
    pub url: String,
    pub model_uuid: Uuid,
    pub application_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub model_uuid: Uuid,
    pub machine_id: String,
    pub instance_id: Option<String>,
    pub display_name: Option<String>,
    pub agent_status: Option<String>,
    pub life: Life,
    pub cores: i64,
}

/// Append-only audit record for a dispatched facade call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub time: DateTime<Utc>,
    pub user_tag: String,
    pub facade_method: String,
    pub params: serde_json::Value,
    pub model: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Server-side browser session, keyed by the opaque cookie value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display_name_strips_domain() {
        let now = Utc::now();
        let id = Identity::new("alice@canonical.com".into(), now);
        assert_eq!(id.display_name, "alice");
        assert!(!id.is_service_account());

        let bot = Identity::new("bot@serviceaccount".into(), now);
        assert!(bot.is_service_account());
        assert_eq!(bot.tag().to_string(), "serviceaccount-bot@serviceaccount");
    }

    #[test]
    fn test_dial_addresses_deduplicate() {
        let ctl = Controller {
            name: "ctl1".into(),
            uuid: Uuid::new_v4(),
            public_address: Some("jimm.example.com:17070".into()),
            ca_cert: None,
            admin_user: "admin".into(),
            host_ports: vec![vec![
                HostPort {
                    host: "10.0.0.1".into(),
                    port: 17070,
                    scope: "local-cloud".into(),
                },
                HostPort {
                    host: "10.0.0.1".into(),
                    port: 17070,
                    scope: "local-cloud".into(),
                },
            ]],
            cloud: "aws".into(),
            region: Some("eu-west-1".into()),
            agent_version: None,
            deprecated: false,
            unavailable_since: None,
            monitor_lease_owner: None,
            monitor_lease_expiry: None,
            stats: ControllerStats::default(),
        };
        let addrs = ctl.dial_addresses();
        assert_eq!(
            addrs,
            vec!["jimm.example.com:17070".to_string(), "10.0.0.1:17070".to_string()]
        );
    }

    #[test]
    fn test_session_expiry() {
        let now = Utc::now();
        let s = Session {
            id: "abc".into(),
            identity: "alice@x.com".into(),
            created_at: now,
            expires_at: now,
        };
        assert!(s.is_expired(now));
    }
}
