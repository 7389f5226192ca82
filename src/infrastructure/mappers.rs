use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::domain::entities::*;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::Life;

#[derive(Debug, FromRow)]
pub struct IdentityRow {
    pub name: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Identity {
            name: row.name,
            display_name: row.display_name,
            created_at: row.created_at,
            last_login: row.last_login,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct GroupRow {
    pub uuid: Uuid,
    pub name: String,
}

impl From<GroupRow> for Group {
    fn from(row: GroupRow) -> Self {
        Group {
            uuid: row.uuid,
            name: row.name,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct CloudRow {
    pub name: String,
    pub r#type: String,
    pub endpoint: Option<String>,
    pub identity_endpoint: Option<String>,
    pub storage_endpoint: Option<String>,
    pub auth_types: serde_json::Value,
}

#[derive(Debug, FromRow)]
pub struct CloudRegionRow {
    pub cloud: String,
    pub name: String,
    pub endpoint: Option<String>,
    pub identity_endpoint: Option<String>,
    pub storage_endpoint: Option<String>,
}

impl From<CloudRegionRow> for CloudRegion {
    fn from(row: CloudRegionRow) -> Self {
        CloudRegion {
            cloud: row.cloud,
            name: row.name,
            endpoint: row.endpoint,
            identity_endpoint: row.identity_endpoint,
            storage_endpoint: row.storage_endpoint,
        }
    }
}

pub fn build_cloud(row: CloudRow, regions: Vec<CloudRegionRow>) -> Result<Cloud, DomainError> {
    let auth_types: Vec<String> = serde_json::from_value(row.auth_types)?;
    Ok(Cloud {
        name: row.name,
        cloud_type: row.r#type,
        endpoint: row.endpoint,
        identity_endpoint: row.identity_endpoint,
        storage_endpoint: row.storage_endpoint,
        auth_types,
        regions: regions.into_iter().map(CloudRegion::from).collect(),
    })
}

#[derive(Debug, FromRow)]
pub struct CredentialRow {
    pub cloud: String,
    pub owner: String,
    pub name: String,
    pub auth_type: String,
}

impl From<CredentialRow> for CloudCredential {
    fn from(row: CredentialRow) -> Self {
        CloudCredential {
            cloud: row.cloud,
            owner: row.owner,
            name: row.name,
            auth_type: row.auth_type,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct ControllerRow {
    pub name: String,
    pub uuid: Uuid,
    pub public_address: Option<String>,
    pub ca_cert: Option<String>,
    pub admin_user: String,
    pub host_ports: serde_json::Value,
    pub cloud: String,
    pub region: Option<String>,
    pub agent_version: Option<String>,
    pub deprecated: bool,
    pub unavailable_since: Option<DateTime<Utc>>,
    pub monitor_lease_owner: Option<String>,
    pub monitor_lease_expiry: Option<DateTime<Utc>>,
    pub model_count: i64,
    pub machine_count: i64,
    pub application_count: i64,
    pub unit_count: i64,
}

impl TryFrom<ControllerRow> for Controller {
    type Error = DomainError;

    fn try_from(row: ControllerRow) -> Result<Self, DomainError> {
        let host_ports: Vec<Vec<HostPort>> = serde_json::from_value(row.host_ports)?;
        Ok(Controller {
            name: row.name,
            uuid: row.uuid,
            public_address: row.public_address,
            ca_cert: row.ca_cert,
            admin_user: row.admin_user,
            host_ports,
            cloud: row.cloud,
            region: row.region,
            agent_version: row.agent_version,
            deprecated: row.deprecated,
            unavailable_since: row.unavailable_since,
            monitor_lease_owner: row.monitor_lease_owner,
            monitor_lease_expiry: row.monitor_lease_expiry,
            stats: ControllerStats {
                model_count: row.model_count,
                machine_count: row.machine_count,
                application_count: row.application_count,
                unit_count: row.unit_count,
            },
        })
    }
}

#[derive(Debug, FromRow)]
pub struct ModelRow {
    pub uuid: Uuid,
    pub controller: String,
    pub cloud_credential: Option<String>,
    pub owner: String,
    pub name: String,
    pub cloud: String,
    pub region: Option<String>,
    pub life: String,
    pub machine_count: i64,
    pub unit_count: i64,
    pub application_count: i64,
    pub core_count: i64,
    pub status: Option<String>,
    pub migration_target: Option<String>,
}

impl TryFrom<ModelRow> for Model {
    type Error = DomainError;

    fn try_from(row: ModelRow) -> Result<Self, DomainError> {
        Ok(Model {
            uuid: row.uuid,
            controller: row.controller,
            cloud_credential: row.cloud_credential,
            owner: row.owner,
            name: row.name,
            cloud: row.cloud,
            region: row.region,
            life: Life::from_str(&row.life)?,
            counts: ModelCounts {
                machines: row.machine_count,
                units: row.unit_count,
                applications: row.application_count,
                cores: row.core_count,
            },
            status: row.status,
            migration_target: row.migration_target,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct MachineRow {
    pub model_uuid: Uuid,
    pub machine_id: String,
    pub instance_id: Option<String>,
    pub display_name: Option<String>,
    pub agent_status: Option<String>,
    pub life: String,
    pub cores: i64,
}

impl TryFrom<MachineRow> for MachineInfo {
    type Error = DomainError;

    fn try_from(row: MachineRow) -> Result<Self, DomainError> {
        Ok(MachineInfo {
            model_uuid: row.model_uuid,
            machine_id: row.machine_id,
            instance_id: row.instance_id,
            display_name: row.display_name,
            agent_status: row.agent_status,
            life: Life::from_str(&row.life)?,
            cores: row.cores,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct OfferRow {
    pub uuid: Uuid,
    pub url: String,
    pub model_uuid: Uuid,
    pub application_name: String,
}

impl From<OfferRow> for ApplicationOffer {
    fn from(row: OfferRow) -> Self {
        ApplicationOffer {
            uuid: row.uuid,
            url: row.url,
            model_uuid: row.model_uuid,
            application_name: row.application_name,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct AuditLogRow {
    pub time: DateTime<Utc>,
    pub user_tag: String,
    pub facade_method: String,
    pub params: serde_json::Value,
    pub model: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl From<AuditLogRow> for AuditLogEntry {
    fn from(row: AuditLogRow) -> Self {
        AuditLogEntry {
            time: row.time,
            user_tag: row.user_tag,
            facade_method: row.facade_method,
            params: row.params,
            model: row.model,
            success: row.success,
            error: row.error,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct SessionRow {
    pub id: String,
    pub identity: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            identity: row.identity,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}
