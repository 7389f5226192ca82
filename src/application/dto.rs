use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::entities::{AuditLogEntry, Controller, Group, Model, ModelCounts};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddControllerRequest {
    pub name: String,
    pub uuid: Uuid,
    #[serde(default)]
    pub public_address: Option<String>,
    #[serde(default)]
    pub api_addresses: Vec<String>,
    #[serde(default, alias = "ca-cert")]
    pub ca_certificate: Option<String>,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub cloud: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerInfo {
    pub name: String,
    pub uuid: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_address: Option<String>,
    pub api_addresses: Vec<String>,
    pub cloud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_version: Option<String>,
    pub deprecated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unavailable_since: Option<DateTime<Utc>>,
    pub status: String,
}

impl From<&Controller> for ControllerInfo {
    fn from(ctl: &Controller) -> Self {
        ControllerInfo {
            name: ctl.name.clone(),
            uuid: ctl.uuid,
            public_address: ctl.public_address.clone(),
            api_addresses: ctl.dial_addresses(),
            cloud: ctl.cloud.clone(),
            region: ctl.region.clone(),
            agent_version: ctl.agent_version.clone(),
            deprecated: ctl.deprecated,
            unavailable_since: ctl.unavailable_since,
            status: if ctl.unavailable_since.is_some() {
                "unavailable".to_string()
            } else {
                "available".to_string()
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RemoveControllerRequest {
    pub name: String,
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SetControllerDeprecatedRequest {
    pub name: String,
    #[serde(default)]
    pub deprecated: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AddModelRequest {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub cloud: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub controller: Option<String>,
    #[serde(default, alias = "cloud-credential")]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelInfoDto {
    pub name: String,
    pub uuid: Uuid,
    pub controller: String,
    pub owner: String,
    pub cloud: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub life: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    pub counts: ModelCounts,
}

impl From<&Model> for ModelInfoDto {
    fn from(model: &Model) -> Self {
        ModelInfoDto {
            name: model.name.clone(),
            uuid: model.uuid,
            controller: model.controller.clone(),
            owner: model.owner.clone(),
            cloud: model.cloud.clone(),
            region: model.region.clone(),
            life: model.life.to_string(),
            status: model.status.clone(),
            counts: model.counts,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ImportModelRequest {
    pub controller: String,
    pub model_uuid: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MigrateModelRequest {
    pub model_tag: String,
    pub target_controller: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateMigratedModelRequest {
    pub model_tag: String,
    pub target_controller: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddGroupRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RenameGroupRequest {
    pub name: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupInfo {
    pub uuid: Uuid,
    pub name: String,
}

impl From<&Group> for GroupInfo {
    fn from(group: &Group) -> Self {
        GroupInfo {
            uuid: group.uuid,
            name: group.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct CredentialInfo {
    pub cloud: String,
    pub owner: String,
    pub name: String,
    pub auth_type: String,
}

impl From<&crate::domain::entities::CloudCredential> for CredentialInfo {
    fn from(credential: &crate::domain::entities::CloudCredential) -> Self {
        CredentialInfo {
            cloud: credential.cloud.clone(),
            owner: credential.owner.clone(),
            name: credential.name.clone(),
            auth_type: credential.auth_type.clone(),
        }
    }
}

/// A relation tuple on the wire: tagged identifiers on both ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelationDto {
    pub object: String,
    pub relation: String,
    pub target_object: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ListRelationshipTuplesRequest {
    #[serde(default)]
    pub tuple: Option<PartialRelationDto>,
    #[serde(default)]
    pub page_size: Option<i32>,
    #[serde(default)]
    pub continuation_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PartialRelationDto {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub target_object: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FindAuditEventsRequest {
    #[serde(default)]
    pub after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_tag: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct AuditEventDto {
    pub time: DateTime<Utc>,
    pub user_tag: String,
    pub facade_method: String,
    pub params: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&AuditLogEntry> for AuditEventDto {
    fn from(entry: &AuditLogEntry) -> Self {
        AuditEventDto {
            time: entry.time,
            user_tag: entry.user_tag.clone(),
            facade_method: entry.facade_method.clone(),
            params: entry.params.clone(),
            model: entry.model.clone(),
            success: entry.success,
            error: entry.error.clone(),
        }
    }
}
