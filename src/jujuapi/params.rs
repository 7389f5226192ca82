use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One Juju RPC frame. Requests carry `type`/`request`/`params`; responses
/// carry `response` or `error`. The `request-id` correlates the two.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(rename = "request-id", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub response: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "error-code", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
}

impl RpcMessage {
    pub fn is_request(&self) -> bool {
        self.type_.is_some() && self.request.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoginRequest {
    #[serde(rename = "auth-tag", skip_serializing_if = "Option::is_none")]
    pub auth_tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<String>,
    /// Serialized JWT asserting the caller's resolved permissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(rename = "client-version", skip_serializing_if = "Option::is_none")]
    pub client_version: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResult {
    #[serde(rename = "controller-tag", default)]
    pub controller_tag: Option<String>,
    #[serde(rename = "model-tag", default)]
    pub model_tag: Option<String>,
    #[serde(rename = "server-version", default)]
    pub server_version: Option<String>,
    #[serde(default)]
    pub servers: Vec<Vec<WireHostPort>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireHostPort {
    pub value: String,
    pub port: u16,
    #[serde(default)]
    pub scope: String,
}

/// One element of an all-watcher batch: `[entity-kind, verb, document]`.
#[derive(Debug, Clone, Deserialize)]
pub struct Delta(pub String, pub String, pub Value);

impl Delta {
    pub fn kind(&self) -> &str {
        &self.0
    }

    pub fn is_remove(&self) -> bool {
        self.1 == "remove"
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelDelta {
    #[serde(rename = "model-uuid")]
    pub model_uuid: uuid::Uuid,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: String,
    #[serde(default)]
    pub life: String,
    #[serde(default)]
    pub status: Option<WireStatus>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireStatus {
    #[serde(default)]
    pub current: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MachineDelta {
    #[serde(rename = "model-uuid")]
    pub model_uuid: uuid::Uuid,
    pub id: String,
    #[serde(rename = "instance-id", default)]
    pub instance_id: Option<String>,
    #[serde(rename = "display-name", default)]
    pub display_name: Option<String>,
    #[serde(rename = "agent-status", default)]
    pub agent_status: Option<WireStatus>,
    #[serde(default)]
    pub life: String,
    #[serde(rename = "hardware-characteristics", default)]
    pub hardware: Option<HardwareCharacteristics>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareCharacteristics {
    #[serde(rename = "cpu-cores", default)]
    pub cpu_cores: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnitDelta {
    #[serde(rename = "model-uuid")]
    pub model_uuid: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub application: String,
    #[serde(default)]
    pub life: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApplicationDelta {
    #[serde(rename = "model-uuid")]
    pub model_uuid: uuid::Uuid,
    pub name: String,
    #[serde(default)]
    pub life: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OfferDelta {
    #[serde(rename = "model-uuid")]
    pub model_uuid: uuid::Uuid,
    #[serde(rename = "offer-uuid")]
    pub offer_uuid: uuid::Uuid,
    #[serde(rename = "offer-url", default)]
    pub offer_url: String,
    #[serde(rename = "application-name", default)]
    pub application_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllWatcherId {
    #[serde(rename = "watcher-id")]
    pub watcher_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllWatcherNextResults {
    #[serde(default)]
    pub deltas: Vec<Delta>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireModelInfo {
    pub name: String,
    pub uuid: uuid::Uuid,
    #[serde(rename = "controller-uuid", default)]
    pub controller_uuid: Option<uuid::Uuid>,
    #[serde(rename = "owner-tag", default)]
    pub owner_tag: Option<String>,
    #[serde(rename = "cloud-tag", default)]
    pub cloud_tag: Option<String>,
    #[serde(rename = "cloud-region", default)]
    pub cloud_region: Option<String>,
    #[serde(rename = "cloud-credential-tag", default)]
    pub cloud_credential_tag: Option<String>,
    #[serde(default)]
    pub life: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCloud {
    #[serde(rename = "type", default)]
    pub cloud_type: String,
    #[serde(rename = "auth-types", default)]
    pub auth_types: Vec<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(rename = "identity-endpoint", default)]
    pub identity_endpoint: Option<String>,
    #[serde(rename = "storage-endpoint", default)]
    pub storage_endpoint: Option<String>,
    #[serde(default)]
    pub regions: Vec<WireCloudRegion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireCloudRegion {
    pub name: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(rename = "identity-endpoint", default)]
    pub identity_endpoint: Option<String>,
    #[serde(rename = "storage-endpoint", default)]
    pub storage_endpoint: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rpc_message_round_trip() {
        let raw = r#"{"request-id":7,"type":"Admin","version":3,"request":"Login","params":{"auth-tag":"user-admin"}}"#;
        let msg: RpcMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.request_id, Some(7));
        assert!(msg.is_request());
        let back = serde_json::to_value(&msg).unwrap();
        assert_eq!(back["type"], "Admin");
        assert_eq!(back["params"]["auth-tag"], "user-admin");
        assert!(back.get("response").is_none());
    }

    #[test]
    fn test_delta_shape() {
        let raw = r#"{"deltas":[["model","change",{"model-uuid":"00000000-0000-0000-0000-000000000001","name":"m1","life":"alive"}],["machine","remove",{"model-uuid":"00000000-0000-0000-0000-000000000001","id":"0"}]]}"#;
        let next: AllWatcherNextResults = serde_json::from_str(raw).unwrap();
        assert_eq!(next.deltas.len(), 2);
        assert_eq!(next.deltas[0].kind(), "model");
        assert!(!next.deltas[0].is_remove());
        assert!(next.deltas[1].is_remove());
        let machine: MachineDelta = serde_json::from_value(next.deltas[1].2.clone()).unwrap();
        assert_eq!(machine.id, "0");
    }

    #[test]
    fn test_error_frame() {
        let raw = r#"{"request-id":2,"error":"permission denied","error-code":"unauthorized access"}"#;
        let msg: RpcMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.error_code.as_deref(), Some("unauthorized access"));
        assert!(!msg.is_request());
    }
}
