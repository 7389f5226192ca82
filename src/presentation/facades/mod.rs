//! Explicit facade registry: `(facade, version, method) → handler`.
//!
//! Four JIMM facade versions are supported; v3 layers model import and
//! migration methods on v2, and v4 layers group, relation and cross-model
//! query methods on v3.

pub mod admin;
pub mod jimm;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::domain::errors::DomainError;
use crate::presentation::websocket::WsSession;

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Value, DomainError>> + Send + 'a>>;
pub type Handler = for<'a> fn(&'a mut WsSession, Value) -> HandlerFuture<'a>;

pub struct Registry {
    map: HashMap<(&'static str, u32, &'static str), Handler>,
}

impl Registry {
    pub fn new() -> Self {
        let mut registry = Registry {
            map: HashMap::new(),
        };

        registry.add("Admin", &[3, 4], "Login", admin::login);
        registry.add("Admin", &[4], "LoginDevice", admin::login_device);
        registry.add(
            "Admin",
            &[4],
            "GetDeviceSessionToken",
            admin::get_device_session_token,
        );
        registry.add(
            "Admin",
            &[4],
            "LoginWithSessionToken",
            admin::login_with_session_token,
        );
        registry.add(
            "Admin",
            &[4],
            "LoginWithClientCredentials",
            admin::login_with_client_credentials,
        );
        registry.add("Pinger", &[1], "Ping", admin::ping);

        // JIMM v2 baseline.
        registry.add("JIMM", &[2, 3, 4], "ListControllers", jimm::list_controllers);
        registry.add("JIMM", &[2, 3, 4], "AddController", jimm::add_controller);
        registry.add("JIMM", &[2, 3, 4], "RemoveController", jimm::remove_controller);
        registry.add(
            "JIMM",
            &[2, 3, 4],
            "SetControllerDeprecated",
            jimm::set_controller_deprecated,
        );
        registry.add("JIMM", &[2, 3, 4], "AddModel", jimm::add_model);
        registry.add("JIMM", &[2, 3, 4], "ListModels", jimm::list_models);
        registry.add(
            "JIMM",
            &[2, 3, 4],
            "UpdateCloudCredential",
            jimm::update_cloud_credential,
        );
        registry.add(
            "JIMM",
            &[2, 3, 4],
            "ListCloudCredentials",
            jimm::list_cloud_credentials,
        );
        registry.add("JIMM", &[2, 3, 4], "FindAuditEvents", jimm::find_audit_events);
        registry.add(
            "JIMM",
            &[2, 3, 4],
            "GrantAuditLogAccess",
            jimm::grant_audit_log_access,
        );
        registry.add(
            "JIMM",
            &[2, 3, 4],
            "RevokeAuditLogAccess",
            jimm::revoke_audit_log_access,
        );

        // v3 adds import and migration.
        registry.add("JIMM", &[3, 4], "ImportModel", jimm::import_model);
        registry.add(
            "JIMM",
            &[3, 4],
            "UpdateMigratedModel",
            jimm::update_migrated_model,
        );
        registry.add("JIMM", &[3, 4], "InitiateMigration", jimm::initiate_migration);
        registry.add("JIMM", &[3, 4], "PurgeLogs", jimm::purge_logs);

        // v4 adds groups, relations and the cross-model query.
        registry.add("JIMM", &[4], "AddGroup", jimm::add_group);
        registry.add("JIMM", &[4], "RenameGroup", jimm::rename_group);
        registry.add("JIMM", &[4], "RemoveGroup", jimm::remove_group);
        registry.add("JIMM", &[4], "ListGroups", jimm::list_groups);
        registry.add("JIMM", &[4], "AddRelation", jimm::add_relation);
        registry.add("JIMM", &[4], "RemoveRelation", jimm::remove_relation);
        registry.add("JIMM", &[4], "CheckRelation", jimm::check_relation);
        registry.add(
            "JIMM",
            &[4],
            "ListRelationshipTuples",
            jimm::list_relationship_tuples,
        );
        registry.add("JIMM", &[4], "CrossModelQuery", jimm::cross_model_query);

        registry
    }

    fn add(&mut self, facade: &'static str, versions: &[u32], method: &'static str, handler: Handler) {
        for version in versions {
            self.map.insert((facade, *version, method), handler);
        }
    }

    pub fn lookup(&self, facade: &str, version: u32, method: &str) -> Option<Handler> {
        // Keys are static strings; match by value.
        self.map
            .iter()
            .find(|((f, v, m), _)| *f == facade && *v == version && *m == method)
            .map(|(_, handler)| *handler)
    }

    /// Facade list advertised in login results.
    pub fn facades(&self) -> Value {
        let mut versions: HashMap<&'static str, Vec<u32>> = HashMap::new();
        for (facade, version, _) in self.map.keys() {
            let entry = versions.entry(facade).or_default();
            if !entry.contains(version) {
                entry.push(*version);
            }
        }
        let mut names: Vec<&&'static str> = versions.keys().collect();
        names.sort();
        let list: Vec<Value> = names
            .into_iter()
            .map(|name| {
                let mut v = versions[*name].clone();
                v.sort_unstable();
                serde_json::json!({"name": name, "versions": v})
            })
            .collect();
        Value::Array(list)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_layering() {
        let registry = Registry::new();
        // v2 baseline is visible at every version
        for v in [2, 3, 4] {
            assert!(registry.lookup("JIMM", v, "AddController").is_some(), "v{v}");
        }
        // v3 layering is not visible at v2
        assert!(registry.lookup("JIMM", 2, "ImportModel").is_none());
        assert!(registry.lookup("JIMM", 3, "ImportModel").is_some());
        // v4 layering is not visible at v3
        assert!(registry.lookup("JIMM", 3, "AddGroup").is_none());
        assert!(registry.lookup("JIMM", 4, "AddGroup").is_some());
    }

    #[test]
    fn test_unknown_method_misses() {
        let registry = Registry::new();
        assert!(registry.lookup("JIMM", 4, "NoSuchMethod").is_none());
        assert!(registry.lookup("NoSuchFacade", 1, "Login").is_none());
    }

    #[test]
    fn test_facade_listing() {
        let registry = Registry::new();
        let facades = registry.facades();
        let list = facades.as_array().unwrap();
        let jimm = list
            .iter()
            .find(|f| f["name"] == "JIMM")
            .expect("JIMM facade advertised");
        assert_eq!(jimm["versions"], serde_json::json!([2, 3, 4]));
    }
}
