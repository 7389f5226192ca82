//! Cliente do relation store (OpenFGA). O grafo ReBAC inteiro vive lá;
//! este módulo expõe o oráculo de tuplas usado pelo kernel de autorização.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::domain::errors::DomainError;
use crate::domain::value_objects::Tag;

/// A `(object, relation, target)` triple in the relation store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationTuple {
    pub object: Tag,
    pub relation: String,
    pub target: Tag,
}

impl RelationTuple {
    pub fn new(object: Tag, relation: impl Into<String>, target: Tag) -> Self {
        RelationTuple {
            object,
            relation: relation.into(),
            target,
        }
    }
}

/// Partial tuple used for listings. Fields hold wire-form identifiers
/// (`kind:id[#relation]`); the target may be type-only (`model:`).
#[derive(Debug, Clone, Default)]
pub struct TupleFilter {
    pub object: Option<String>,
    pub relation: Option<String>,
    pub target: Option<String>,
}

/// Wire form of a tag: `kind:id[#relation]`.
pub fn wire(tag: &Tag) -> String {
    match &tag.relation {
        Some(rel) => format!("{}:{}#{}", tag.kind, tag.id, rel),
        None => format!("{}:{}", tag.kind, tag.id),
    }
}

/// Parse the wire form back into a tag.
pub fn from_wire(s: &str) -> Result<Tag, DomainError> {
    let (kind, rest) = s
        .split_once(':')
        .ok_or_else(|| DomainError::BadRequest(format!("{:?} is not a valid tuple entry", s)))?;
    Tag::parse(&format!("{}-{}", kind, rest))
}

#[async_trait]
pub trait RelationStore: Send + Sync {
    async fn add_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError>;
    async fn remove_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError>;
    async fn check_relation(
        &self,
        tuple: &RelationTuple,
        contextual: &[RelationTuple],
    ) -> Result<bool, DomainError>;
    /// Token-based pagination; tokens are opaque and round-trip unchanged.
    async fn list_relationship_tuples(
        &self,
        filter: &TupleFilter,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<RelationTuple>, String), DomainError>;
    async fn list_object_relations(
        &self,
        user: &Tag,
        object: &Tag,
        page_size: i32,
        entitlement_token: &str,
    ) -> Result<(Vec<RelationTuple>, String), DomainError>;
}

#[derive(Debug, Clone)]
pub struct OpenFgaConfig {
    pub addr: String,
    pub store_id: String,
    pub auth_model_id: String,
    pub api_token: Option<String>,
    pub timeout: Duration,
}

impl Default for OpenFgaConfig {
    fn default() -> Self {
        Self {
            addr: std::env::var("OPENFGA_ADDR")
                .unwrap_or_else(|_| "http://openfga:8080".to_string()),
            store_id: std::env::var("OPENFGA_STORE").unwrap_or_default(),
            auth_model_id: std::env::var("OPENFGA_AUTH_MODEL").unwrap_or_default(),
            api_token: std::env::var("OPENFGA_API_TOKEN").ok(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Clone)]
pub struct OpenFgaClient {
    config: OpenFgaConfig,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CheckResponse {
    allowed: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ReadResponse {
    tuples: Option<Vec<ReadTuple>>,
    continuation_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReadTuple {
    key: ReadTupleKey,
}

#[derive(Debug, Deserialize)]
struct ReadTupleKey {
    user: String,
    relation: String,
    object: String,
}

impl OpenFgaClient {
    pub fn new(config: OpenFgaConfig) -> anyhow::Result<Self> {
        if config.store_id.trim().is_empty() {
            return Err(anyhow::anyhow!("OPENFGA_STORE must be configured"));
        }
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    async fn post(&self, endpoint: &str, body: Value) -> Result<Value, DomainError> {
        let url = format!(
            "{}/stores/{}/{}",
            self.config.addr, self.config.store_id, endpoint
        );
        let mut req = self.client.post(&url).json(&body);
        if let Some(token) = &self.config.api_token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .map_err(|e| DomainError::Internal(format!("relation store: {}", e)))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .await
            .map_err(|e| DomainError::Internal(format!("relation store response: {}", e)))?;
        if !status.is_success() {
            let code = value
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if code == "write_failed_due_to_invalid_input" {
                return Err(DomainError::AlreadyExists("relation".to_string()));
            }
            return Err(DomainError::Internal(format!(
                "relation store {}: {} {}",
                endpoint, status, value
            )));
        }
        debug!(endpoint, "relation store call succeeded");
        Ok(value)
    }

    fn tuple_key(tuple: &RelationTuple) -> Value {
        json!({
            "user": wire(&tuple.object),
            "relation": tuple.relation,
            "object": wire(&tuple.target),
        })
    }
}

#[async_trait]
impl RelationStore for OpenFgaClient {
    async fn add_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError> {
        if tuples.is_empty() {
            return Ok(());
        }
        let keys: Vec<Value> = tuples.iter().map(Self::tuple_key).collect();
        self.post(
            "write",
            json!({
                "writes": { "tuple_keys": keys },
                "authorization_model_id": self.config.auth_model_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn remove_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError> {
        if tuples.is_empty() {
            return Ok(());
        }
        let keys: Vec<Value> = tuples.iter().map(Self::tuple_key).collect();
        self.post(
            "write",
            json!({
                "deletes": { "tuple_keys": keys },
                "authorization_model_id": self.config.auth_model_id,
            }),
        )
        .await?;
        Ok(())
    }

    async fn check_relation(
        &self,
        tuple: &RelationTuple,
        contextual: &[RelationTuple],
    ) -> Result<bool, DomainError> {
        let mut body = json!({
            "tuple_key": Self::tuple_key(tuple),
            "authorization_model_id": self.config.auth_model_id,
        });
        if !contextual.is_empty() {
            let keys: Vec<Value> = contextual.iter().map(Self::tuple_key).collect();
            body["contextual_tuples"] = json!({ "tuple_keys": keys });
        }
        let value = self.post("check", body).await?;
        let resp: CheckResponse = serde_json::from_value(value)
            .map_err(|e| DomainError::Internal(format!("relation store check: {}", e)))?;
        Ok(resp.allowed.unwrap_or(false))
    }

    async fn list_relationship_tuples(
        &self,
        filter: &TupleFilter,
        page_size: i32,
        page_token: &str,
    ) -> Result<(Vec<RelationTuple>, String), DomainError> {
        let mut tuple_key = serde_json::Map::new();
        if let Some(object) = &filter.object {
            tuple_key.insert("user".to_string(), json!(object));
        }
        if let Some(relation) = &filter.relation {
            tuple_key.insert("relation".to_string(), json!(relation));
        }
        if let Some(target) = &filter.target {
            tuple_key.insert("object".to_string(), json!(target));
        }
        let mut body = json!({ "page_size": page_size });
        if !tuple_key.is_empty() {
            body["tuple_key"] = Value::Object(tuple_key);
        }
        if !page_token.is_empty() {
            body["continuation_token"] = json!(page_token);
        }
        let value = self.post("read", body).await?;
        let resp: ReadResponse = serde_json::from_value(value)
            .map_err(|e| DomainError::Internal(format!("relation store read: {}", e)))?;
        let mut out = Vec::new();
        for t in resp.tuples.unwrap_or_default() {
            out.push(RelationTuple {
                object: from_wire(&t.key.user)?,
                relation: t.key.relation,
                target: from_wire(&t.key.object)?,
            });
        }
        Ok((out, resp.continuation_token.unwrap_or_default()))
    }

    async fn list_object_relations(
        &self,
        user: &Tag,
        object: &Tag,
        page_size: i32,
        entitlement_token: &str,
    ) -> Result<(Vec<RelationTuple>, String), DomainError> {
        let filter = TupleFilter {
            object: Some(wire(user)),
            relation: None,
            target: Some(wire(object)),
        };
        self.list_relationship_tuples(&filter, page_size, entitlement_token)
            .await
    }
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use crate::domain::value_objects::relations;
    use parking_lot::Mutex;

    /// In-memory relation store with the same relation implications the
    /// production authorization model carries (administrator ⊇ writer ⊇
    /// reader, group membership expansion).
    #[derive(Default)]
    pub struct MemoryRelationStore {
        tuples: Mutex<Vec<RelationTuple>>,
    }

    impl MemoryRelationStore {
        fn implied_by(relation: &str) -> Vec<&'static str> {
            match relation {
                relations::READER => vec![
                    relations::READER,
                    relations::WRITER,
                    relations::ADMINISTRATOR,
                ],
                relations::WRITER => vec![relations::WRITER, relations::ADMINISTRATOR],
                other => vec![match other {
                    relations::ADMINISTRATOR => relations::ADMINISTRATOR,
                    relations::MEMBER => relations::MEMBER,
                    relations::CONSUMER => relations::CONSUMER,
                    relations::AUDIT_LOG_VIEWER => relations::AUDIT_LOG_VIEWER,
                    relations::CAN_ADDMODEL => relations::CAN_ADDMODEL,
                    relations::CONTROLLER => relations::CONTROLLER,
                    _ => return vec![],
                }],
            }
        }

        fn holds(&self, all: &[RelationTuple], tuple: &RelationTuple) -> bool {
            for relation in Self::implied_by(&tuple.relation) {
                // direct tuple
                if all.iter().any(|t| {
                    t.object == tuple.object && t.relation == relation && t.target == tuple.target
                }) {
                    return true;
                }
                // via group membership: user -member-> group and
                // group#member -relation-> target
                for membership in all.iter().filter(|t| {
                    t.object == tuple.object
                        && t.relation == relations::MEMBER
                        && t.target.kind == crate::domain::value_objects::Kind::Group
                }) {
                    let group_member = Tag {
                        kind: crate::domain::value_objects::Kind::Group,
                        id: membership.target.id.clone(),
                        relation: Some(relations::MEMBER.to_string()),
                    };
                    if all.iter().any(|t| {
                        t.object == group_member
                            && t.relation == relation
                            && t.target == tuple.target
                    }) {
                        return true;
                    }
                }
            }
            false
        }
    }

    #[async_trait]
    impl RelationStore for MemoryRelationStore {
        async fn add_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError> {
            let mut all = self.tuples.lock();
            for tuple in tuples {
                if all.contains(tuple) {
                    return Err(DomainError::AlreadyExists("relation".to_string()));
                }
                all.push(tuple.clone());
            }
            Ok(())
        }

        async fn remove_relation(&self, tuples: &[RelationTuple]) -> Result<(), DomainError> {
            let mut all = self.tuples.lock();
            all.retain(|t| !tuples.contains(t));
            Ok(())
        }

        async fn check_relation(
            &self,
            tuple: &RelationTuple,
            contextual: &[RelationTuple],
        ) -> Result<bool, DomainError> {
            let mut all = self.tuples.lock().clone();
            all.extend_from_slice(contextual);
            Ok(self.holds(&all, tuple))
        }

        async fn list_relationship_tuples(
            &self,
            filter: &TupleFilter,
            _page_size: i32,
            _page_token: &str,
        ) -> Result<(Vec<RelationTuple>, String), DomainError> {
            let all = self.tuples.lock();
            let out = all
                .iter()
                .filter(|t| {
                    filter
                        .object
                        .as_ref()
                        .map(|o| wire(&t.object) == *o)
                        .unwrap_or(true)
                        && filter
                            .relation
                            .as_ref()
                            .map(|r| &t.relation == r)
                            .unwrap_or(true)
                        && filter
                            .target
                            .as_ref()
                            .map(|target| {
                                let w = wire(&t.target);
                                if target.ends_with(':') {
                                    w.starts_with(target.as_str())
                                } else {
                                    w == *target
                                }
                            })
                            .unwrap_or(true)
                })
                .cloned()
                .collect();
            Ok((out, String::new()))
        }

        async fn list_object_relations(
            &self,
            user: &Tag,
            object: &Tag,
            page_size: i32,
            entitlement_token: &str,
        ) -> Result<(Vec<RelationTuple>, String), DomainError> {
            let filter = TupleFilter {
                object: Some(wire(user)),
                relation: None,
                target: Some(wire(object)),
            };
            self.list_relationship_tuples(&filter, page_size, entitlement_token)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryRelationStore;
    use super::*;
    use crate::domain::value_objects::{relations, Kind};
    use uuid::Uuid;

    #[test]
    fn test_wire_round_trip() {
        let uuid = Uuid::new_v4();
        let tag = Tag::group(&uuid).with_relation(relations::MEMBER);
        let s = wire(&tag);
        assert_eq!(s, format!("group:{}#member", uuid));
        assert_eq!(from_wire(&s).unwrap(), tag);
    }

    #[tokio::test]
    async fn test_membership_expansion() {
        let store = MemoryRelationStore::default();
        let group = Uuid::new_v4();
        let model = Uuid::new_v4();
        store
            .add_relation(&[
                RelationTuple::new(
                    Tag::user("bob@x.com"),
                    relations::MEMBER,
                    Tag::group(&group),
                ),
                RelationTuple::new(
                    Tag::group(&group).with_relation(relations::MEMBER),
                    relations::WRITER,
                    Tag::model(&model),
                ),
            ])
            .await
            .unwrap();

        // writer via group, and reader implied by writer
        for relation in [relations::WRITER, relations::READER] {
            let tuple =
                RelationTuple::new(Tag::user("bob@x.com"), relation, Tag::model(&model));
            assert!(store.check_relation(&tuple, &[]).await.unwrap(), "{relation}");
        }
        let admin =
            RelationTuple::new(Tag::user("bob@x.com"), relations::ADMINISTRATOR, Tag::model(&model));
        assert!(!store.check_relation(&admin, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_add_rejected() {
        let store = MemoryRelationStore::default();
        let model = Uuid::new_v4();
        let tuple = RelationTuple::new(
            Tag::user("bob@x.com"),
            relations::READER,
            Tag::model(&model),
        );
        store.add_relation(std::slice::from_ref(&tuple)).await.unwrap();
        let err = store.add_relation(std::slice::from_ref(&tuple)).await.unwrap_err();
        assert!(matches!(err, DomainError::AlreadyExists(_)));
    }
}
