//! Authorization kernel: resolves a caller and a request into a decision
//! against the relation store, and translates ReBAC relations into Juju
//! permission levels.

use std::collections::BTreeMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::domain::entities::Model;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::{relations, CloudAccess, ControllerAccess, ModelAccess, Tag};
use crate::infra::openfga::{RelationStore, RelationTuple};

/// Outcome of an authorization check. Errors travel separately so that
/// "forbidden" is never conflated with "not found" or a store failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny(String),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

pub struct Authorizer {
    store: Arc<dyn RelationStore>,
    jimm_uuid: Uuid,
    controller_admins: Vec<String>,
}

impl Authorizer {
    pub fn new(
        store: Arc<dyn RelationStore>,
        jimm_uuid: Uuid,
        controller_admins: Vec<String>,
    ) -> Self {
        Authorizer {
            store,
            jimm_uuid,
            controller_admins,
        }
    }

    pub fn jimm_controller_tag(&self) -> Tag {
        Tag::controller(&self.jimm_uuid)
    }

    /// The configured controller administrators hold a well-known
    /// `administrator` relation on the JIMM controller; checks for them
    /// short-circuit without consulting the store.
    fn is_configured_admin(&self, user: &Tag) -> bool {
        self.controller_admins.iter().any(|admin| {
            admin == &user.id || admin == user.id.split('@').next().unwrap_or_default()
        })
    }

    async fn check(&self, tuple: RelationTuple) -> Result<bool, DomainError> {
        self.store.check_relation(&tuple, &[]).await
    }

    /// True when `user` administers `controller` directly or administers the
    /// whole fleet through the JIMM controller.
    pub async fn is_administrator(
        &self,
        user: &Tag,
        controller: &Tag,
    ) -> Result<bool, DomainError> {
        if self.is_configured_admin(user) {
            return Ok(true);
        }
        if self
            .check(RelationTuple::new(
                user.clone(),
                relations::ADMINISTRATOR,
                controller.clone(),
            ))
            .await?
        {
            return Ok(true);
        }
        if controller == &self.jimm_controller_tag() {
            return Ok(false);
        }
        self.check(RelationTuple::new(
            user.clone(),
            relations::ADMINISTRATOR,
            self.jimm_controller_tag(),
        ))
        .await
    }

    /// Gate for fleet-administrative operations.
    pub async fn require_admin(&self, user: &Tag) -> Result<(), DomainError> {
        if self.is_administrator(user, &self.jimm_controller_tag()).await? {
            Ok(())
        } else {
            Err(DomainError::Unauthorized)
        }
    }

    /// Check an explicit user list. Entries may be full identity names or
    /// bare usernames; membership of `everyone` opens the ACL.
    pub fn check_acl(&self, user: &str, acl: &[String]) -> Decision {
        let local = user.split('@').next().unwrap_or(user);
        if acl
            .iter()
            .any(|entry| entry == user || entry == local || entry == "everyone")
        {
            Decision::Allow
        } else {
            Decision::Deny(format!("access denied for {}", user))
        }
    }

    pub async fn get_user_model_access(
        &self,
        user: &Tag,
        model: &Uuid,
    ) -> Result<Option<ModelAccess>, DomainError> {
        let target = Tag::model(model);
        for (relation, access) in [
            (relations::ADMINISTRATOR, ModelAccess::Admin),
            (relations::WRITER, ModelAccess::Write),
            (relations::READER, ModelAccess::Read),
        ] {
            if self
                .check(RelationTuple::new(user.clone(), relation, target.clone()))
                .await?
            {
                return Ok(Some(access));
            }
        }
        Ok(None)
    }

    pub async fn get_user_controller_access(
        &self,
        user: &Tag,
        controller: &Uuid,
    ) -> Result<ControllerAccess, DomainError> {
        if self
            .is_administrator(user, &Tag::controller(controller))
            .await?
        {
            Ok(ControllerAccess::Superuser)
        } else {
            Ok(ControllerAccess::Login)
        }
    }

    pub async fn get_user_cloud_access(
        &self,
        user: &Tag,
        cloud: &str,
    ) -> Result<Option<CloudAccess>, DomainError> {
        let target = Tag::cloud(cloud);
        if self
            .check(RelationTuple::new(
                user.clone(),
                relations::ADMINISTRATOR,
                target.clone(),
            ))
            .await?
        {
            return Ok(Some(CloudAccess::Admin));
        }
        if self
            .check(RelationTuple::new(user.clone(), relations::CAN_ADDMODEL, target))
            .await?
        {
            return Ok(Some(CloudAccess::AddModel));
        }
        Ok(None)
    }

    pub async fn can_read_model(&self, user: &Tag, model: &Uuid) -> Result<bool, DomainError> {
        Ok(self.get_user_model_access(user, model).await?.is_some())
    }

    /// ACL-filtered traversal: models the user may read, in input order.
    pub async fn filter_readable(
        &self,
        user: &Tag,
        models: Vec<Model>,
    ) -> Result<Vec<Model>, DomainError> {
        let mut out = Vec::new();
        for model in models {
            if self.can_read_model(user, &model.uuid).await? {
                out.push(model);
            }
        }
        Ok(out)
    }

    pub async fn can_audit(&self, user: &Tag) -> Result<bool, DomainError> {
        if self.is_administrator(user, &self.jimm_controller_tag()).await? {
            return Ok(true);
        }
        self.check(RelationTuple::new(
            user.clone(),
            relations::AUDIT_LOG_VIEWER,
            self.jimm_controller_tag(),
        ))
        .await
    }

    /// The permission map embedded in JWTs minted for a call that reaches
    /// `controller`, optionally widened with access to one model.
    pub async fn resolve_permissions(
        &self,
        user: &Tag,
        controller: &Uuid,
        model: Option<&Uuid>,
    ) -> Result<BTreeMap<String, String>, DomainError> {
        let mut access = BTreeMap::new();
        let controller_access = self.get_user_controller_access(user, controller).await?;
        access.insert(
            Tag::controller(controller).to_string(),
            controller_access.as_str().to_string(),
        );
        if let Some(model) = model {
            if let Some(model_access) = self.get_user_model_access(user, model).await? {
                access.insert(
                    Tag::model(model).to_string(),
                    model_access.as_str().to_string(),
                );
            }
        }
        Ok(access)
    }

    /// Write the owner's `administrator` relation for a new model.
    pub async fn add_model_owner(&self, owner: &Tag, model: &Uuid) -> Result<(), DomainError> {
        self.store
            .add_relation(&[
                RelationTuple::new(owner.clone(), relations::ADMINISTRATOR, Tag::model(model)),
            ])
            .await
    }

    pub async fn grant_audit_log_access(&self, user: &Tag) -> Result<(), DomainError> {
        self.store
            .add_relation(&[RelationTuple::new(
                user.clone(),
                relations::AUDIT_LOG_VIEWER,
                self.jimm_controller_tag(),
            )])
            .await
    }

    pub async fn revoke_audit_log_access(&self, user: &Tag) -> Result<(), DomainError> {
        self.store
            .remove_relation(&[RelationTuple::new(
                user.clone(),
                relations::AUDIT_LOG_VIEWER,
                self.jimm_controller_tag(),
            )])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::openfga::testing::MemoryRelationStore;

    fn authorizer(store: Arc<MemoryRelationStore>) -> (Authorizer, Uuid) {
        let jimm = Uuid::new_v4();
        (
            Authorizer::new(store, jimm, vec!["controller-admin".to_string()]),
            jimm,
        )
    }

    #[tokio::test]
    async fn test_configured_admin_short_circuits() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, jimm) = authorizer(store);
        let admin = Tag::user("controller-admin@external.com");
        assert!(auth
            .is_administrator(&admin, &Tag::controller(&jimm))
            .await
            .unwrap());
        auth.require_admin(&admin).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_admin_is_unauthorized() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, _) = authorizer(store);
        let bob = Tag::user("bob@external.com");
        let err = auth.require_admin(&bob).await.unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized));
    }

    #[tokio::test]
    async fn test_fleet_admin_administers_every_controller() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, jimm) = authorizer(store.clone());
        let alice = Tag::user("alice@external.com");
        store
            .add_relation(&[RelationTuple::new(
                alice.clone(),
                relations::ADMINISTRATOR,
                Tag::controller(&jimm),
            )])
            .await
            .unwrap();
        let other = Uuid::new_v4();
        assert!(auth
            .is_administrator(&alice, &Tag::controller(&other))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_model_access_resolution_strongest_wins() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, _) = authorizer(store.clone());
        let bob = Tag::user("bob@external.com");
        let model = Uuid::new_v4();
        store
            .add_relation(&[RelationTuple::new(
                bob.clone(),
                relations::WRITER,
                Tag::model(&model),
            )])
            .await
            .unwrap();
        assert_eq!(
            auth.get_user_model_access(&bob, &model).await.unwrap(),
            Some(ModelAccess::Write)
        );
        assert!(auth.can_read_model(&bob, &model).await.unwrap());
    }

    #[tokio::test]
    async fn test_resolved_permission_map() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, _) = authorizer(store.clone());
        let bob = Tag::user("bob@external.com");
        let controller = Uuid::new_v4();
        let model = Uuid::new_v4();
        store
            .add_relation(&[RelationTuple::new(
                bob.clone(),
                relations::READER,
                Tag::model(&model),
            )])
            .await
            .unwrap();
        let map = auth
            .resolve_permissions(&bob, &controller, Some(&model))
            .await
            .unwrap();
        assert_eq!(
            map.get(&format!("controller-{}", controller)).unwrap(),
            "login"
        );
        assert_eq!(map.get(&format!("model-{}", model)).unwrap(), "read");
    }

    #[tokio::test]
    async fn test_check_acl_decision() {
        let store = Arc::new(MemoryRelationStore::default());
        let (auth, _) = authorizer(store);
        let acl = vec!["controller-admin".to_string()];
        assert!(auth.check_acl("controller-admin", &acl).is_allowed());
        assert!(!auth.check_acl("bob", &acl).is_allowed());
        assert!(auth.check_acl("bob", &["everyone".to_string()]).is_allowed());
    }
}
