use serde_json::json;
use uuid::Uuid;

use crate::application::dto::*;
use crate::domain::entities::{Controller, Model, ModelCounts};
use crate::domain::errors::DomainError;
use crate::domain::repositories::{
    CloudRepository, ControllerRepository, IdentityRepository, ModelRepository,
};
use crate::domain::value_objects::{Kind, Life, Tag};
use crate::infra::vault::SecretStore;
use crate::jujuapi::ConnectionPool;
use crate::permissions::Authorizer;

fn owner_tag(owner: &str) -> String {
    format!("user-{}", owner)
}

fn credential_tag(cloud: &str, owner: &str, name: &str) -> String {
    format!("cloudcred-{}_{}_{}", cloud, owner, name)
}

fn parse_model_tag(tag: &str) -> Result<Uuid, DomainError> {
    let parsed = Tag::parse(tag)?;
    if parsed.kind != Kind::Model {
        return Err(DomainError::BadRequest(format!(
            "{:?} is not a model tag",
            tag
        )));
    }
    Ok(Uuid::parse_str(&parsed.id)?)
}

/// Deterministic controller selection: matching cloud (and region when
/// supplied), deprecated controllers skipped, lowest name wins.
pub async fn select_controller(
    controllers: &dyn ControllerRepository,
    clouds: &dyn CloudRepository,
    cloud: &str,
    region: Option<&str>,
) -> Result<Controller, DomainError> {
    let mut names = clouds.controllers_for(cloud, region).await?;
    if names.is_empty() {
        names = controllers
            .list()
            .await?
            .into_iter()
            .filter(|ctl| {
                ctl.cloud == cloud
                    && region
                        .map(|r| ctl.region.as_deref() == Some(r))
                        .unwrap_or(true)
            })
            .map(|ctl| ctl.name)
            .collect();
    }
    names.sort();
    for name in names {
        if let Some(ctl) = controllers.get_by_name(&name).await? {
            if !ctl.deprecated {
                return Ok(ctl);
            }
        }
    }
    Err(DomainError::NotFound(format!(
        "no controller found for cloud {} {}",
        cloud,
        region.unwrap_or("(any region)")
    )))
}

pub struct AddModelUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    clouds: &'a dyn CloudRepository,
    models: &'a dyn ModelRepository,
    identities: &'a dyn IdentityRepository,
    pool: &'a ConnectionPool,
    authorizer: &'a Authorizer,
}

impl<'a> AddModelUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        clouds: &'a dyn CloudRepository,
        models: &'a dyn ModelRepository,
        identities: &'a dyn IdentityRepository,
        pool: &'a ConnectionPool,
        authorizer: &'a Authorizer,
    ) -> Self {
        AddModelUseCase {
            controllers,
            clouds,
            models,
            identities,
            pool,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: AddModelRequest,
    ) -> Result<ModelInfoDto, DomainError> {
        let owner = if request.owner.is_empty() {
            caller.id.clone()
        } else {
            request.owner.clone()
        };
        // Creating a model for someone else is an administrative operation.
        if owner != caller.id {
            self.authorizer.require_admin(caller).await?;
        }

        let controller = match &request.controller {
            Some(name) => self
                .controllers
                .get_by_name(name)
                .await?
                .ok_or_else(|| DomainError::NotFound(format!("controller {}", name)))?,
            None => {
                select_controller(
                    self.controllers,
                    self.clouds,
                    &request.cloud,
                    request.region.as_deref(),
                )
                .await?
            }
        };

        let credential = request
            .credential
            .as_deref()
            .map(|name| credential_tag(&request.cloud, &owner, name));
        let conn = self.pool.open_api_from_doc(&controller).await?;
        let wire = conn
            .create_model(
                &request.name,
                &owner_tag(&owner),
                &format!("cloud-{}", request.cloud),
                request.region.as_deref(),
                credential.as_deref(),
            )
            .await?;
        drop(conn);

        let model = Model {
            uuid: wire.uuid,
            controller: controller.name.clone(),
            cloud_credential: request
                .credential
                .as_deref()
                .map(|name| format!("{}/{}/{}", request.cloud, owner, name)),
            owner: owner.clone(),
            name: request.name.clone(),
            cloud: request.cloud.clone(),
            region: wire.cloud_region.or(request.region.clone()),
            life: Life::Alive,
            counts: ModelCounts::default(),
            status: None,
            migration_target: None,
        };
        self.models.add(&model).await?;
        self.identities
            .upsert(&owner, chrono::Utc::now())
            .await?;
        self.authorizer
            .add_model_owner(&Tag::user(&owner), &model.uuid)
            .await?;
        Ok(ModelInfoDto::from(&model))
    }
}

pub struct ImportModelUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    models: &'a dyn ModelRepository,
    identities: &'a dyn IdentityRepository,
    pool: &'a ConnectionPool,
    authorizer: &'a Authorizer,
}

impl<'a> ImportModelUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        models: &'a dyn ModelRepository,
        identities: &'a dyn IdentityRepository,
        pool: &'a ConnectionPool,
        authorizer: &'a Authorizer,
    ) -> Self {
        ImportModelUseCase {
            controllers,
            models,
            identities,
            pool,
            authorizer,
        }
    }

    /// Start managing a model that already lives on a registered controller.
    pub async fn execute(
        &self,
        caller: &Tag,
        request: ImportModelRequest,
    ) -> Result<ModelInfoDto, DomainError> {
        self.authorizer.require_admin(caller).await?;
        let controller = self
            .controllers
            .get_by_name(&request.controller)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("controller {}", request.controller)))?;
        if self.models.get_by_uuid(&request.model_uuid).await?.is_some() {
            return Err(DomainError::AlreadyExists(format!(
                "model {}",
                request.model_uuid
            )));
        }
        let conn = self.pool.open_api_from_doc(&controller).await?;
        let wire = conn.model_info(&request.model_uuid).await?;
        drop(conn);

        let owner = wire
            .owner_tag
            .as_deref()
            .and_then(|tag| tag.strip_prefix("user-"))
            .unwrap_or("unknown@external")
            .to_string();
        let cloud = wire
            .cloud_tag
            .as_deref()
            .and_then(|tag| tag.strip_prefix("cloud-"))
            .unwrap_or(&controller.cloud)
            .to_string();
        let model = Model {
            uuid: wire.uuid,
            controller: controller.name.clone(),
            cloud_credential: None,
            owner: owner.clone(),
            name: wire.name.clone(),
            cloud,
            region: wire.cloud_region.clone(),
            life: wire
                .life
                .as_deref()
                .map(str::parse)
                .transpose()?
                .unwrap_or(Life::Alive),
            counts: ModelCounts::default(),
            status: None,
            migration_target: None,
        };
        self.models.add(&model).await?;
        self.identities.upsert(&owner, chrono::Utc::now()).await?;
        self.authorizer
            .add_model_owner(&Tag::user(&owner), &model.uuid)
            .await?;
        Ok(ModelInfoDto::from(&model))
    }
}

pub struct MigrateModelUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    models: &'a dyn ModelRepository,
    secrets: &'a dyn SecretStore,
    pool: &'a ConnectionPool,
    authorizer: &'a Authorizer,
}

impl<'a> MigrateModelUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        models: &'a dyn ModelRepository,
        secrets: &'a dyn SecretStore,
        pool: &'a ConnectionPool,
        authorizer: &'a Authorizer,
    ) -> Self {
        MigrateModelUseCase {
            controllers,
            models,
            secrets,
            pool,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: MigrateModelRequest,
    ) -> Result<String, DomainError> {
        self.authorizer.require_admin(caller).await?;
        let model_uuid = parse_model_tag(&request.model_tag)?;
        let model = self
            .models
            .get_by_uuid(&model_uuid)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("model {}", model_uuid)))?;
        let target = self
            .controllers
            .get_by_name(&request.target_controller)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!("controller {}", request.target_controller))
            })?;
        if target.name == model.controller {
            return Err(DomainError::BadRequest(
                "model is already on the target controller".to_string(),
            ));
        }
        let source = self
            .controllers
            .get_by_name(&model.controller)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("controller {}", model.controller)))?;
        let (username, password) = self
            .secrets
            .get_controller_credentials(&target.name)
            .await?
            .ok_or_else(|| {
                DomainError::Internal(format!("no stored credentials for controller {}", target.name))
            })?;

        let target_info = json!({
            "controller-tag": format!("controller-{}", target.uuid),
            "addrs": target.dial_addresses(),
            "ca-cert": target.ca_cert,
            "auth-tag": owner_tag(&username),
            "password": password,
        });
        let conn = self.pool.open_api_from_doc(&source).await?;
        let migration_id = conn.initiate_migration(&model_uuid, target_info).await?;
        drop(conn);

        self.models.set_controller(&model_uuid, &target.name).await?;
        Ok(migration_id)
    }
}

pub struct UpdateMigratedModelUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    models: &'a dyn ModelRepository,
    authorizer: &'a Authorizer,
}

impl<'a> UpdateMigratedModelUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        models: &'a dyn ModelRepository,
        authorizer: &'a Authorizer,
    ) -> Self {
        UpdateMigratedModelUseCase {
            controllers,
            models,
            authorizer,
        }
    }

    /// Swap the controller reference after an externally-driven migration.
    /// Local state only; the migration itself is not validated.
    pub async fn execute(
        &self,
        caller: &Tag,
        request: UpdateMigratedModelRequest,
    ) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let model_uuid = parse_model_tag(&request.model_tag)?;
        self.models
            .get_by_uuid(&model_uuid)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("model {}", model_uuid)))?;
        self.controllers
            .get_by_name(&request.target_controller)
            .await?
            .ok_or_else(|| {
                DomainError::NotFound(format!("controller {}", request.target_controller))
            })?;
        self.models
            .set_controller(&model_uuid, &request.target_controller)
            .await
    }
}

pub struct ListModelsUseCase<'a> {
    models: &'a dyn ModelRepository,
    authorizer: &'a Authorizer,
}

impl<'a> ListModelsUseCase<'a> {
    pub fn new(models: &'a dyn ModelRepository, authorizer: &'a Authorizer) -> Self {
        ListModelsUseCase { models, authorizer }
    }

    /// Models visible to the caller: everything for a fleet administrator,
    /// otherwise the ACL-filtered traversal.
    pub async fn execute(&self, caller: &Tag) -> Result<Vec<ModelInfoDto>, DomainError> {
        let all = self.models.list().await?;
        let visible = if self
            .authorizer
            .is_administrator(caller, &self.authorizer.jimm_controller_tag())
            .await?
        {
            all
        } else {
            self.authorizer.filter_readable(caller, all).await?
        };
        Ok(visible.iter().map(ModelInfoDto::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_tag_format() {
        assert_eq!(
            credential_tag("aws", "bob@external.com", "default"),
            "cloudcred-aws_bob@external.com_default"
        );
    }

    #[test]
    fn test_parse_model_tag() {
        let uuid = Uuid::new_v4();
        assert_eq!(parse_model_tag(&format!("model-{}", uuid)).unwrap(), uuid);
        assert!(parse_model_tag("user-bob@x.com").is_err());
        assert!(parse_model_tag("model-notauuid").is_err());
    }
}
