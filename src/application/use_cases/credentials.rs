use std::collections::HashMap;

use serde::Deserialize;

use crate::application::dto::*;
use crate::domain::entities::CloudCredential;
use crate::domain::errors::DomainError;
use crate::domain::repositories::CredentialRepository;
use crate::domain::value_objects::Tag;
use crate::infra::vault::SecretStore;
use crate::permissions::Authorizer;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdateCloudCredentialRequest {
    pub cloud: String,
    pub name: String,
    #[serde(default)]
    pub owner: Option<String>,
    pub auth_type: String,
    /// Attribute values are written through to the secret store; the
    /// database keeps only the metadata. An empty map deletes the secret.
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

pub struct UpdateCloudCredentialUseCase<'a> {
    credentials: &'a dyn CredentialRepository,
    secrets: &'a dyn SecretStore,
    authorizer: &'a Authorizer,
}

impl<'a> UpdateCloudCredentialUseCase<'a> {
    pub fn new(
        credentials: &'a dyn CredentialRepository,
        secrets: &'a dyn SecretStore,
        authorizer: &'a Authorizer,
    ) -> Self {
        UpdateCloudCredentialUseCase {
            credentials,
            secrets,
            authorizer,
        }
    }

    /// Write-through update. The pending flag makes the monitor push the new
    /// attributes to every controller hosting a model that uses this
    /// credential.
    pub async fn execute(
        &self,
        caller: &Tag,
        request: UpdateCloudCredentialRequest,
    ) -> Result<(), DomainError> {
        let owner = request.owner.clone().unwrap_or_else(|| caller.id.clone());
        if owner != caller.id {
            self.authorizer.require_admin(caller).await?;
        }
        self.secrets
            .put_cloud_credential(&request.cloud, &owner, &request.name, &request.attributes)
            .await?;
        self.credentials
            .upsert(&CloudCredential {
                cloud: request.cloud.clone(),
                owner: owner.clone(),
                name: request.name.clone(),
                auth_type: request.auth_type.clone(),
            })
            .await?;
        self.credentials
            .set_pending_update(&request.cloud, &owner, &request.name, true)
            .await
    }
}

pub struct ListCloudCredentialsUseCase<'a> {
    credentials: &'a dyn CredentialRepository,
    authorizer: &'a Authorizer,
}

impl<'a> ListCloudCredentialsUseCase<'a> {
    pub fn new(credentials: &'a dyn CredentialRepository, authorizer: &'a Authorizer) -> Self {
        ListCloudCredentialsUseCase {
            credentials,
            authorizer,
        }
    }

    /// A caller sees their own credentials; admins may list anyone's.
    pub async fn execute(
        &self,
        caller: &Tag,
        owner: Option<&str>,
    ) -> Result<Vec<CredentialInfo>, DomainError> {
        let owner = owner.unwrap_or(&caller.id);
        if owner != caller.id {
            self.authorizer.require_admin(caller).await?;
        }
        let credentials = self.credentials.list_for_owner(owner).await?;
        Ok(credentials.iter().map(CredentialInfo::from).collect())
    }
}
