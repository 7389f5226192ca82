use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::CloudCredential;
use crate::domain::errors::DomainError;
use crate::domain::repositories::CredentialRepository;
use crate::infrastructure::mappers::CredentialRow;

pub struct PostgresCredentialRepository {
    pool: PgPool,
}

impl PostgresCredentialRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresCredentialRepository { pool }
    }
}

#[async_trait]
impl CredentialRepository for PostgresCredentialRepository {
    async fn upsert(&self, credential: &CloudCredential) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO cloud_credentials (cloud, owner, name, auth_type) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (cloud, owner, name) DO UPDATE SET auth_type = $4",
        )
        .bind(&credential.cloud)
        .bind(&credential.owner)
        .bind(&credential.name)
        .bind(&credential.auth_type)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
    ) -> Result<Option<CloudCredential>, DomainError> {
        let row = sqlx::query_as::<_, CredentialRow>(
            "SELECT cloud, owner, name, auth_type FROM cloud_credentials \
             WHERE cloud = $1 AND owner = $2 AND name = $3",
        )
        .bind(cloud)
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CloudCredential::from))
    }

    async fn delete(&self, cloud: &str, owner: &str, name: &str) -> Result<(), DomainError> {
        sqlx::query(
            "DELETE FROM cloud_credentials WHERE cloud = $1 AND owner = $2 AND name = $3",
        )
        .bind(cloud)
        .bind(owner)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_owner(&self, owner: &str) -> Result<Vec<CloudCredential>, DomainError> {
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT cloud, owner, name, auth_type FROM cloud_credentials \
             WHERE owner = $1 ORDER BY cloud, name",
        )
        .bind(owner)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CloudCredential::from).collect())
    }

    async fn set_pending_update(
        &self,
        cloud: &str,
        owner: &str,
        name: &str,
        pending: bool,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE cloud_credentials SET pending_update = $4 \
             WHERE cloud = $1 AND owner = $2 AND name = $3",
        )
        .bind(cloud)
        .bind(owner)
        .bind(name)
        .bind(pending)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_pending_for_controller(
        &self,
        controller: &str,
    ) -> Result<Vec<CloudCredential>, DomainError> {
        // A credential is pending for a controller when a model on that
        // controller references it (key form `cloud/owner/name`).
        let rows = sqlx::query_as::<_, CredentialRow>(
            "SELECT c.cloud, c.owner, c.name, c.auth_type FROM cloud_credentials c \
             JOIN models m ON m.cloud_credential = c.cloud || '/' || c.owner || '/' || c.name \
             WHERE c.pending_update AND m.controller = $1",
        )
        .bind(controller)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(CloudCredential::from).collect())
    }
}
