use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::entities::Identity;
use crate::domain::errors::DomainError;
use crate::domain::repositories::IdentityRepository;
use crate::infrastructure::mappers::IdentityRow;

pub struct PostgresIdentityRepository {
    pool: PgPool,
}

impl PostgresIdentityRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresIdentityRepository { pool }
    }
}

#[async_trait]
impl IdentityRepository for PostgresIdentityRepository {
    async fn upsert(&self, name: &str, now: DateTime<Utc>) -> Result<Identity, DomainError> {
        let fresh = Identity::new(name.to_string(), now);
        let row = sqlx::query_as::<_, IdentityRow>(
            "INSERT INTO identities (name, display_name, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (name) DO UPDATE SET name = identities.name \
             RETURNING name, display_name, created_at, last_login",
        )
        .bind(&fresh.name)
        .bind(&fresh.display_name)
        .bind(fresh.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn get(&self, name: &str) -> Result<Option<Identity>, DomainError> {
        let row = sqlx::query_as::<_, IdentityRow>(
            "SELECT name, display_name, created_at, last_login FROM identities WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    async fn set_last_login(&self, name: &str, at: DateTime<Utc>) -> Result<(), DomainError> {
        sqlx::query("UPDATE identities SET last_login = $2 WHERE name = $1")
            .bind(name)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Identity>, DomainError> {
        let rows = sqlx::query_as::<_, IdentityRow>(
            "SELECT name, display_name, created_at, last_login FROM identities ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Identity::from).collect())
    }
}
