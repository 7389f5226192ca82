use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::Group;
use crate::domain::errors::DomainError;
use crate::domain::repositories::GroupRepository;
use crate::infrastructure::mappers::GroupRow;

pub struct PostgresGroupRepository {
    pool: PgPool,
}

impl PostgresGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresGroupRepository { pool }
    }
}

#[async_trait]
impl GroupRepository for PostgresGroupRepository {
    async fn add(&self, name: &str) -> Result<Group, DomainError> {
        let group = Group {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        };
        sqlx::query("INSERT INTO groups (uuid, name) VALUES ($1, $2)")
            .bind(group.uuid)
            .bind(&group.name)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.constraint().is_some() => {
                    DomainError::AlreadyExists(format!("group {}", name))
                }
                other => other.into(),
            })?;
        Ok(group)
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Group>, DomainError> {
        let row = sqlx::query_as::<_, GroupRow>("SELECT uuid, name FROM groups WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Group::from))
    }

    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Group>, DomainError> {
        let row = sqlx::query_as::<_, GroupRow>("SELECT uuid, name FROM groups WHERE uuid = $1")
            .bind(uuid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Group::from))
    }

    async fn rename(&self, name: &str, new_name: &str) -> Result<Group, DomainError> {
        let row = sqlx::query_as::<_, GroupRow>(
            "UPDATE groups SET name = $2 WHERE name = $1 RETURNING uuid, name",
        )
        .bind(name)
        .bind(new_name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Group::from)
            .ok_or_else(|| DomainError::NotFound(format!("group {}", name)))
    }

    async fn remove(&self, name: &str) -> Result<Group, DomainError> {
        let row = sqlx::query_as::<_, GroupRow>(
            "DELETE FROM groups WHERE name = $1 RETURNING uuid, name",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Group::from)
            .ok_or_else(|| DomainError::NotFound(format!("group {}", name)))
    }

    async fn list(&self) -> Result<Vec<Group>, DomainError> {
        let rows = sqlx::query_as::<_, GroupRow>("SELECT uuid, name FROM groups ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Group::from).collect())
    }
}
