use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::domain::entities::Session;
use crate::domain::errors::DomainError;
use crate::domain::repositories::SessionRepository;
use crate::infrastructure::mappers::SessionRow;

pub struct PostgresSessionRepository {
    pool: PgPool,
}

impl PostgresSessionRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresSessionRepository { pool }
    }
}

#[async_trait]
impl SessionRepository for PostgresSessionRepository {
    async fn put(&self, session: &Session) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO sessions (id, identity, created_at, expires_at) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET identity = $2, expires_at = $4",
        )
        .bind(&session.id)
        .bind(&session.identity)
        .bind(session.created_at)
        .bind(session.expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Session>, DomainError> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, identity, created_at, expires_at FROM sessions WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Session::from))
    }

    async fn delete(&self, id: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM sessions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
