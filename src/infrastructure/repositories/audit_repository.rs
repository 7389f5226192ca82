use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, QueryBuilder};

use crate::domain::entities::AuditLogEntry;
use crate::domain::errors::DomainError;
use crate::domain::repositories::{AuditLogFilter, AuditLogRepository};
use crate::infrastructure::mappers::AuditLogRow;

pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresAuditLogRepository { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn append(&self, entry: &AuditLogEntry) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO audit_log (time, user_tag, facade_method, params, model, success, error) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.time)
        .bind(&entry.user_tag)
        .bind(&entry.facade_method)
        .bind(&entry.params)
        .bind(&entry.model)
        .bind(entry.success)
        .bind(&entry.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(&self, filter: &AuditLogFilter) -> Result<Vec<AuditLogEntry>, DomainError> {
        let mut query = QueryBuilder::new(
            "SELECT time, user_tag, facade_method, params, model, success, error \
             FROM audit_log WHERE true",
        );
        if let Some(start) = filter.start {
            query.push(" AND time >= ").push_bind(start);
        }
        if let Some(end) = filter.end {
            query.push(" AND time <= ").push_bind(end);
        }
        if let Some(user_tag) = &filter.user_tag {
            query.push(" AND user_tag = ").push_bind(user_tag.clone());
        }
        if let Some(method) = &filter.method {
            query.push(" AND facade_method = ").push_bind(method.clone());
        }
        if let Some(model) = &filter.model {
            query.push(" AND model = ").push_bind(model.clone());
        }
        query.push(" ORDER BY time");
        query.push(" LIMIT ").push_bind(filter.effective_limit());
        if let Some(offset) = filter.offset {
            query.push(" OFFSET ").push_bind(offset.max(0));
        }
        let rows: Vec<AuditLogRow> = query.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(AuditLogEntry::from).collect())
    }

    async fn purge(&self, before: DateTime<Utc>) -> Result<u64, DomainError> {
        let result = sqlx::query("DELETE FROM audit_log WHERE time < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
