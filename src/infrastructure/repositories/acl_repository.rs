use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::errors::DomainError;
use crate::domain::repositories::AclRepository;

pub struct PostgresAclRepository {
    pool: PgPool,
}

impl PostgresAclRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresAclRepository { pool }
    }
}

fn normalize(users: &[String]) -> Vec<String> {
    let mut out: Vec<String> = users.to_vec();
    out.sort();
    out.dedup();
    out
}

#[async_trait]
impl AclRepository for PostgresAclRepository {
    async fn get(&self, name: &str) -> Result<Option<Vec<String>>, DomainError> {
        let row: Option<(serde_json::Value,)> =
            sqlx::query_as("SELECT users FROM acls WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        match row {
            Some((value,)) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, name: &str, users: &[String]) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO acls (name, users) VALUES ($1, $2) \
             ON CONFLICT (name) DO UPDATE SET users = $2",
        )
        .bind(name)
        .bind(serde_json::to_value(normalize(users))?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add(&self, name: &str, users: &[String]) -> Result<(), DomainError> {
        let mut current = self.get(name).await?.unwrap_or_default();
        current.extend_from_slice(users);
        self.set(name, &current).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_sorts_and_dedupes() {
        let users = vec![
            "controller-admin".to_string(),
            "bob".to_string(),
            "bob".to_string(),
        ];
        assert_eq!(
            normalize(&users),
            vec!["bob".to_string(), "controller-admin".to_string()]
        );
    }
}
