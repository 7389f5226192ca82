use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{Controller, ControllerStats, HostPort};
use crate::domain::errors::DomainError;
use crate::domain::repositories::ControllerRepository;
use crate::infrastructure::mappers::ControllerRow;

const COLUMNS: &str = "name, uuid, public_address, ca_cert, admin_user, host_ports, cloud, \
     region, agent_version, deprecated, unavailable_since, monitor_lease_owner, \
     monitor_lease_expiry, model_count, machine_count, application_count, unit_count";

pub struct PostgresControllerRepository {
    pool: PgPool,
}

impl PostgresControllerRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresControllerRepository { pool }
    }

    async fn exists(&self, name: &str) -> Result<bool, DomainError> {
        let row: Option<(i32,)> = sqlx::query_as("SELECT 1 FROM controllers WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl ControllerRepository for PostgresControllerRepository {
    async fn add(&self, controller: &Controller) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO controllers (name, uuid, public_address, ca_cert, admin_user, \
             host_ports, cloud, region, agent_version, deprecated) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&controller.name)
        .bind(controller.uuid)
        .bind(&controller.public_address)
        .bind(&controller.ca_cert)
        .bind(&controller.admin_user)
        .bind(serde_json::to_value(&controller.host_ports)?)
        .bind(&controller.cloud)
        .bind(&controller.region)
        .bind(&controller.agent_version)
        .bind(controller.deprecated)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint().is_some() => {
                DomainError::AlreadyExists(format!("controller {}", controller.name))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Controller>, DomainError> {
        let row = sqlx::query_as::<_, ControllerRow>(&format!(
            "SELECT {} FROM controllers WHERE name = $1",
            COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Controller::try_from).transpose()
    }

    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Controller>, DomainError> {
        let row = sqlx::query_as::<_, ControllerRow>(&format!(
            "SELECT {} FROM controllers WHERE uuid = $1",
            COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Controller::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<Controller>, DomainError> {
        let rows = sqlx::query_as::<_, ControllerRow>(&format!(
            "SELECT {} FROM controllers ORDER BY name",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Controller::try_from).collect()
    }

    async fn remove(&self, name: &str) -> Result<(), DomainError> {
        let result = sqlx::query("DELETE FROM controllers WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("controller {}", name)));
        }
        Ok(())
    }

    async fn set_deprecated(&self, name: &str, deprecated: bool) -> Result<(), DomainError> {
        let result = sqlx::query("UPDATE controllers SET deprecated = $2 WHERE name = $1")
            .bind(name)
            .bind(deprecated)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("controller {}", name)));
        }
        Ok(())
    }

    async fn set_available(&self, name: &str) -> Result<(), DomainError> {
        sqlx::query("UPDATE controllers SET unavailable_since = NULL WHERE name = $1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_unavailable_at(
        &self,
        name: &str,
        since: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        // Keep the earliest outage timestamp.
        sqlx::query(
            "UPDATE controllers SET unavailable_since = $2 \
             WHERE name = $1 AND unavailable_since IS NULL",
        )
        .bind(name)
        .bind(since)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_stats(&self, name: &str, stats: &ControllerStats) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE controllers SET model_count = $2, machine_count = $3, \
             application_count = $4, unit_count = $5 WHERE name = $1",
        )
        .bind(name)
        .bind(stats.model_count)
        .bind(stats.machine_count)
        .bind(stats.application_count)
        .bind(stats.unit_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_agent_version(&self, name: &str, version: &str) -> Result<(), DomainError> {
        sqlx::query("UPDATE controllers SET agent_version = $2 WHERE name = $1")
            .bind(name)
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_host_ports(
        &self,
        name: &str,
        host_ports: &[Vec<HostPort>],
    ) -> Result<(), DomainError> {
        sqlx::query("UPDATE controllers SET host_ports = $2 WHERE name = $1")
            .bind(name)
            .bind(serde_json::to_value(host_ports)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn acquire_monitor_lease(
        &self,
        name: &str,
        old_expiry: Option<DateTime<Utc>>,
        old_owner: Option<&str>,
        new_expiry: Option<DateTime<Utc>>,
        new_owner: Option<&str>,
    ) -> Result<Option<DateTime<Utc>>, DomainError> {
        let result = sqlx::query(
            "UPDATE controllers SET monitor_lease_owner = $4, monitor_lease_expiry = $5 \
             WHERE name = $1 \
             AND monitor_lease_expiry IS NOT DISTINCT FROM $2 \
             AND monitor_lease_owner IS NOT DISTINCT FROM $3",
        )
        .bind(name)
        .bind(old_expiry)
        .bind(old_owner)
        .bind(new_owner)
        .bind(new_expiry)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            if self.exists(name).await? {
                return Err(DomainError::LeaseUnavailable(format!("controller {}", name)));
            }
            return Err(DomainError::NotFound(format!("controller {}", name)));
        }
        Ok(new_expiry)
    }
}
