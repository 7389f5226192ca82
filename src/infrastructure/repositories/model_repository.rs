use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::{MachineInfo, Model, ModelCounts};
use crate::domain::errors::DomainError;
use crate::domain::repositories::ModelRepository;
use crate::domain::value_objects::Life;
use crate::infrastructure::mappers::{MachineRow, ModelRow};

const COLUMNS: &str = "uuid, controller, cloud_credential, owner, name, cloud, region, life, \
     machine_count, unit_count, application_count, core_count, status, migration_target";

pub struct PostgresModelRepository {
    pool: PgPool,
}

impl PostgresModelRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresModelRepository { pool }
    }
}

#[async_trait]
impl ModelRepository for PostgresModelRepository {
    async fn add(&self, model: &Model) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO models (uuid, controller, cloud_credential, owner, name, cloud, \
             region, life, status) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(model.uuid)
        .bind(&model.controller)
        .bind(&model.cloud_credential)
        .bind(&model.owner)
        .bind(&model.name)
        .bind(&model.cloud)
        .bind(&model.region)
        .bind(model.life.as_str())
        .bind(&model.status)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.constraint().is_some() => {
                DomainError::AlreadyExists(format!("model {}/{}", model.owner, model.name))
            }
            other => other.into(),
        })?;
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<Model>, DomainError> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {} FROM models WHERE uuid = $1",
            COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Model::try_from).transpose()
    }

    async fn get_by_owner_name(
        &self,
        owner: &str,
        name: &str,
    ) -> Result<Option<Model>, DomainError> {
        let row = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {} FROM models WHERE owner = $1 AND name = $2",
            COLUMNS
        ))
        .bind(owner)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Model::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<Model>, DomainError> {
        let rows = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {} FROM models ORDER BY owner, name",
            COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Model::try_from).collect()
    }

    async fn list_for_controller(&self, controller: &str) -> Result<Vec<Model>, DomainError> {
        let rows = sqlx::query_as::<_, ModelRow>(&format!(
            "SELECT {} FROM models WHERE controller = $1 ORDER BY owner, name",
            COLUMNS
        ))
        .bind(controller)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Model::try_from).collect()
    }

    async fn remove(&self, uuid: &Uuid) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM models WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_for_controller(&self, controller: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM models WHERE controller = $1")
            .bind(controller)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_life(
        &self,
        controller: &str,
        uuid: &Uuid,
        life: Life,
    ) -> Result<(), DomainError> {
        sqlx::query("UPDATE models SET life = $3 WHERE controller = $1 AND uuid = $2")
            .bind(controller)
            .bind(uuid)
            .bind(life.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_counts(
        &self,
        uuid: &Uuid,
        counts: &ModelCounts,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "UPDATE models SET machine_count = $2, unit_count = $3, application_count = $4, \
             core_count = $5, counts_updated_at = $6 WHERE uuid = $1",
        )
        .bind(uuid)
        .bind(counts.machines)
        .bind(counts.units)
        .bind(counts.applications)
        .bind(counts.cores)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, uuid: &Uuid, status: Option<&str>) -> Result<(), DomainError> {
        sqlx::query("UPDATE models SET status = $2 WHERE uuid = $1")
            .bind(uuid)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_controller(&self, uuid: &Uuid, controller: &str) -> Result<(), DomainError> {
        let result = sqlx::query(
            "UPDATE models SET controller = $2, migration_target = NULL WHERE uuid = $1",
        )
        .bind(uuid)
        .bind(controller)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("model {}", uuid)));
        }
        Ok(())
    }

    async fn set_migration_target(
        &self,
        uuid: &Uuid,
        target: Option<&str>,
    ) -> Result<(), DomainError> {
        sqlx::query("UPDATE models SET migration_target = $2 WHERE uuid = $1")
            .bind(uuid)
            .bind(target)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_machine(&self, machine: &MachineInfo) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO machines (model_uuid, machine_id, instance_id, display_name, \
             agent_status, life, cores) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (model_uuid, machine_id) DO UPDATE SET instance_id = $3, \
             display_name = $4, agent_status = $5, life = $6, cores = $7",
        )
        .bind(machine.model_uuid)
        .bind(&machine.machine_id)
        .bind(&machine.instance_id)
        .bind(&machine.display_name)
        .bind(&machine.agent_status)
        .bind(machine.life.as_str())
        .bind(machine.cores)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_machine(
        &self,
        model_uuid: &Uuid,
        machine_id: &str,
    ) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM machines WHERE model_uuid = $1 AND machine_id = $2")
            .bind(model_uuid)
            .bind(machine_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn machines_for_model(
        &self,
        model_uuid: &Uuid,
    ) -> Result<Vec<MachineInfo>, DomainError> {
        let rows = sqlx::query_as::<_, MachineRow>(
            "SELECT model_uuid, machine_id, instance_id, display_name, agent_status, life, \
             cores FROM machines WHERE model_uuid = $1 ORDER BY machine_id",
        )
        .bind(model_uuid)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MachineInfo::try_from).collect()
    }
}
