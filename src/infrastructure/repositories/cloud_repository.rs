use async_trait::async_trait;
use sqlx::PgPool;

use crate::domain::entities::Cloud;
use crate::domain::errors::DomainError;
use crate::domain::repositories::CloudRepository;
use crate::infrastructure::mappers::{build_cloud, CloudRegionRow, CloudRow};

pub struct PostgresCloudRepository {
    pool: PgPool,
}

impl PostgresCloudRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresCloudRepository { pool }
    }

    async fn regions(&self, cloud: &str) -> Result<Vec<CloudRegionRow>, DomainError> {
        Ok(sqlx::query_as::<_, CloudRegionRow>(
            "SELECT cloud, name, endpoint, identity_endpoint, storage_endpoint \
             FROM cloud_regions WHERE cloud = $1 ORDER BY name",
        )
        .bind(cloud)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[async_trait]
impl CloudRepository for PostgresCloudRepository {
    async fn upsert(&self, cloud: &Cloud) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO clouds (name, type, endpoint, identity_endpoint, storage_endpoint, auth_types) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (name) DO UPDATE SET type = $2, endpoint = $3, \
             identity_endpoint = $4, storage_endpoint = $5, auth_types = $6",
        )
        .bind(&cloud.name)
        .bind(&cloud.cloud_type)
        .bind(&cloud.endpoint)
        .bind(&cloud.identity_endpoint)
        .bind(&cloud.storage_endpoint)
        .bind(serde_json::to_value(&cloud.auth_types)?)
        .execute(&self.pool)
        .await?;
        for region in &cloud.regions {
            sqlx::query(
                "INSERT INTO cloud_regions (cloud, name, endpoint, identity_endpoint, storage_endpoint) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (cloud, name) DO UPDATE SET endpoint = $3, \
                 identity_endpoint = $4, storage_endpoint = $5",
            )
            .bind(&cloud.name)
            .bind(&region.name)
            .bind(&region.endpoint)
            .bind(&region.identity_endpoint)
            .bind(&region.storage_endpoint)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cloud>, DomainError> {
        let row = sqlx::query_as::<_, CloudRow>(
            "SELECT name, type, endpoint, identity_endpoint, storage_endpoint, auth_types \
             FROM clouds WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => {
                let regions = self.regions(name).await?;
                Ok(Some(build_cloud(row, regions)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Cloud>, DomainError> {
        let rows = sqlx::query_as::<_, CloudRow>(
            "SELECT name, type, endpoint, identity_endpoint, storage_endpoint, auth_types \
             FROM clouds ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let regions = self.regions(&row.name).await?;
            out.push(build_cloud(row, regions)?);
        }
        Ok(out)
    }

    async fn set_region_controller(
        &self,
        cloud: &str,
        region: &str,
        controller: &str,
    ) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO cloud_region_controllers (cloud, region, controller) \
             VALUES ($1, $2, $3) ON CONFLICT DO NOTHING",
        )
        .bind(cloud)
        .bind(region)
        .bind(controller)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn controllers_for(
        &self,
        cloud: &str,
        region: Option<&str>,
    ) -> Result<Vec<String>, DomainError> {
        let rows: Vec<(String,)> = match region {
            Some(region) => {
                sqlx::query_as(
                    "SELECT DISTINCT controller FROM cloud_region_controllers \
                     WHERE cloud = $1 AND region = $2 ORDER BY controller",
                )
                .bind(cloud)
                .bind(region)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT DISTINCT controller FROM cloud_region_controllers \
                     WHERE cloud = $1 ORDER BY controller",
                )
                .bind(cloud)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn remove_region_controllers(&self, controller: &str) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM cloud_region_controllers WHERE controller = $1")
            .bind(controller)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
