use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::entities::ApplicationOffer;
use crate::domain::errors::DomainError;
use crate::domain::repositories::OfferRepository;
use crate::infrastructure::mappers::OfferRow;

const COLUMNS: &str = "uuid, url, model_uuid, application_name";

pub struct PostgresOfferRepository {
    pool: PgPool,
}

impl PostgresOfferRepository {
    pub fn new(pool: PgPool) -> Self {
        PostgresOfferRepository { pool }
    }
}

#[async_trait]
impl OfferRepository for PostgresOfferRepository {
    async fn upsert(&self, offer: &ApplicationOffer) -> Result<(), DomainError> {
        sqlx::query(
            "INSERT INTO application_offers (uuid, url, model_uuid, application_name) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (uuid) DO UPDATE SET url = $2, application_name = $4",
        )
        .bind(offer.uuid)
        .bind(&offer.url)
        .bind(offer.model_uuid)
        .bind(&offer.application_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: &Uuid) -> Result<Option<ApplicationOffer>, DomainError> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM application_offers WHERE uuid = $1",
            COLUMNS
        ))
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ApplicationOffer::from))
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<ApplicationOffer>, DomainError> {
        let row = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM application_offers WHERE url = $1",
            COLUMNS
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ApplicationOffer::from))
    }

    async fn list_for_model(
        &self,
        model_uuid: &Uuid,
    ) -> Result<Vec<ApplicationOffer>, DomainError> {
        let rows = sqlx::query_as::<_, OfferRow>(&format!(
            "SELECT {} FROM application_offers WHERE model_uuid = $1 ORDER BY url",
            COLUMNS
        ))
        .bind(model_uuid)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ApplicationOffer::from).collect())
    }

    async fn remove(&self, uuid: &Uuid) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM application_offers WHERE uuid = $1")
            .bind(uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn remove_for_model(&self, model_uuid: &Uuid) -> Result<(), DomainError> {
        sqlx::query("DELETE FROM application_offers WHERE model_uuid = $1")
            .bind(model_uuid)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
