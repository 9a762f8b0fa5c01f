use crate::database::error::DatabaseError;
use crate::database::models::{clamp_limit, NewWebhookRecord, WebhookFilter, WebhookRecord};
use crate::database::repository::WebhookStore;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

const WEBHOOK_COLUMNS: &str = "id, provider, event_name, raw_payload, processed, payment_id, \
     error, received_at, processed_at";

/// Repository for raw webhook deliveries
pub struct WebhookRepository {
    pool: PgPool,
}

impl WebhookRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookStore for WebhookRepository {
    async fn insert_webhook(&self, record: NewWebhookRecord) -> Result<WebhookRecord, DatabaseError> {
        sqlx::query_as::<_, WebhookRecord>(&format!(
            "INSERT INTO webhook_records (id, provider, event_name, raw_payload, processed, received_at)
             VALUES ($1, $2, $3, $4, false, NOW())
             RETURNING {}",
            WEBHOOK_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&record.provider)
        .bind(&record.event_name)
        .bind(&record.raw_payload)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn mark_processed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE webhook_records
             SET processed = true,
                 event_name = COALESCE($2, event_name),
                 payment_id = COALESCE($3, payment_id),
                 error = NULL,
                 processed_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(event_name)
        .bind(payment_id)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("WebhookRecord", id));
        }
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        event_name: Option<&str>,
        payment_id: Option<Uuid>,
        error: &str,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            "UPDATE webhook_records
             SET event_name = COALESCE($2, event_name),
                 payment_id = COALESCE($3, payment_id),
                 error = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(event_name)
        .bind(payment_id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("WebhookRecord", id));
        }
        Ok(())
    }

    async fn find_webhook(&self, id: Uuid) -> Result<Option<WebhookRecord>, DatabaseError> {
        sqlx::query_as::<_, WebhookRecord>(&format!(
            "SELECT {} FROM webhook_records WHERE id = $1",
            WEBHOOK_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    async fn list_webhooks(
        &self,
        filter: &WebhookFilter,
    ) -> Result<Vec<WebhookRecord>, DatabaseError> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {} FROM webhook_records WHERE 1 = 1",
            WEBHOOK_COLUMNS
        ));
        if let Some(processed) = filter.processed {
            builder.push(" AND processed = ").push_bind(processed);
        }
        if let Some(provider) = &filter.provider {
            builder.push(" AND provider = ").push_bind(provider.clone());
        }
        builder
            .push(" ORDER BY received_at DESC LIMIT ")
            .push_bind(clamp_limit(filter.limit));

        builder
            .build_query_as::<WebhookRecord>()
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::from_sqlx)
    }
}
