// db/idempotencydb.rs
//
// Postgres-backed idempotency store. Insert-first on the unique
// (idempotency_key, user_id) pair closes the concurrent-duplicate window:
// of two racing requests, only one insert wins and the loser's response is
// simply not recorded.
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::db::DBClient;
use crate::service::error::ServiceError;
use crate::service::idempotency::{IdempotencyStore, StoredResponse};

#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    db_client: std::sync::Arc<DBClient>,
}

impl PgIdempotencyStore {
    pub fn new(db_client: std::sync::Arc<DBClient>) -> Self {
        Self { db_client }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn get(
        &self,
        key: &str,
        user_id: Uuid,
    ) -> Result<Option<StoredResponse>, ServiceError> {
        let row = sqlx::query(
            r#"
            SELECT response_status, response_body
            FROM idempotency_log
            WHERE idempotency_key = $1 AND user_id = $2 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .bind(user_id)
        .fetch_optional(&self.db_client.pool)
        .await?;

        Ok(row.map(|r| StoredResponse {
            status: r.get::<i32, _>("response_status") as u16,
            body: r.get::<serde_json::Value, _>("response_body"),
        }))
    }

    async fn put(
        &self,
        key: &str,
        user_id: Uuid,
        response: &StoredResponse,
        ttl: Duration,
    ) -> Result<(), ServiceError> {
        sqlx::query(
            r#"
            INSERT INTO idempotency_log
            (idempotency_key, user_id, response_status, response_body, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key, user_id) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(user_id)
        .bind(response.status as i32)
        .bind(&response.body)
        .bind(Utc::now() + ttl)
        .execute(&self.db_client.pool)
        .await?;

        Ok(())
    }
}
