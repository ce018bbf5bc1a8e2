// db/auditdb.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;

/// Append-only audit record for every money-moving operation.
#[derive(Debug, Serialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub actor_id: Uuid,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<Uuid>,
    pub amount: Option<i64>,
    pub ip_address: Option<String>,
    pub success: bool,
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait AuditExt {
    async fn insert_audit_log(
        &self,
        actor_id: Uuid,
        action: &str,
        resource_type: &str,
        resource_id: Option<Uuid>,
        amount: Option<i64>,
        ip_address: Option<String>,
        success: bool,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error>;

    async fn get_audit_logs_for_resource(
        &self,
        resource_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, Error>;
}

#[async_trait]
impl AuditExt for DBClient {
    async fn insert_audit_log(
        &self,
        actor_id: Uuid,
        action: &str,
        resource_type: &str,
        resource_id: Option<Uuid>,
        amount: Option<i64>,
        ip_address: Option<String>,
        success: bool,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs
            (actor_id, action, resource_type, resource_id, amount, ip_address, success, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(actor_id)
        .bind(action)
        .bind(resource_type)
        .bind(resource_id)
        .bind(amount)
        .bind(ip_address)
        .bind(success)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_audit_logs_for_resource(
        &self,
        resource_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLog>, Error> {
        sqlx::query_as::<_, AuditLog>(
            r#"
            SELECT id, actor_id, action, resource_type, resource_id, amount,
                   ip_address, success, metadata, created_at
            FROM audit_logs
            WHERE resource_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(resource_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }
}
