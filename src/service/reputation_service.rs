// service/reputation_service.rs
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::db::DBClient;

/// Recalculates a freelancer's reputation after release/refund events.
///
/// Strictly fire-and-forget from the ledger's point of view: callers spawn
/// this after the financial transaction commits, and failures are logged,
/// never propagated.
#[derive(Debug, Clone)]
pub struct ReputationService {
    db_client: Arc<DBClient>,
}

impl ReputationService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }

    pub async fn recalculate_score(&self, user_id: Uuid, reason: &str) {
        if let Err(e) = self.recalculate(user_id).await {
            tracing::error!(
                "Reputation recalculation failed for {} ({}): {}",
                user_id,
                reason,
                e
            );
        } else {
            tracing::info!("Reputation recalculated for {} ({})", user_id, reason);
        }
    }

    async fn recalculate(&self, user_id: Uuid) -> Result<(), sqlx::Error> {
        let stats = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'released'::escrow_status) AS released,
                COUNT(*) FILTER (WHERE status = 'refunded'::escrow_status) AS refunded,
                COUNT(*) FILTER (WHERE status = 'partially_resolved'::escrow_status) AS split
            FROM escrow_transactions
            WHERE freelancer_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.db_client.pool)
        .await?;

        let released = stats.get::<Option<i64>, _>("released").unwrap_or(0);
        let refunded = stats.get::<Option<i64>, _>("refunded").unwrap_or(0);
        let split = stats.get::<Option<i64>, _>("split").unwrap_or(0);

        // Completed work counts full, split resolutions half, refunds against.
        let score = (released * 10 + split * 5 - refunded * 5).max(0);

        sqlx::query(
            r#"
            INSERT INTO reputation_scores (user_id, score, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (user_id) DO UPDATE SET score = $2, updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(score)
        .execute(&self.db_client.pool)
        .await?;

        Ok(())
    }
}
