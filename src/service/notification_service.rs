// service/notification_service.rs
use std::sync::Arc;
use uuid::Uuid;

use crate::db::db::DBClient;

/// Stores notifications for out-of-band delivery. Delivery transports
/// (site/email/SMS) live elsewhere; the ledger only queues the record and
/// never fails an operation over it.
#[derive(Debug, Clone)]
pub struct NotificationService {
    db_client: Arc<DBClient>,
}

impl NotificationService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }

    pub async fn notify_escrow_released(
        &self,
        freelancer_id: Uuid,
        escrow_id: Uuid,
        net_amount: i64,
    ) {
        self.store_notification(
            freelancer_id,
            "escrow_released",
            Some(serde_json::json!({
                "escrow_id": escrow_id,
                "net_amount": net_amount,
            })),
            format!("Payment released: {} cents", net_amount),
        )
        .await;
    }

    pub async fn notify_escrow_refunded(&self, owner_id: Uuid, escrow_id: Uuid, amount: i64) {
        self.store_notification(
            owner_id,
            "escrow_refunded",
            Some(serde_json::json!({
                "escrow_id": escrow_id,
                "amount": amount,
            })),
            format!("Escrow refunded: {} cents", amount),
        )
        .await;
    }

    pub async fn notify_deposit_completed(&self, owner_id: Uuid, amount: i64, reference: &str) {
        self.store_notification(
            owner_id,
            "deposit_completed",
            Some(serde_json::json!({
                "amount": amount,
                "reference": reference,
            })),
            format!("Deposit of {} cents confirmed", amount),
        )
        .await;
    }

    pub async fn notify_dispute_resolved(
        &self,
        user_id: Uuid,
        dispute_id: Uuid,
        resolution: &str,
    ) {
        self.store_notification(
            user_id,
            "dispute_resolved",
            Some(serde_json::json!({ "dispute_id": dispute_id })),
            format!("Dispute resolved: {}", resolution),
        )
        .await;
    }

    async fn store_notification(
        &self,
        user_id: Uuid,
        kind: &str,
        payload: Option<serde_json::Value>,
        message: String,
    ) {
        tracing::info!("Notification [{}] for {}: {}", kind, user_id, message);

        let result = sqlx::query(
            r#"
            INSERT INTO notifications (user_id, kind, payload, message)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(user_id)
        .bind(kind)
        .bind(payload)
        .bind(message)
        .execute(&self.db_client.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to store notification for {}: {}", user_id, e);
        }
    }
}
