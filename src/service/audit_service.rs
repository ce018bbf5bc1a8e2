// service/audit_service.rs
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{auditdb::AuditExt, db::DBClient};

/// Immutable audit trail for every money-moving operation.
///
/// A failed audit write must never abort the underlying financial operation;
/// it is logged at error level instead, since a silent gap here is a
/// compliance problem that has to be reconciled by hand.
#[derive(Debug, Clone)]
pub struct AuditService {
    db_client: Arc<DBClient>,
}

impl AuditService {
    pub fn new(db_client: Arc<DBClient>) -> Self {
        Self { db_client }
    }

    pub async fn log_escrow_event(
        &self,
        actor_id: Uuid,
        action: &str,
        escrow_id: Uuid,
        amount: i64,
        ip_address: Option<String>,
        success: bool,
        metadata: Option<serde_json::Value>,
    ) {
        self.record(
            actor_id,
            action,
            "escrow",
            Some(escrow_id),
            Some(amount),
            ip_address,
            success,
            metadata,
        )
        .await;
    }

    pub async fn log_wallet_event(
        &self,
        actor_id: Uuid,
        action: &str,
        resource_id: Option<Uuid>,
        amount: i64,
        ip_address: Option<String>,
        success: bool,
        metadata: Option<serde_json::Value>,
    ) {
        self.record(
            actor_id,
            action,
            "wallet",
            resource_id,
            Some(amount),
            ip_address,
            success,
            metadata,
        )
        .await;
    }

    pub async fn log_dispute_event(
        &self,
        actor_id: Uuid,
        action: &str,
        dispute_id: Uuid,
        metadata: Option<serde_json::Value>,
    ) {
        self.record(actor_id, action, "dispute", Some(dispute_id), None, None, true, metadata)
            .await;
    }

    async fn record(
        &self,
        actor_id: Uuid,
        action: &str,
        resource_type: &str,
        resource_id: Option<Uuid>,
        amount: Option<i64>,
        ip_address: Option<String>,
        success: bool,
        metadata: Option<serde_json::Value>,
    ) {
        if let Err(e) = self
            .db_client
            .insert_audit_log(
                actor_id,
                action,
                resource_type,
                resource_id,
                amount,
                ip_address,
                success,
                metadata,
            )
            .await
        {
            tracing::error!(
                "AUDIT WRITE FAILED (compliance gap): actor={} action={} resource={:?}: {}",
                actor_id,
                action,
                resource_id,
                e
            );
        }
    }
}
