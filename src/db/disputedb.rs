// db/disputedb.rs
use async_trait::async_trait;
use sqlx::Error;
use uuid::Uuid;

use super::db::DBClient;
use crate::models::escrowmodels::{Dispute, DisputeStatus, EscrowStatus};
use crate::models::jobmodel::JobStatus;
use crate::service::error::ServiceError;

const DISPUTE_COLUMNS: &str = r#"
    id,
    escrow_id,
    job_id,
    initiator_id,
    respondent_id,
    reason,
    status,
    resolution,
    release_amount,
    refund_amount,
    created_at,
    resolved_at
"#;

#[async_trait]
pub trait DisputeExt {
    async fn get_dispute_by_id(&self, dispute_id: Uuid) -> Result<Option<Dispute>, Error>;

    async fn get_open_dispute_for_escrow(
        &self,
        escrow_id: Uuid,
    ) -> Result<Option<Dispute>, Error>;

    /// Open a dispute against a Held escrow. The dispute row, the escrow
    /// freeze (Held -> Disputed) and the job flip to Disputed commit
    /// together.
    async fn create_dispute(
        &self,
        escrow_id: Uuid,
        job_id: Uuid,
        initiator_id: Uuid,
        respondent_id: Uuid,
        reason: String,
    ) -> Result<Dispute, ServiceError>;

    /// Record the outcome on the dispute row. The money movement happens in
    /// EscrowExt::settle_disputed_escrow; this is bookkeeping only.
    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        resolution: String,
        release_amount: i64,
        refund_amount: i64,
    ) -> Result<Dispute, ServiceError>;

    /// Dismiss a dispute and unfreeze its escrow back to Held.
    async fn dismiss_dispute(
        &self,
        dispute_id: Uuid,
        resolution: String,
    ) -> Result<Dispute, ServiceError>;
}

#[async_trait]
impl DisputeExt for DBClient {
    async fn get_dispute_by_id(&self, dispute_id: Uuid) -> Result<Option<Dispute>, Error> {
        sqlx::query_as::<_, Dispute>(&format!(
            "SELECT {} FROM disputes WHERE id = $1",
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_open_dispute_for_escrow(
        &self,
        escrow_id: Uuid,
    ) -> Result<Option<Dispute>, Error> {
        sqlx::query_as::<_, Dispute>(&format!(
            r#"
            SELECT {}
            FROM disputes
            WHERE escrow_id = $1
              AND status IN ('open'::dispute_status, 'under_review'::dispute_status)
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(escrow_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn create_dispute(
        &self,
        escrow_id: Uuid,
        job_id: Uuid,
        initiator_id: Uuid,
        respondent_id: Uuid,
        reason: String,
    ) -> Result<Dispute, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Freeze the escrow first; the status guard doubles as the lock that
        // serializes racing dispute attempts.
        let frozen = sqlx::query(
            r#"
            UPDATE escrow_transactions
            SET status = 'disputed'::escrow_status
            WHERE id = $1 AND status = 'held'::escrow_status
            "#,
        )
        .bind(escrow_id)
        .execute(&mut *tx)
        .await?;

        if frozen.rows_affected() == 0 {
            let current = sqlx::query_as::<_, crate::models::escrowmodels::EscrowTransaction>(
                r#"
                SELECT id, proposal_id, job_id, client_id, freelancer_id, amount, service_fee,
                       tax_amount, status, release_amount, refund_amount,
                       mpesa_checkout_request_id, mpesa_receipt_number, mpesa_result_code,
                       mpesa_result_desc, initiated_at, held_at, released_at, refunded_at
                FROM escrow_transactions WHERE id = $1
                "#,
            )
            .bind(escrow_id)
            .fetch_optional(&mut *tx)
            .await?;

            return match current {
                Some(escrow) if escrow.status == EscrowStatus::Disputed => {
                    Err(ServiceError::DuplicateOpenDispute(escrow_id))
                }
                Some(escrow) => Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status)),
                None => Err(ServiceError::EscrowNotFound(escrow_id)),
            };
        }

        let dispute = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            INSERT INTO disputes (escrow_id, job_id, initiator_id, respondent_id, reason)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(escrow_id)
        .bind(job_id)
        .bind(initiator_id)
        .bind(respondent_id)
        .bind(reason)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(JobStatus::Disputed)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(dispute)
    }

    async fn resolve_dispute(
        &self,
        dispute_id: Uuid,
        resolution: String,
        release_amount: i64,
        refund_amount: i64,
    ) -> Result<Dispute, ServiceError> {
        let resolved = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes
            SET status = 'resolved'::dispute_status,
                resolution = $2,
                release_amount = $3,
                refund_amount = $4,
                resolved_at = NOW()
            WHERE id = $1
              AND status IN ('open'::dispute_status, 'under_review'::dispute_status)
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .bind(resolution)
        .bind(release_amount)
        .bind(refund_amount)
        .fetch_optional(&self.pool)
        .await?;

        match resolved {
            Some(dispute) => Ok(dispute),
            None => match self.get_dispute_by_id(dispute_id).await? {
                Some(dispute) => Err(ServiceError::InvalidDisputeState(dispute_id, dispute.status)),
                None => Err(ServiceError::DisputeNotFound(dispute_id)),
            },
        }
    }

    async fn dismiss_dispute(
        &self,
        dispute_id: Uuid,
        resolution: String,
    ) -> Result<Dispute, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let dismissed = sqlx::query_as::<_, Dispute>(&format!(
            r#"
            UPDATE disputes
            SET status = 'dismissed'::dispute_status,
                resolution = $2,
                resolved_at = NOW()
            WHERE id = $1
              AND status IN ('open'::dispute_status, 'under_review'::dispute_status)
            RETURNING {}
            "#,
            DISPUTE_COLUMNS
        ))
        .bind(dispute_id)
        .bind(resolution)
        .fetch_optional(&mut *tx)
        .await?;

        let dispute = match dismissed {
            Some(dispute) => dispute,
            None => {
                return match self.get_dispute_by_id(dispute_id).await? {
                    Some(d) => Err(ServiceError::InvalidDisputeState(dispute_id, d.status)),
                    None => Err(ServiceError::DisputeNotFound(dispute_id)),
                }
            }
        };

        // Unfreeze the escrow and put the job back in progress.
        sqlx::query(
            r#"
            UPDATE escrow_transactions
            SET status = 'held'::escrow_status
            WHERE id = $1 AND status = 'disputed'::escrow_status
            "#,
        )
        .bind(dispute.escrow_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(dispute.job_id)
            .bind(JobStatus::InProgress)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(dispute)
    }
}
