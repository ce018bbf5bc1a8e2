// service/dispute_service.rs
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{
        db::DBClient,
        disputedb::DisputeExt,
        escrowdb::EscrowExt,
        jobdb::JobExt,
    },
    models::{
        escrowmodels::{Dispute, DisputeOutcome, DisputeStatus, EscrowTransaction},
        usermodel::User,
    },
    service::{
        audit_service::AuditService,
        error::ServiceError,
        fees::split_amounts,
        notification_service::NotificationService,
        reputation_service::ReputationService,
    },
};

const MIN_RESOLUTION_LENGTH: usize = 10;

#[derive(Debug, Serialize)]
pub struct DisputeResolutionResult {
    pub dispute: Dispute,
    pub escrow: EscrowTransaction,
}

#[derive(Debug, Clone)]
pub struct DisputeService {
    db_client: Arc<DBClient>,
    audit_service: Arc<AuditService>,
    notification_service: Arc<NotificationService>,
    reputation_service: Arc<ReputationService>,
}

impl DisputeService {
    pub fn new(
        db_client: Arc<DBClient>,
        audit_service: Arc<AuditService>,
        notification_service: Arc<NotificationService>,
        reputation_service: Arc<ReputationService>,
    ) -> Self {
        Self {
            db_client,
            audit_service,
            notification_service,
            reputation_service,
        }
    }

    /// Either party of a Held escrow may open a dispute; doing so freezes the
    /// escrow and the job until an admin resolves or dismisses it.
    pub async fn create_dispute(
        &self,
        actor: &User,
        escrow_id: Uuid,
        reason: String,
    ) -> Result<Dispute, ServiceError> {
        let escrow = self
            .db_client
            .get_escrow_by_id(escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))?;

        let respondent_id = if actor.id == escrow.client_id {
            escrow.freelancer_id
        } else if actor.id == escrow.freelancer_id {
            escrow.client_id
        } else {
            return Err(ServiceError::UnauthorizedEscrowAccess(actor.id, escrow_id));
        };

        if self
            .db_client
            .get_open_dispute_for_escrow(escrow_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::DuplicateOpenDispute(escrow_id));
        }

        let dispute = self
            .db_client
            .create_dispute(escrow_id, escrow.job_id, actor.id, respondent_id, reason)
            .await?;

        self.audit_service
            .log_dispute_event(
                actor.id,
                "dispute_create",
                dispute.id,
                Some(serde_json::json!({
                    "escrow_id": escrow_id,
                    "respondent_id": respondent_id,
                })),
            )
            .await;

        Ok(dispute)
    }

    /// Admin-only. Settles the frozen escrow per the outcome, then records
    /// the decision on the dispute row. Money movement commits first; a
    /// bookkeeping failure afterwards is surfaced loudly but cannot
    /// double-move funds, since the escrow is already terminal.
    pub async fn resolve_dispute(
        &self,
        actor: &User,
        dispute_id: Uuid,
        resolution: String,
        outcome: DisputeOutcome,
    ) -> Result<DisputeResolutionResult, ServiceError> {
        if !actor.role.is_platform_admin() {
            return Err(ServiceError::UnauthorizedEscrowAccess(actor.id, dispute_id));
        }

        if resolution.trim().len() < MIN_RESOLUTION_LENGTH {
            return Err(ServiceError::Validation(format!(
                "Resolution must be at least {} characters",
                MIN_RESOLUTION_LENGTH
            )));
        }

        let dispute = self
            .db_client
            .get_dispute_by_id(dispute_id)
            .await?
            .ok_or(ServiceError::DisputeNotFound(dispute_id))?;

        if !matches!(
            dispute.status,
            DisputeStatus::Open | DisputeStatus::UnderReview
        ) {
            return Err(ServiceError::InvalidDisputeState(dispute_id, dispute.status));
        }

        let escrow = self
            .db_client
            .get_escrow_by_id(dispute.escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(dispute.escrow_id))?;

        let (release_amount, refund_amount) = match outcome {
            DisputeOutcome::ReleaseToFreelancer => (escrow.amount, 0),
            DisputeOutcome::RefundToClient => (0, escrow.amount),
            DisputeOutcome::Split {
                freelancer_percentage,
            } => split_amounts(escrow.amount, freelancer_percentage),
        };

        let job = self
            .db_client
            .get_job_by_id(escrow.job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(escrow.job_id))?;
        let refund_owner_id = job.organization_id.unwrap_or(escrow.client_id);

        let settled = self
            .db_client
            .settle_disputed_escrow(dispute.escrow_id, release_amount, refund_amount, refund_owner_id)
            .await?;

        let resolved = match self
            .db_client
            .resolve_dispute(dispute_id, resolution.clone(), release_amount, refund_amount)
            .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                // The escrow already settled; leaving the dispute row open
                // needs manual reconciliation, not a retry of the money path.
                tracing::error!(
                    "Dispute {} bookkeeping failed after settlement of escrow {}: {}",
                    dispute_id,
                    dispute.escrow_id,
                    e
                );
                return Err(e);
            }
        };

        self.audit_service
            .log_dispute_event(
                actor.id,
                "dispute_resolve",
                dispute_id,
                Some(serde_json::json!({
                    "escrow_id": dispute.escrow_id,
                    "release_amount": release_amount,
                    "refund_amount": refund_amount,
                    "status": settled.status,
                })),
            )
            .await;

        let notification_service = self.notification_service.clone();
        let reputation_service = self.reputation_service.clone();
        let initiator_id = resolved.initiator_id;
        let respondent_id = resolved.respondent_id;
        let freelancer_id = settled.freelancer_id;
        let resolution_text = resolution.clone();
        tokio::spawn(async move {
            notification_service
                .notify_dispute_resolved(initiator_id, dispute_id, &resolution_text)
                .await;
            notification_service
                .notify_dispute_resolved(respondent_id, dispute_id, &resolution_text)
                .await;
            reputation_service
                .recalculate_score(freelancer_id, "dispute_resolved")
                .await;
        });

        Ok(DisputeResolutionResult {
            dispute: resolved,
            escrow: settled,
        })
    }

    /// Admin-only. Throws the dispute out and unfreezes the escrow back to
    /// Held.
    pub async fn dismiss_dispute(
        &self,
        actor: &User,
        dispute_id: Uuid,
        resolution: String,
    ) -> Result<DisputeResolutionResult, ServiceError> {
        if !actor.role.is_platform_admin() {
            return Err(ServiceError::UnauthorizedEscrowAccess(actor.id, dispute_id));
        }

        if resolution.trim().len() < MIN_RESOLUTION_LENGTH {
            return Err(ServiceError::Validation(format!(
                "Resolution must be at least {} characters",
                MIN_RESOLUTION_LENGTH
            )));
        }

        let dismissed = self
            .db_client
            .dismiss_dispute(dispute_id, resolution)
            .await?;

        let escrow = self
            .db_client
            .get_escrow_by_id(dismissed.escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(dismissed.escrow_id))?;

        self.audit_service
            .log_dispute_event(
                actor.id,
                "dispute_dismiss",
                dispute_id,
                Some(serde_json::json!({ "escrow_id": dismissed.escrow_id })),
            )
            .await;

        Ok(DisputeResolutionResult {
            dispute: dismissed,
            escrow,
        })
    }
}
