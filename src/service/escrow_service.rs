// service/escrow_service.rs
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    db::{
        db::DBClient,
        escrowdb::{EscrowExt, NewEscrow},
        jobdb::JobExt,
        userdb::UserExt,
    },
    models::{
        escrowmodels::{EscrowStatus, EscrowTransaction},
        jobmodel::{Job, ProposalStatus},
        usermodel::User,
    },
    service::{
        audit_service::AuditService,
        error::ServiceError,
        fees::calculate_fees,
        mpesa::{MpesaService, StkCallback},
        notification_service::NotificationService,
        reputation_service::ReputationService,
        risk_service::RiskService,
    },
    utils::phone::normalize_msisdn,
};

/// Lifecycle of a single escrow:
/// Pending -> Held -> {Released | Refunded | Disputed};
/// Disputed -> {Released | Refunded | PartiallyResolved} via dispute
/// resolution, or back to Held when the dispute is dismissed.
pub fn valid_transition(from: EscrowStatus, to: EscrowStatus) -> bool {
    use EscrowStatus::*;
    match (from, to) {
        (Pending, Held) => true,
        (Pending, Refunded) => true, // failed funding voids the escrow
        (Held, Released) => true,
        (Held, Refunded) => true,
        (Held, Disputed) => true,
        (Disputed, Released) => true,
        (Disputed, Refunded) => true,
        (Disputed, PartiallyResolved) => true,
        (Disputed, Held) => true, // dispute dismissed
        _ => false,
    }
}

/// What a given actor may do to a given escrow. Resolved in one place so
/// every endpoint applies the same rules.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct EscrowCapabilities {
    pub can_release: bool,
    pub can_refund: bool,
}

pub fn escrow_capabilities(actor: &User, escrow: &EscrowTransaction, job: &Job) -> EscrowCapabilities {
    let is_admin = actor.role.is_platform_admin();
    let is_client = actor.id == escrow.client_id;
    let is_org_manager = actor.role.is_org_manager()
        && job.organization_id.is_some()
        && actor.organization_id == job.organization_id;

    let allowed = is_admin || is_client || is_org_manager;
    EscrowCapabilities {
        can_release: allowed,
        can_refund: allowed,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Debit the client's (or organization's) available balance.
    Wallet,
    /// Collect via an M-Pesa push to the client's phone.
    MpesaPush,
}

#[derive(Debug, Serialize)]
pub struct EscrowCreation {
    pub escrow: EscrowTransaction,
    /// Set when the client still has to approve the push on their phone.
    pub awaiting_confirmation: bool,
}

#[derive(Debug, Clone)]
pub struct EscrowService {
    db_client: Arc<DBClient>,
    audit_service: Arc<AuditService>,
    notification_service: Arc<NotificationService>,
    reputation_service: Arc<ReputationService>,
    risk_service: Arc<RiskService>,
    mpesa: Arc<MpesaService>,
    min_escrow_amount: i64,
    tax_bps_of_fee: i64,
}

impl EscrowService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_client: Arc<DBClient>,
        audit_service: Arc<AuditService>,
        notification_service: Arc<NotificationService>,
        reputation_service: Arc<ReputationService>,
        risk_service: Arc<RiskService>,
        mpesa: Arc<MpesaService>,
        min_escrow_amount: i64,
        tax_bps_of_fee: i64,
    ) -> Self {
        Self {
            db_client,
            audit_service,
            notification_service,
            reputation_service,
            risk_service,
            mpesa,
            min_escrow_amount,
            tax_bps_of_fee,
        }
    }

    fn authorize_create(actor: &User, job: &Job) -> Result<(), ServiceError> {
        let is_client = actor.id == job.client_id;
        let is_admin = actor.role.is_platform_admin();
        let is_org_manager = actor.role.is_org_manager()
            && job.organization_id.is_some()
            && actor.organization_id == job.organization_id;

        if is_client || is_admin || is_org_manager {
            Ok(())
        } else {
            Err(ServiceError::UnauthorizedEscrowAccess(actor.id, job.id))
        }
    }

    /// Fund an escrow for an accepted proposal. All validation happens
    /// before any database write; the funding itself is one atomic
    /// transaction (wallet) or a Pending record awaiting the gateway
    /// callback (push).
    pub async fn create_escrow(
        &self,
        actor: &User,
        proposal_id: Uuid,
        funding: FundingSource,
        phone: Option<String>,
        ip_address: Option<String>,
    ) -> Result<EscrowCreation, ServiceError> {
        let proposal = self
            .db_client
            .get_proposal_by_id(proposal_id)
            .await?
            .ok_or(ServiceError::ProposalNotFound(proposal_id))?;

        if proposal.status != Some(ProposalStatus::Accepted) {
            return Err(ServiceError::Validation(
                "Escrow can only be funded for an accepted proposal".to_string(),
            ));
        }

        let job = self
            .db_client
            .get_job_by_id(proposal.job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(proposal.job_id))?;

        Self::authorize_create(actor, &job)?;

        let amount = proposal.amount;
        if amount < self.min_escrow_amount {
            return Err(ServiceError::Validation(format!(
                "Escrow amount must be at least {} cents",
                self.min_escrow_amount
            )));
        }

        // Fees come from the freelancer's plan, not the client's.
        let freelancer = self
            .db_client
            .get_user(proposal.freelancer_id)
            .await?
            .ok_or(ServiceError::Validation("Freelancer not found".to_string()))?;
        let fees = calculate_fees(amount, freelancer.plan, self.tax_bps_of_fee)?;

        if let Some(existing) = self
            .db_client
            .get_active_escrow_by_proposal(proposal_id)
            .await?
        {
            tracing::info!(
                "Rejecting duplicate escrow for proposal {} (existing {})",
                proposal_id,
                existing.id
            );
            return Err(ServiceError::DuplicateActiveEscrow(proposal_id));
        }

        self.risk_service
            .check_transaction(actor.id, "escrow_create", amount)
            .await?;

        let funding_owner_id = job.organization_id.unwrap_or(job.client_id);
        let new = NewEscrow {
            proposal_id,
            job_id: job.id,
            client_id: job.client_id,
            freelancer_id: proposal.freelancer_id,
            amount,
            service_fee: fees.service_fee,
            tax_amount: fees.tax_amount,
            funding_owner_id,
        };

        let creation = match funding {
            FundingSource::Wallet => {
                let (escrow, _debit) = self.db_client.create_escrow_from_wallet(new).await?;
                EscrowCreation {
                    escrow,
                    awaiting_confirmation: false,
                }
            }
            FundingSource::MpesaPush => {
                let phone = phone
                    .as_deref()
                    .and_then(normalize_msisdn)
                    .ok_or_else(|| {
                        ServiceError::Validation(
                            "A valid M-Pesa phone number is required for push funding".to_string(),
                        )
                    })?;

                // Gateway first: if the push is rejected nothing has been
                // written and the client can simply retry.
                let push = self
                    .mpesa
                    .initiate_push(&phone, amount, &proposal_id.to_string(), "Escrow funding")
                    .await?;

                let (escrow, _pending) = self
                    .db_client
                    .create_escrow_pending_push(
                        new,
                        &push.checkout_request_id,
                        &push.merchant_request_id,
                    )
                    .await?;

                if push.confirmed {
                    // Mock gateway confirms synchronously.
                    let held = self
                        .db_client
                        .mark_escrow_held(escrow.id, None, 0, "Confirmed (mock)")
                        .await?
                        .unwrap_or(escrow);
                    EscrowCreation {
                        escrow: held,
                        awaiting_confirmation: false,
                    }
                } else {
                    EscrowCreation {
                        escrow,
                        awaiting_confirmation: true,
                    }
                }
            }
        };

        self.audit_service
            .log_escrow_event(
                actor.id,
                "escrow_create",
                creation.escrow.id,
                amount,
                ip_address,
                true,
                Some(serde_json::json!({
                    "proposal_id": proposal_id,
                    "service_fee": fees.service_fee,
                    "tax_amount": fees.tax_amount,
                    "funding": funding,
                })),
            )
            .await;

        Ok(creation)
    }

    /// Held -> Released. The ledger transaction is atomic; reputation and
    /// notification run afterwards and cannot affect it.
    pub async fn release_escrow(
        &self,
        actor: &User,
        escrow_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<EscrowTransaction, ServiceError> {
        let escrow = self
            .db_client
            .get_escrow_by_id(escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))?;

        let job = self
            .db_client
            .get_job_by_id(escrow.job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(escrow.job_id))?;

        if !escrow_capabilities(actor, &escrow, &job).can_release {
            return Err(ServiceError::UnauthorizedEscrowAccess(actor.id, escrow_id));
        }

        // Fail fast on an obviously wrong state; the db re-checks under lock.
        if !valid_transition(escrow.status, EscrowStatus::Released) {
            return Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status));
        }

        let released = self.db_client.release_escrow(escrow_id).await?;
        let net_amount = released.net_amount();

        self.audit_service
            .log_escrow_event(
                actor.id,
                "escrow_release",
                escrow_id,
                released.amount,
                ip_address,
                true,
                Some(serde_json::json!({ "net_amount": net_amount })),
            )
            .await;

        let notification_service = self.notification_service.clone();
        let reputation_service = self.reputation_service.clone();
        let freelancer_id = released.freelancer_id;
        tokio::spawn(async move {
            notification_service
                .notify_escrow_released(freelancer_id, escrow_id, net_amount)
                .await;
            reputation_service
                .recalculate_score(freelancer_id, "escrow_released")
                .await;
        });

        Ok(released)
    }

    /// Held/Disputed -> Refunded, back to whichever wallet funded the escrow.
    pub async fn refund_escrow(
        &self,
        actor: &User,
        escrow_id: Uuid,
        ip_address: Option<String>,
    ) -> Result<EscrowTransaction, ServiceError> {
        let escrow = self
            .db_client
            .get_escrow_by_id(escrow_id)
            .await?
            .ok_or(ServiceError::EscrowNotFound(escrow_id))?;

        let job = self
            .db_client
            .get_job_by_id(escrow.job_id)
            .await?
            .ok_or(ServiceError::JobNotFound(escrow.job_id))?;

        if !escrow_capabilities(actor, &escrow, &job).can_refund {
            return Err(ServiceError::UnauthorizedEscrowAccess(actor.id, escrow_id));
        }

        if !valid_transition(escrow.status, EscrowStatus::Refunded) {
            return Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status));
        }

        // The refund destination follows the job, not the caller: org-posted
        // jobs refund the organization wallet.
        let refund_owner_id = job.organization_id.unwrap_or(escrow.client_id);
        let refunded = self
            .db_client
            .refund_escrow(escrow_id, refund_owner_id)
            .await?;

        self.audit_service
            .log_escrow_event(
                actor.id,
                "escrow_refund",
                escrow_id,
                refunded.amount,
                ip_address,
                true,
                Some(serde_json::json!({ "refund_owner_id": refund_owner_id })),
            )
            .await;

        let notification_service = self.notification_service.clone();
        let amount = refunded.amount;
        tokio::spawn(async move {
            notification_service
                .notify_escrow_refunded(refund_owner_id, escrow_id, amount)
                .await;
        });

        Ok(refunded)
    }

    /// Reconcile a gateway callback against a Pending escrow. Returns true
    /// when the callback matched an escrow (handled), false when it belongs
    /// to something else.
    pub async fn handle_funding_callback(
        &self,
        callback: &StkCallback,
    ) -> Result<bool, ServiceError> {
        let escrow = match self
            .db_client
            .get_escrow_by_checkout_id(&callback.checkout_request_id)
            .await?
        {
            Some(escrow) => escrow,
            None => return Ok(false),
        };

        if callback.is_success() {
            match self
                .db_client
                .mark_escrow_held(
                    escrow.id,
                    callback.receipt_number(),
                    callback.result_code,
                    &callback.result_desc,
                )
                .await?
            {
                Some(held) => {
                    tracing::info!("Escrow {} confirmed held via gateway callback", held.id);
                }
                None => {
                    tracing::info!(
                        "Duplicate funding callback for escrow {} ignored (status {:?})",
                        escrow.id,
                        escrow.status
                    );
                }
            }
        } else {
            match self
                .db_client
                .mark_escrow_funding_failed(escrow.id, callback.result_code, &callback.result_desc)
                .await?
            {
                Some(_) => {
                    tracing::warn!(
                        "Escrow {} funding failed: {} ({})",
                        escrow.id,
                        callback.result_desc,
                        callback.result_code
                    );
                }
                None => {
                    tracing::info!(
                        "Duplicate failure callback for escrow {} ignored",
                        escrow.id
                    );
                }
            }
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: Uuid, role: crate::models::usermodel::UserRole, org: Option<Uuid>) -> User {
        User {
            id,
            name: "Test".to_string(),
            username: "test".to_string(),
            email: "test@example.com".to_string(),
            role,
            plan: crate::models::usermodel::SubscriptionPlan::Starter,
            organization_id: org,
            mpesa_number: None,
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    fn escrow(client_id: Uuid, freelancer_id: Uuid) -> EscrowTransaction {
        EscrowTransaction {
            id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            client_id,
            freelancer_id,
            amount: 10_000,
            service_fee: 600,
            tax_amount: 30,
            status: EscrowStatus::Held,
            release_amount: 0,
            refund_amount: 0,
            mpesa_checkout_request_id: None,
            mpesa_receipt_number: None,
            mpesa_result_code: None,
            mpesa_result_desc: None,
            initiated_at: Some(Utc::now()),
            held_at: Some(Utc::now()),
            released_at: None,
            refunded_at: None,
        }
    }

    fn job(client_id: Uuid, org: Option<Uuid>) -> Job {
        Job {
            id: Uuid::new_v4(),
            client_id,
            organization_id: org,
            title: "Job".to_string(),
            status: Some(crate::models::jobmodel::JobStatus::InProgress),
            created_at: Some(Utc::now()),
            updated_at: Some(Utc::now()),
        }
    }

    #[test]
    fn test_transitions_from_pending() {
        use EscrowStatus::*;
        assert!(valid_transition(Pending, Held));
        assert!(valid_transition(Pending, Refunded));
        assert!(!valid_transition(Pending, Released));
        assert!(!valid_transition(Pending, Disputed));
    }

    #[test]
    fn test_transitions_from_held() {
        use EscrowStatus::*;
        assert!(valid_transition(Held, Released));
        assert!(valid_transition(Held, Refunded));
        assert!(valid_transition(Held, Disputed));
        assert!(!valid_transition(Held, PartiallyResolved));
        assert!(!valid_transition(Held, Pending));
    }

    #[test]
    fn test_transitions_from_disputed() {
        use EscrowStatus::*;
        assert!(valid_transition(Disputed, Released));
        assert!(valid_transition(Disputed, Refunded));
        assert!(valid_transition(Disputed, PartiallyResolved));
        assert!(valid_transition(Disputed, Held));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use EscrowStatus::*;
        for terminal in [Released, Refunded, PartiallyResolved] {
            for next in [Pending, Held, Released, Refunded, Disputed, PartiallyResolved] {
                assert!(!valid_transition(terminal, next));
            }
        }
    }

    #[test]
    fn test_client_can_release_and_refund() {
        let client_id = Uuid::new_v4();
        let escrow = escrow(client_id, Uuid::new_v4());
        let job = job(client_id, None);
        let caps = escrow_capabilities(
            &user(client_id, crate::models::usermodel::UserRole::Client, None),
            &escrow,
            &job,
        );
        assert!(caps.can_release);
        assert!(caps.can_refund);
    }

    #[test]
    fn test_freelancer_cannot_release() {
        let client_id = Uuid::new_v4();
        let freelancer_id = Uuid::new_v4();
        let escrow = escrow(client_id, freelancer_id);
        let job = job(client_id, None);
        let caps = escrow_capabilities(
            &user(
                freelancer_id,
                crate::models::usermodel::UserRole::Freelancer,
                None,
            ),
            &escrow,
            &job,
        );
        assert!(!caps.can_release);
        assert!(!caps.can_refund);
    }

    #[test]
    fn test_org_admin_scoped_to_their_org() {
        let client_id = Uuid::new_v4();
        let org_id = Uuid::new_v4();
        let escrow = escrow(client_id, Uuid::new_v4());
        let job = job(client_id, Some(org_id));

        let same_org = escrow_capabilities(
            &user(
                Uuid::new_v4(),
                crate::models::usermodel::UserRole::OrgAdmin,
                Some(org_id),
            ),
            &escrow,
            &job,
        );
        assert!(same_org.can_release);

        let other_org = escrow_capabilities(
            &user(
                Uuid::new_v4(),
                crate::models::usermodel::UserRole::OrgAdmin,
                Some(Uuid::new_v4()),
            ),
            &escrow,
            &job,
        );
        assert!(!other_org.can_release);
    }

    #[test]
    fn test_platform_admin_can_always_act() {
        let escrow = escrow(Uuid::new_v4(), Uuid::new_v4());
        let job = job(escrow.client_id, None);
        let caps = escrow_capabilities(
            &user(Uuid::new_v4(), crate::models::usermodel::UserRole::Admin, None),
            &escrow,
            &job,
        );
        assert!(caps.can_release);
        assert!(caps.can_refund);
    }
}
