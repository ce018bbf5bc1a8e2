// models/escrowmodels.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "escrow_status", rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    Held,
    Released,
    Refunded,
    Disputed,
    PartiallyResolved,
}

impl EscrowStatus {
    /// An escrow is active while it still reserves funds for its proposal.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Pending | EscrowStatus::Held | EscrowStatus::Disputed
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released | EscrowStatus::Refunded | EscrowStatus::PartiallyResolved
        )
    }
}

/// Funds a client has set aside for a specific accepted proposal.
///
/// `amount` is the gross figure the client pays; `service_fee` and
/// `tax_amount` come out of the freelancer's payout at release, never out of
/// the client side. Across the full lifecycle
/// `release_amount + refund_amount == amount` holds exactly.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct EscrowTransaction {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub amount: i64,       // cents, gross
    pub service_fee: i64,  // cents, deducted from freelancer payout
    pub tax_amount: i64,   // cents, withholding tax on the service fee
    pub status: EscrowStatus,
    pub release_amount: i64,
    pub refund_amount: i64,
    pub mpesa_checkout_request_id: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub mpesa_result_code: Option<i32>,
    pub mpesa_result_desc: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl EscrowTransaction {
    /// Net payout to the freelancer on full release.
    pub fn net_amount(&self) -> i64 {
        self.amount - self.service_fee - self.tax_amount
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Dismissed,
}

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Dispute {
    pub id: Uuid,
    pub escrow_id: Uuid,
    pub job_id: Uuid,
    pub initiator_id: Uuid,
    pub respondent_id: Uuid,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution: Option<String>,
    pub release_amount: Option<i64>,
    pub refund_amount: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Admin decision applied to a disputed escrow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DisputeOutcome {
    ReleaseToFreelancer,
    RefundToClient,
    Split { freelancer_percentage: u8 },
}
