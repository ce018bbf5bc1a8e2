// dtos/escrowdtos.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::escrowmodels::{EscrowStatus, EscrowTransaction};
use crate::service::escrow_service::FundingSource;
use crate::utils::currency::cents_to_kes;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateEscrowDto {
    pub proposal_id: Uuid,

    pub funding: FundingSource,

    /// Required for M-Pesa push funding
    pub phone: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct EscrowListQueryDto {
    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,

    #[validate(range(min = 0, message = "Offset must be non-negative"))]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EscrowResponseDto {
    pub id: Uuid,
    pub proposal_id: Uuid,
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub amount: f64,
    pub service_fee: f64,
    pub tax_amount: f64,
    pub net_amount: f64,
    pub status: EscrowStatus,
    pub release_amount: f64,
    pub refund_amount: f64,
    pub mpesa_receipt_number: Option<String>,
    pub initiated_at: Option<DateTime<Utc>>,
    pub held_at: Option<DateTime<Utc>>,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl From<EscrowTransaction> for EscrowResponseDto {
    fn from(escrow: EscrowTransaction) -> Self {
        let net_amount = escrow.net_amount();
        Self {
            id: escrow.id,
            proposal_id: escrow.proposal_id,
            job_id: escrow.job_id,
            client_id: escrow.client_id,
            freelancer_id: escrow.freelancer_id,
            amount: cents_to_kes(escrow.amount),
            service_fee: cents_to_kes(escrow.service_fee),
            tax_amount: cents_to_kes(escrow.tax_amount),
            net_amount: cents_to_kes(net_amount),
            status: escrow.status,
            release_amount: cents_to_kes(escrow.release_amount),
            refund_amount: cents_to_kes(escrow.refund_amount),
            mpesa_receipt_number: escrow.mpesa_receipt_number,
            initiated_at: escrow.initiated_at,
            held_at: escrow.held_at,
            released_at: escrow.released_at,
            refunded_at: escrow.refunded_at,
        }
    }
}
