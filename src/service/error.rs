use crate::error::HttpError;
use axum::http::StatusCode;
use thiserror::Error;
use uuid::Uuid;

use crate::models::escrowmodels::{DisputeStatus, EscrowStatus};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Escrow {0} not found")]
    EscrowNotFound(Uuid),

    #[error("Proposal {0} not found")]
    ProposalNotFound(Uuid),

    #[error("Job {0} not found")]
    JobNotFound(Uuid),

    #[error("Wallet not found for owner {0}")]
    WalletNotFound(Uuid),

    #[error("Dispute {0} not found")]
    DisputeNotFound(Uuid),

    #[error("User {0} is not authorized to perform this action on escrow {1}")]
    UnauthorizedEscrowAccess(Uuid, Uuid),

    #[error("An active escrow already exists for proposal {0}")]
    DuplicateActiveEscrow(Uuid),

    #[error("An open dispute already exists for escrow {0}")]
    DuplicateOpenDispute(Uuid),

    #[error("Escrow {0} is {1:?}, which does not allow this operation")]
    InvalidEscrowState(Uuid, EscrowStatus),

    #[error("Dispute {0} is {1:?}, which does not allow this operation")]
    InvalidDisputeState(Uuid, DisputeStatus),

    #[error("Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: i64, available: i64 },

    #[error("Transaction blocked pending risk review: {0}")]
    RiskBlocked(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::EscrowNotFound(_)
            | ServiceError::ProposalNotFound(_)
            | ServiceError::JobNotFound(_)
            | ServiceError::WalletNotFound(_)
            | ServiceError::DisputeNotFound(_) => StatusCode::NOT_FOUND,

            ServiceError::UnauthorizedEscrowAccess(_, _) => StatusCode::FORBIDDEN,

            ServiceError::DuplicateActiveEscrow(_)
            | ServiceError::DuplicateOpenDispute(_)
            | ServiceError::InvalidDisputeState(_, _) => StatusCode::CONFLICT,

            // A terminal status means another request already settled the
            // escrow: that is a conflict, not a caller mistake.
            ServiceError::InvalidEscrowState(_, status) if status.is_terminal() => {
                StatusCode::CONFLICT
            }
            ServiceError::InvalidEscrowState(_, _) => StatusCode::BAD_REQUEST,

            ServiceError::InsufficientBalance { .. }
            | ServiceError::Validation(_) => StatusCode::BAD_REQUEST,

            ServiceError::RiskBlocked(_) => StatusCode::FORBIDDEN,

            ServiceError::Gateway(_) => StatusCode::BAD_GATEWAY,

            ServiceError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<ServiceError> for HttpError {
    fn from(error: ServiceError) -> Self {
        let status = error.status_code();
        HttpError::new(error.to_string(), status)
    }
}
