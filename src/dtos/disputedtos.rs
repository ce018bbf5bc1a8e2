// dtos/disputedtos.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::escrowmodels::{Dispute, DisputeOutcome, DisputeStatus};
use crate::service::error::ServiceError;

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct CreateDisputeDto {
    pub escrow_id: Uuid,

    #[validate(length(min = 1, max = 2000, message = "Reason is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct ResolveDisputeDto {
    /// release_to_freelancer | refund_to_client | split | dismiss
    pub action: String,

    #[validate(length(min = 10, message = "Resolution must be at least 10 characters"))]
    pub resolution: String,

    /// Required for split
    pub freelancer_percentage: Option<u8>,
}

impl ResolveDisputeDto {
    pub fn outcome(&self) -> Result<Option<DisputeOutcome>, ServiceError> {
        match self.action.as_str() {
            "release_to_freelancer" => Ok(Some(DisputeOutcome::ReleaseToFreelancer)),
            "refund_to_client" => Ok(Some(DisputeOutcome::RefundToClient)),
            "split" => {
                let pct = self.freelancer_percentage.ok_or_else(|| {
                    ServiceError::Validation(
                        "freelancer_percentage is required for a split resolution".to_string(),
                    )
                })?;
                Ok(Some(DisputeOutcome::Split {
                    freelancer_percentage: pct,
                }))
            }
            "dismiss" => Ok(None),
            other => Err(ServiceError::Validation(format!(
                "Unknown dispute action: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisputeResponseDto {
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

impl From<Dispute> for DisputeResponseDto {
    fn from(dispute: Dispute) -> Self {
        Self {
            id: dispute.id,
            escrow_id: dispute.escrow_id,
            job_id: dispute.job_id,
            initiator_id: dispute.initiator_id,
            respondent_id: dispute.respondent_id,
            reason: dispute.reason,
            status: dispute.status,
            resolution: dispute.resolution,
            release_amount: dispute.release_amount,
            refund_amount: dispute.refund_amount,
            created_at: dispute.created_at,
            resolved_at: dispute.resolved_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(action: &str, pct: Option<u8>) -> ResolveDisputeDto {
        ResolveDisputeDto {
            action: action.to_string(),
            resolution: "Reviewed the delivered work".to_string(),
            freelancer_percentage: pct,
        }
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            dto("release_to_freelancer", None).outcome().unwrap(),
            Some(DisputeOutcome::ReleaseToFreelancer)
        );
        assert_eq!(
            dto("refund_to_client", None).outcome().unwrap(),
            Some(DisputeOutcome::RefundToClient)
        );
        assert_eq!(
            dto("split", Some(70)).outcome().unwrap(),
            Some(DisputeOutcome::Split { freelancer_percentage: 70 })
        );
        assert_eq!(dto("dismiss", None).outcome().unwrap(), None);
    }

    #[test]
    fn test_split_requires_percentage() {
        assert!(dto("split", None).outcome().is_err());
    }

    #[test]
    fn test_unknown_action_rejected() {
        assert!(dto("escalate", None).outcome().is_err());
    }
}
