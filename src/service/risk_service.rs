// service/risk_service.rs
use chrono::{DateTime, Timelike, Utc};
use sqlx::Row;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::db::DBClient;
use crate::service::error::ServiceError;

const LARGE_AMOUNT_CENTS: i64 = 1_000_000; // KSh 10,000
const VERY_LARGE_AMOUNT_CENTS: i64 = 5_000_000; // KSh 50,000
const VELOCITY_WINDOW_MINUTES: i64 = 60;
const VELOCITY_LIMIT: i64 = 5;

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub score: i64,
    pub flags: Vec<String>,
}

impl RiskAssessment {
    pub fn is_flagged(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Advisory risk scoring over money-moving operations. Flags are stored for
/// review and do not block the operation unless the score crosses the
/// configured critical threshold with blocking enabled.
#[derive(Debug, Clone)]
pub struct RiskService {
    db_client: Arc<DBClient>,
    critical_threshold: i64,
    blocking_enabled: bool,
}

impl RiskService {
    pub fn new(db_client: Arc<DBClient>, critical_threshold: i64, blocking_enabled: bool) -> Self {
        Self {
            db_client,
            critical_threshold,
            blocking_enabled,
        }
    }

    /// Score the operation, persist any flags, and fail only when the
    /// blocking policy says a critical score must hold the operation for
    /// review.
    pub async fn check_transaction(
        &self,
        owner_id: Uuid,
        operation: &str,
        amount: i64,
    ) -> Result<RiskAssessment, ServiceError> {
        let assessment = self.assess(owner_id, operation, amount, Utc::now()).await?;

        if assessment.is_flagged() {
            tracing::warn!(
                "Risk flags for {} {} of {} by {}: {:?} (score {})",
                operation,
                owner_id,
                amount,
                owner_id,
                assessment.flags,
                assessment.score
            );
            self.store_flags(owner_id, operation, amount, &assessment).await;
        }

        if self.blocking_enabled && assessment.score >= self.critical_threshold {
            return Err(ServiceError::RiskBlocked(format!(
                "score {} >= critical threshold {}",
                assessment.score, self.critical_threshold
            )));
        }

        Ok(assessment)
    }

    async fn assess(
        &self,
        owner_id: Uuid,
        operation: &str,
        amount: i64,
        now: DateTime<Utc>,
    ) -> Result<RiskAssessment, ServiceError> {
        let mut assessment = score_static_factors(amount, now);

        let recent: i64 = sqlx::query(
            r#"
            SELECT COUNT(*) AS count
            FROM wallet_transactions
            WHERE owner_id = $1
              AND created_at > NOW() - ($2 || ' minutes')::interval
            "#,
        )
        .bind(owner_id)
        .bind(VELOCITY_WINDOW_MINUTES.to_string())
        .fetch_one(&self.db_client.pool)
        .await?
        .get::<Option<i64>, _>("count")
        .unwrap_or(0);

        if recent >= VELOCITY_LIMIT {
            assessment.score += 25;
            assessment
                .flags
                .push(format!("velocity: {} transactions in the last hour", recent));
        }

        tracing::debug!(
            "Risk assessment for {} {}: score {}",
            operation,
            owner_id,
            assessment.score
        );
        Ok(assessment)
    }

    async fn store_flags(
        &self,
        owner_id: Uuid,
        operation: &str,
        amount: i64,
        assessment: &RiskAssessment,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO risk_flags (owner_id, operation, amount, score, flags)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(owner_id)
        .bind(operation)
        .bind(amount)
        .bind(assessment.score)
        .bind(serde_json::json!(assessment.flags))
        .execute(&self.db_client.pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to store risk flags for {}: {}", owner_id, e);
        }
    }
}

/// Amount and time-of-day factors; pure so they can be tested without a
/// database.
fn score_static_factors(amount: i64, now: DateTime<Utc>) -> RiskAssessment {
    let mut score = 0;
    let mut flags = Vec::new();

    if amount >= VERY_LARGE_AMOUNT_CENTS {
        score += 70;
        flags.push(format!("very large amount: {}", amount));
    } else if amount >= LARGE_AMOUNT_CENTS {
        score += 40;
        flags.push(format!("large amount: {}", amount));
    }

    // Nairobi is UTC+3: 21:00-02:59 UTC covers the 00:00-05:59 local window.
    let hour = now.hour();
    if hour >= 21 || hour < 3 {
        score += 15;
        flags.push("off-hours transaction".to_string());
    }

    RiskAssessment { score, flags }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_small_daytime_amount_clean() {
        let noon = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        let assessment = score_static_factors(50_000, noon);
        assert_eq!(assessment.score, 0);
        assert!(!assessment.is_flagged());
    }

    #[test]
    fn test_large_amount_flagged() {
        let noon = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();
        assert_eq!(score_static_factors(1_000_000, noon).score, 40);
        assert_eq!(score_static_factors(5_000_000, noon).score, 70);
    }

    #[test]
    fn test_off_hours_flagged() {
        let late = Utc.with_ymd_and_hms(2025, 6, 2, 22, 30, 0).unwrap();
        let assessment = score_static_factors(50_000, late);
        assert_eq!(assessment.score, 15);
        assert!(assessment.is_flagged());
    }

    #[test]
    fn test_factors_compound() {
        let late = Utc.with_ymd_and_hms(2025, 6, 2, 1, 0, 0).unwrap();
        let assessment = score_static_factors(5_000_000, late);
        assert_eq!(assessment.score, 85);
        assert_eq!(assessment.flags.len(), 2);
    }
}
