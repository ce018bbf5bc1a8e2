// service/fees.rs
//
// All fee arithmetic is integer arithmetic on cents. The platform's cut is
// expressed in basis points of the gross escrow amount and depends on the
// freelancer's subscription plan; withholding tax is basis points of the
// service fee, not of the gross.
use serde::Serialize;

use crate::models::escrowmodels::EscrowTransaction;
use crate::models::usermodel::SubscriptionPlan;
use crate::service::error::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeeBreakdown {
    pub service_fee: i64,
    pub tax_amount: i64,
}

impl FeeBreakdown {
    pub fn total(&self) -> i64 {
        self.service_fee + self.tax_amount
    }
}

/// Compute the service fee and withholding tax for a gross escrow amount.
///
/// Fails when fee + tax would reach or exceed the amount: a configuration
/// that leaves the freelancer a non-positive net payout is rejected up front
/// rather than clamped at release time.
pub fn calculate_fees(
    amount: i64,
    plan: SubscriptionPlan,
    tax_bps_of_fee: i64,
) -> Result<FeeBreakdown, ServiceError> {
    if amount <= 0 {
        return Err(ServiceError::Validation(
            "Amount must be positive".to_string(),
        ));
    }

    let service_fee = amount * plan.service_fee_bps() / 10_000;
    let tax_amount = service_fee * tax_bps_of_fee / 10_000;

    if service_fee + tax_amount >= amount {
        return Err(ServiceError::Validation(format!(
            "Fee configuration consumes the whole amount: fee {} + tax {} on {}",
            service_fee, tax_amount, amount
        )));
    }

    Ok(FeeBreakdown {
        service_fee,
        tax_amount,
    })
}

/// Divide an escrow amount between freelancer and client by percentage.
///
/// The refund side is defined as the remainder, so
/// `release + refund == amount` holds for every percentage with no
/// independent rounding of the two halves.
pub fn split_amounts(amount: i64, freelancer_percentage: u8) -> (i64, i64) {
    let pct = freelancer_percentage.min(100) as i64;
    let release = amount * pct / 100;
    let refund = amount - release;
    (release, refund)
}

/// Fee share attributable to the released portion of a settled escrow,
/// prorated from the fees fixed at creation. Defined so that
/// `(release - fee - tax) + fee + tax + refund == amount` exactly.
pub fn prorated_fees(escrow: &EscrowTransaction, release_amount: i64) -> (i64, i64) {
    if escrow.amount == 0 || release_amount == 0 {
        return (0, 0);
    }
    let fee_part = escrow.service_fee * release_amount / escrow.amount;
    let tax_part = escrow.tax_amount * release_amount / escrow.amount;
    (fee_part, tax_part)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn escrow_with(amount: i64, service_fee: i64, tax_amount: i64) -> EscrowTransaction {
        EscrowTransaction {
            id: Uuid::new_v4(),
            proposal_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            freelancer_id: Uuid::new_v4(),
            amount,
            service_fee,
            tax_amount,
            status: crate::models::escrowmodels::EscrowStatus::Disputed,
            release_amount: 0,
            refund_amount: 0,
            mpesa_checkout_request_id: None,
            mpesa_receipt_number: None,
            mpesa_result_code: None,
            mpesa_result_desc: None,
            initiated_at: None,
            held_at: None,
            released_at: None,
            refunded_at: None,
        }
    }

    #[test]
    fn test_premium_plan_scenario() {
        // 10,000 on the 6% plan with 5% withholding on the fee
        let fees = calculate_fees(10_000, SubscriptionPlan::Premium, 500).unwrap();
        assert_eq!(fees.service_fee, 600);
        assert_eq!(fees.tax_amount, 30);
        assert_eq!(10_000 - fees.total(), 9_370);
    }

    #[test]
    fn test_starter_pays_more_than_premium() {
        let starter = calculate_fees(10_000, SubscriptionPlan::Starter, 500).unwrap();
        let premium = calculate_fees(10_000, SubscriptionPlan::Premium, 500).unwrap();
        assert!(starter.service_fee > premium.service_fee);
    }

    #[test]
    fn test_rejects_non_positive_amount() {
        assert!(calculate_fees(0, SubscriptionPlan::Starter, 500).is_err());
        assert!(calculate_fees(-100, SubscriptionPlan::Starter, 500).is_err());
    }

    #[test]
    fn test_rejects_confiscatory_fee_config() {
        // A tax rate that pushes fee + tax past the gross must fail, not
        // clamp the payout to zero.
        let result = calculate_fees(100, SubscriptionPlan::Starter, 1_000_000);
        assert!(result.is_err());
    }

    #[test]
    fn test_split_scenario() {
        let (release, refund) = split_amounts(5_000, 70);
        assert_eq!(release, 3_500);
        assert_eq!(refund, 1_500);
    }

    #[test]
    fn test_split_percentage_clamped() {
        assert_eq!(split_amounts(5_000, 150), (5_000, 0));
        assert_eq!(split_amounts(5_000, 0), (0, 5_000));
        assert_eq!(split_amounts(5_000, 100), (5_000, 0));
    }

    #[test]
    fn test_prorated_fees_full_release_matches_creation_fees() {
        let escrow = escrow_with(10_000, 600, 30);
        assert_eq!(prorated_fees(&escrow, 10_000), (600, 30));
        assert_eq!(prorated_fees(&escrow, 0), (0, 0));
    }

    proptest! {
        /// Conservation: release + refund == amount for every percentage.
        #[test]
        fn split_conserves_amount(
            amount in 1i64..1_000_000_000,
            pct in 0u8..=100,
        ) {
            let (release, refund) = split_amounts(amount, pct);
            prop_assert_eq!(release + refund, amount);
            prop_assert!(release >= 0);
            prop_assert!(refund >= 0);
        }

        /// Conservation through a settled split: freelancer credit plus
        /// platform fees plus client refund recomposes the gross exactly.
        #[test]
        fn settlement_conserves_amount(
            amount in 100i64..1_000_000_000,
            pct in 0u8..=100,
        ) {
            let fees = calculate_fees(amount, SubscriptionPlan::Premium, 500).unwrap();
            let escrow = escrow_with(amount, fees.service_fee, fees.tax_amount);
            let (release, refund) = split_amounts(amount, pct);
            let (fee_part, tax_part) = prorated_fees(&escrow, release);

            let freelancer_credit = release - fee_part - tax_part;
            prop_assert!(freelancer_credit >= 0);
            prop_assert_eq!(
                freelancer_credit + fee_part + tax_part + refund,
                amount
            );
        }

        /// Fees never leave a non-positive net for any plan at sane tax
        /// rates.
        #[test]
        fn fees_leave_positive_net(
            amount in 100i64..1_000_000_000,
            plan in prop_oneof![
                Just(SubscriptionPlan::Starter),
                Just(SubscriptionPlan::Professional),
                Just(SubscriptionPlan::Premium),
            ],
        ) {
            let fees = calculate_fees(amount, plan, 500).unwrap();
            prop_assert!(amount - fees.total() > 0);
        }
    }
}
