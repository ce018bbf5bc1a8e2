// models/walletmodels.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "transaction_type", rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdrawal,
    Escrow,
    Release,
    Refund,
    Fee,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, sqlx::Type, PartialEq)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

/// One wallet per owner (user or organization), created lazily on the first
/// financial action. `balance` is the only spendable figure; `pending_balance`
/// mirrors funds earmarked by open escrows and is informational.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Wallet {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub balance: i64,          // cents
    pub pending_balance: i64,  // cents
    pub total_deposited: i64,
    pub total_withdrawn: i64,
    pub total_earned: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Append-only ledger entry. Rows are never updated except the
/// Pending -> Completed/Failed status transition driven by gateway
/// reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub owner_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: i64, // cents, always positive; direction comes from the type
    pub balance_before: i64,
    pub balance_after: i64,
    pub status: TransactionStatus,
    pub reference: String,
    pub escrow_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub mpesa_receipt_number: Option<String>,
    /// AES-GCM encrypted MSISDN, see utils::pii
    pub mpesa_phone: Option<String>,
    /// Opaque bag for gateway correlation ids (CheckoutRequestID etc.)
    pub metadata: Option<serde_json::Value>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

pub fn generate_transaction_reference() -> String {
    format!(
        "KZH_{}",
        uuid::Uuid::new_v4()
            .to_string()
            .replace("-", "")
            .to_uppercase()[..16]
            .to_string()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_format() {
        let reference = generate_transaction_reference();
        assert!(reference.starts_with("KZH_"));
        assert_eq!(reference.len(), 20);
    }
}
