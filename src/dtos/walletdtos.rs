// dtos/walletdtos.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::walletmodels::*;
use crate::utils::currency::cents_to_kes;

// Amounts cross the API in shillings; the ledger stores cents.

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct DepositRequestDto {
    #[validate(range(min = 10.0, max = 150000.0, message = "Amount must be between KSh 10 and KSh 150,000"))]
    pub amount: f64,

    #[validate(length(min = 9, message = "Phone number is required"))]
    pub phone: String,

    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct WithdrawRequestDto {
    #[validate(range(min = 50.0, max = 150000.0, message = "Amount must be between KSh 50 and KSh 150,000"))]
    pub amount: f64,

    /// Falls back to the profile's stored M-Pesa number when omitted.
    pub phone: Option<String>,

    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, Validate)]
pub struct TransactionHistoryQueryDto {
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,

    #[validate(range(min = 1, max = 100, message = "Limit must be between 1 and 100"))]
    pub limit: Option<i64>,

    #[validate(range(min = 0, message = "Offset must be non-negative"))]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponseDto {
    pub id: Uuid,
    pub balance: f64,
    pub pending_balance: f64,
    pub total_deposited: f64,
    pub total_withdrawn: f64,
    pub total_earned: f64,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TransactionResponseDto {
    pub id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: f64,
    pub balance_before: f64,
    pub balance_after: f64,
    pub status: TransactionStatus,
    pub reference: String,
    pub escrow_id: Option<Uuid>,
    pub job_id: Option<Uuid>,
    pub mpesa_receipt_number: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PaginatedTransactionResponse {
    pub status: String,
    pub data: Vec<TransactionResponseDto>,
    pub limit: i64,
    pub offset: i64,
}

// Response wrapper shared by all wallet/escrow endpoints
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub status: String,
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(message: &str, data: T) -> Self {
        Self {
            status: "success".to_string(),
            message: message.to_string(),
            data: Some(data),
        }
    }
}

impl From<Wallet> for WalletResponseDto {
    fn from(wallet: Wallet) -> Self {
        Self {
            id: wallet.id,
            balance: cents_to_kes(wallet.balance),
            pending_balance: cents_to_kes(wallet.pending_balance),
            total_deposited: cents_to_kes(wallet.total_deposited),
            total_withdrawn: cents_to_kes(wallet.total_withdrawn),
            total_earned: cents_to_kes(wallet.total_earned),
            created_at: wallet.created_at,
        }
    }
}

impl From<WalletTransaction> for TransactionResponseDto {
    fn from(tx: WalletTransaction) -> Self {
        Self {
            id: tx.id,
            transaction_type: tx.transaction_type,
            amount: cents_to_kes(tx.amount),
            balance_before: cents_to_kes(tx.balance_before),
            balance_after: cents_to_kes(tx.balance_after),
            status: tx.status,
            reference: tx.reference,
            escrow_id: tx.escrow_id,
            job_id: tx.job_id,
            mpesa_receipt_number: tx.mpesa_receipt_number,
            created_at: tx.created_at,
            completed_at: tx.completed_at,
        }
    }
}
