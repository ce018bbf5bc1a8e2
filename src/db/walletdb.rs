// db/walletdb.rs
//
// Every balance mutation here runs as a single database transaction: the
// wallet row is locked with FOR UPDATE, the balance is changed, and the
// matching ledger row is inserted before commit. A wallet is never touched
// without a WalletTransaction row recording the exact amount and reason.
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::walletmodels::*;
use crate::service::error::ServiceError;

/// Owner id of the platform revenue wallet. Service fees and withholding tax
/// are credited here so the ledger accounts for every cent of an escrow.
pub const PLATFORM_LEDGER_OWNER: Uuid = Uuid::nil();

pub(crate) const TRANSACTION_COLUMNS: &str = r#"
    id,
    wallet_id,
    owner_id,
    transaction_type,
    amount,
    balance_before,
    balance_after,
    status,
    reference,
    escrow_id,
    job_id,
    mpesa_receipt_number,
    mpesa_phone,
    metadata,
    created_at,
    completed_at
"#;

const WALLET_COLUMNS: &str = r#"
    id,
    owner_id,
    balance,
    pending_balance,
    total_deposited,
    total_withdrawn,
    total_earned,
    created_at,
    updated_at
"#;

#[async_trait]
pub trait WalletExt {
    async fn get_wallet(&self, owner_id: Uuid) -> Result<Option<Wallet>, Error>;
    async fn get_or_create_wallet(&self, owner_id: Uuid) -> Result<Wallet, Error>;

    /// Credit `amount` to the owner's wallet and append a Completed ledger
    /// row, atomically.
    #[allow(clippy::too_many_arguments)]
    async fn credit_wallet(
        &self,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_receipt_number: Option<String>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError>;

    /// Debit `amount` from the owner's wallet and append a Completed ledger
    /// row, atomically. Fails with InsufficientBalance before any write when
    /// the balance cannot cover the amount.
    async fn debit_wallet(
        &self,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError>;

    /// Record a Pending deposit awaiting gateway confirmation. No balance
    /// change happens until the callback arrives.
    async fn create_pending_deposit(
        &self,
        owner_id: Uuid,
        amount: i64,
        reference: String,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError>;

    /// Look up the Pending ledger row carrying the given gateway correlation
    /// id in its metadata.
    async fn find_pending_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<WalletTransaction>, Error>;

    /// Complete a Pending deposit: credit the wallet and flip the row to
    /// Completed in one transaction. Returns None when the row is already in
    /// a terminal state (duplicate callback), with no balance change.
    async fn complete_pending_deposit(
        &self,
        transaction_id: Uuid,
        mpesa_receipt_number: Option<String>,
    ) -> Result<Option<WalletTransaction>, ServiceError>;

    /// Mark a Pending ledger row Failed, recording the gateway reason.
    /// Returns None when the row is already terminal.
    async fn fail_pending_transaction(
        &self,
        transaction_id: Uuid,
        failure_reason: &str,
    ) -> Result<Option<WalletTransaction>, ServiceError>;

    async fn get_wallet_transactions(
        &self,
        owner_id: Uuid,
        transaction_type: Option<TransactionType>,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, Error>;

    async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, Error>;
}

impl DBClient {
    /// Lock the owner's wallet row inside `tx`, creating it first if this is
    /// the owner's first financial action.
    pub(crate) async fn lock_wallet_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
    ) -> Result<Wallet, Error> {
        sqlx::query("INSERT INTO wallets (owner_id) VALUES ($1) ON CONFLICT (owner_id) DO NOTHING")
            .bind(owner_id)
            .execute(&mut **tx)
            .await?;

        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE owner_id = $1 FOR UPDATE",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .fetch_one(&mut **tx)
        .await
    }

    pub(crate) async fn credit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_receipt_number: Option<String>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, Error> {
        let wallet = Self::lock_wallet_in_tx(tx, owner_id).await?;

        let balance_before = wallet.balance;
        let balance_after = balance_before + amount;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $2,
                total_deposited = CASE WHEN $3 = 'deposit'::transaction_type
                    THEN total_deposited + $4 ELSE total_deposited END,
                total_earned = CASE WHEN $3 = 'release'::transaction_type
                    THEN total_earned + $4 ELSE total_earned END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(balance_after)
        .bind(transaction_type)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions
            (wallet_id, owner_id, transaction_type, amount, balance_before, balance_after,
             status, reference, escrow_id, job_id, mpesa_receipt_number, mpesa_phone,
             metadata, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'completed'::transaction_status, $7, $8, $9, $10, $11, $12, NOW())
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(wallet.id)
        .bind(owner_id)
        .bind(transaction_type)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(reference)
        .bind(escrow_id)
        .bind(job_id)
        .bind(mpesa_receipt_number)
        .bind(mpesa_phone)
        .bind(metadata)
        .fetch_one(&mut **tx)
        .await
    }

    pub(crate) async fn debit_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError> {
        let wallet = Self::lock_wallet_in_tx(tx, owner_id).await?;

        if wallet.balance < amount {
            return Err(ServiceError::InsufficientBalance {
                required: amount,
                available: wallet.balance,
            });
        }

        let balance_before = wallet.balance;
        let balance_after = balance_before - amount;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $2,
                total_withdrawn = CASE WHEN $3 = 'withdrawal'::transaction_type
                    THEN total_withdrawn + $4 ELSE total_withdrawn END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(balance_after)
        .bind(transaction_type)
        .bind(amount)
        .execute(&mut **tx)
        .await?;

        let transaction = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions
            (wallet_id, owner_id, transaction_type, amount, balance_before, balance_after,
             status, reference, escrow_id, job_id, mpesa_phone, metadata, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'completed'::transaction_status, $7, $8, $9, $10, $11, NOW())
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(wallet.id)
        .bind(owner_id)
        .bind(transaction_type)
        .bind(amount)
        .bind(balance_before)
        .bind(balance_after)
        .bind(reference)
        .bind(escrow_id)
        .bind(job_id)
        .bind(mpesa_phone)
        .bind(metadata)
        .fetch_one(&mut **tx)
        .await?;

        Ok(transaction)
    }

    /// Move `delta` cents in or out of the owner's pending_balance mirror.
    pub(crate) async fn adjust_pending_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        delta: i64,
    ) -> Result<(), Error> {
        Self::lock_wallet_in_tx(tx, owner_id).await?;
        sqlx::query(
            r#"
            UPDATE wallets
            SET pending_balance = GREATEST(pending_balance + $2, 0), updated_at = NOW()
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .bind(delta)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl WalletExt for DBClient {
    async fn get_wallet(&self, owner_id: Uuid) -> Result<Option<Wallet>, Error> {
        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE owner_id = $1",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_or_create_wallet(&self, owner_id: Uuid) -> Result<Wallet, Error> {
        sqlx::query("INSERT INTO wallets (owner_id) VALUES ($1) ON CONFLICT (owner_id) DO NOTHING")
            .bind(owner_id)
            .execute(&self.pool)
            .await?;

        sqlx::query_as::<_, Wallet>(&format!(
            "SELECT {} FROM wallets WHERE owner_id = $1",
            WALLET_COLUMNS
        ))
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
    }

    async fn credit_wallet(
        &self,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_receipt_number: Option<String>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let transaction = Self::credit_in_tx(
            &mut tx,
            owner_id,
            amount,
            transaction_type,
            reference,
            escrow_id,
            job_id,
            mpesa_receipt_number,
            mpesa_phone,
            metadata,
        )
        .await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn debit_wallet(
        &self,
        owner_id: Uuid,
        amount: i64,
        transaction_type: TransactionType,
        reference: String,
        escrow_id: Option<Uuid>,
        job_id: Option<Uuid>,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let transaction = Self::debit_in_tx(
            &mut tx,
            owner_id,
            amount,
            transaction_type,
            reference,
            escrow_id,
            job_id,
            mpesa_phone,
            metadata,
        )
        .await?;
        tx.commit().await?;
        Ok(transaction)
    }

    async fn create_pending_deposit(
        &self,
        owner_id: Uuid,
        amount: i64,
        reference: String,
        mpesa_phone: Option<String>,
        metadata: Option<JsonValue>,
    ) -> Result<WalletTransaction, ServiceError> {
        let mut tx = self.pool.begin().await?;
        let wallet = Self::lock_wallet_in_tx(&mut tx, owner_id).await?;

        let transaction = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions
            (wallet_id, owner_id, transaction_type, amount, balance_before, balance_after,
             status, reference, mpesa_phone, metadata)
            VALUES ($1, $2, 'deposit'::transaction_type, $3, $4, $4, 'pending'::transaction_status, $5, $6, $7)
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(wallet.id)
        .bind(owner_id)
        .bind(amount)
        .bind(wallet.balance)
        .bind(reference)
        .bind(mpesa_phone)
        .bind(metadata)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(transaction)
    }

    async fn find_pending_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            SELECT {}
            FROM wallet_transactions
            WHERE metadata->>'checkout_request_id' = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn complete_pending_deposit(
        &self,
        transaction_id: Uuid,
        mpesa_receipt_number: Option<String>,
    ) -> Result<Option<WalletTransaction>, ServiceError> {
        let mut tx = self.pool.begin().await?;

        // Lock the row first; a duplicate callback sees a terminal status
        // here and must not credit twice.
        let pending = sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE id = $1 FOR UPDATE",
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .fetch_one(&mut *tx)
        .await?;

        if pending.status != TransactionStatus::Pending {
            tx.commit().await?;
            return Ok(None);
        }

        let wallet = Self::lock_wallet_in_tx(&mut tx, pending.owner_id).await?;
        let balance_before = wallet.balance;
        let balance_after = balance_before + pending.amount;

        sqlx::query(
            r#"
            UPDATE wallets
            SET balance = $2, total_deposited = total_deposited + $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(wallet.id)
        .bind(balance_after)
        .bind(pending.amount)
        .execute(&mut *tx)
        .await?;

        let completed = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            UPDATE wallet_transactions
            SET status = 'completed'::transaction_status,
                balance_before = $2,
                balance_after = $3,
                mpesa_receipt_number = COALESCE($4, mpesa_receipt_number),
                completed_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(balance_before)
        .bind(balance_after)
        .bind(mpesa_receipt_number)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(completed))
    }

    async fn fail_pending_transaction(
        &self,
        transaction_id: Uuid,
        failure_reason: &str,
    ) -> Result<Option<WalletTransaction>, ServiceError> {
        let failed = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            UPDATE wallet_transactions
            SET status = 'failed'::transaction_status,
                metadata = COALESCE(metadata, '{{}}'::jsonb) || jsonb_build_object('failure_reason', $2::text),
                completed_at = NOW()
            WHERE id = $1 AND status = 'pending'::transaction_status
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(transaction_id)
        .bind(failure_reason)
        .fetch_optional(&self.pool)
        .await?;

        Ok(failed)
    }

    async fn get_wallet_transactions(
        &self,
        owner_id: Uuid,
        transaction_type: Option<TransactionType>,
        status: Option<TransactionStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            SELECT {}
            FROM wallet_transactions
            WHERE owner_id = $1
              AND ($2::transaction_type IS NULL OR transaction_type = $2)
              AND ($3::transaction_status IS NULL OR status = $3)
            ORDER BY created_at DESC
            LIMIT $4 OFFSET $5
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(owner_id)
        .bind(transaction_type)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn get_transaction_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<WalletTransaction>, Error> {
        sqlx::query_as::<_, WalletTransaction>(&format!(
            "SELECT {} FROM wallet_transactions WHERE reference = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await
    }
}
