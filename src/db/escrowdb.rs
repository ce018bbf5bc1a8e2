// db/escrowdb.rs
//
// Escrow lifecycle writes. Each transition runs as one database transaction
// covering the escrow row, the wallet rows it moves money between, the
// ledger rows, and the job status flip, so a crash mid-sequence can never
// leave a debit without its matching escrow record or vice versa.
//
// Transitions out of Held are guarded by checking the status under FOR
// UPDATE: of two concurrent release attempts exactly one sees 'held', the
// other observes the terminal state and fails with a conflict instead of
// double-crediting.
use async_trait::async_trait;
use sqlx::{Error, Postgres, Transaction};
use uuid::Uuid;

use super::db::DBClient;
use crate::models::escrowmodels::{EscrowStatus, EscrowTransaction};
use crate::models::jobmodel::JobStatus;
use crate::models::walletmodels::{generate_transaction_reference, TransactionType, WalletTransaction};
use crate::service::error::ServiceError;
use crate::service::fees::prorated_fees;

use super::walletdb::{PLATFORM_LEDGER_OWNER, TRANSACTION_COLUMNS};

const ESCROW_COLUMNS: &str = r#"
    id,
    proposal_id,
    job_id,
    client_id,
    freelancer_id,
    amount,
    service_fee,
    tax_amount,
    status,
    release_amount,
    refund_amount,
    mpesa_checkout_request_id,
    mpesa_receipt_number,
    mpesa_result_code,
    mpesa_result_desc,
    initiated_at,
    held_at,
    released_at,
    refunded_at
"#;

pub struct NewEscrow {
    pub proposal_id: Uuid,
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub freelancer_id: Uuid,
    pub amount: i64,
    pub service_fee: i64,
    pub tax_amount: i64,
    /// Wallet that funds (and is refunded for) this escrow: the client's
    /// personal wallet, or the organization wallet for org-posted jobs.
    pub funding_owner_id: Uuid,
}

#[async_trait]
pub trait EscrowExt {
    async fn get_escrow_by_id(&self, escrow_id: Uuid) -> Result<Option<EscrowTransaction>, Error>;

    /// The at-most-one Pending/Held/Disputed escrow for a proposal.
    async fn get_active_escrow_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Option<EscrowTransaction>, Error>;

    async fn get_escrow_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<EscrowTransaction>, Error>;

    async fn get_escrows_for_party(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EscrowTransaction>, Error>;

    /// Fund an escrow from the funding wallet's available balance. The wallet
    /// debit, the Held escrow row, the ledger row and the job flip to
    /// InProgress commit together.
    async fn create_escrow_from_wallet(
        &self,
        new: NewEscrow,
    ) -> Result<(EscrowTransaction, WalletTransaction), ServiceError>;

    /// Record an escrow awaiting an M-Pesa push confirmation. Nothing is
    /// debited; the escrow sits in Pending with a Pending ledger row carrying
    /// the gateway correlation id until the callback arrives.
    async fn create_escrow_pending_push(
        &self,
        new: NewEscrow,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<(EscrowTransaction, WalletTransaction), ServiceError>;

    /// Gateway confirmed collection: Pending -> Held, ledger row completed,
    /// freelancer pending_balance earmarked, job -> InProgress. Returns None
    /// when the escrow is no longer Pending (duplicate callback).
    async fn mark_escrow_held(
        &self,
        escrow_id: Uuid,
        receipt_number: Option<String>,
        result_code: i32,
        result_desc: &str,
    ) -> Result<Option<EscrowTransaction>, ServiceError>;

    /// Gateway rejected collection: the escrow is voided (terminal Refunded
    /// with zero movement) so the proposal can be funded again. Returns None
    /// when the escrow is no longer Pending.
    async fn mark_escrow_funding_failed(
        &self,
        escrow_id: Uuid,
        result_code: i32,
        result_desc: &str,
    ) -> Result<Option<EscrowTransaction>, ServiceError>;

    /// Held -> Released: freelancer gets the net amount, the platform wallet
    /// gets fee + tax, all in one transaction.
    async fn release_escrow(&self, escrow_id: Uuid) -> Result<EscrowTransaction, ServiceError>;

    /// Held/Disputed -> Refunded: the full gross amount returns to the
    /// funding wallet.
    async fn refund_escrow(
        &self,
        escrow_id: Uuid,
        refund_owner_id: Uuid,
    ) -> Result<EscrowTransaction, ServiceError>;

    /// Disputed -> terminal settlement with `release_amount` to the
    /// freelancer (net of the prorated fee share) and `refund_amount` back to
    /// the funding wallet. `release_amount + refund_amount` must equal the
    /// escrow amount.
    async fn settle_disputed_escrow(
        &self,
        escrow_id: Uuid,
        release_amount: i64,
        refund_amount: i64,
        refund_owner_id: Uuid,
    ) -> Result<EscrowTransaction, ServiceError>;
}

impl DBClient {
    async fn lock_escrow_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        escrow_id: Uuid,
    ) -> Result<EscrowTransaction, ServiceError> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            "SELECT {} FROM escrow_transactions WHERE id = $1 FOR UPDATE",
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or(ServiceError::EscrowNotFound(escrow_id))
    }

    async fn insert_escrow_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        new: &NewEscrow,
        status: EscrowStatus,
        checkout_request_id: Option<&str>,
    ) -> Result<EscrowTransaction, Error> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            INSERT INTO escrow_transactions
            (proposal_id, job_id, client_id, freelancer_id, amount, service_fee, tax_amount,
             status, mpesa_checkout_request_id, held_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8,
                    $9, CASE WHEN $8 = 'held'::escrow_status THEN NOW() ELSE NULL END)
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(new.proposal_id)
        .bind(new.job_id)
        .bind(new.client_id)
        .bind(new.freelancer_id)
        .bind(new.amount)
        .bind(new.service_fee)
        .bind(new.tax_amount)
        .bind(status)
        .bind(checkout_request_id)
        .fetch_one(&mut **tx)
        .await
    }

    async fn update_job_status_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        job_id: Uuid,
        status: JobStatus,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE jobs SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(job_id)
            .bind(status)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl EscrowExt for DBClient {
    async fn get_escrow_by_id(&self, escrow_id: Uuid) -> Result<Option<EscrowTransaction>, Error> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            "SELECT {} FROM escrow_transactions WHERE id = $1",
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_active_escrow_by_proposal(
        &self,
        proposal_id: Uuid,
    ) -> Result<Option<EscrowTransaction>, Error> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            SELECT {}
            FROM escrow_transactions
            WHERE proposal_id = $1
              AND status IN ('pending'::escrow_status, 'held'::escrow_status, 'disputed'::escrow_status)
            "#,
            ESCROW_COLUMNS
        ))
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_escrow_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<EscrowTransaction>, Error> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            "SELECT {} FROM escrow_transactions WHERE mpesa_checkout_request_id = $1",
            ESCROW_COLUMNS
        ))
        .bind(checkout_request_id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn get_escrows_for_party(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<EscrowTransaction>, Error> {
        sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            SELECT {}
            FROM escrow_transactions
            WHERE client_id = $1 OR freelancer_id = $1
            ORDER BY initiated_at DESC
            LIMIT $2 OFFSET $3
            "#,
            ESCROW_COLUMNS
        ))
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
    }

    async fn create_escrow_from_wallet(
        &self,
        new: NewEscrow,
    ) -> Result<(EscrowTransaction, WalletTransaction), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow = Self::insert_escrow_in_tx(&mut tx, &new, EscrowStatus::Held, None).await?;

        let debit = Self::debit_in_tx(
            &mut tx,
            new.funding_owner_id,
            new.amount,
            TransactionType::Escrow,
            generate_transaction_reference(),
            Some(escrow.id),
            Some(new.job_id),
            None,
            None,
        )
        .await?;

        Self::adjust_pending_in_tx(&mut tx, new.freelancer_id, new.amount).await?;
        Self::update_job_status_in_tx(&mut tx, new.job_id, JobStatus::InProgress).await?;

        tx.commit().await?;
        Ok((escrow, debit))
    }

    async fn create_escrow_pending_push(
        &self,
        new: NewEscrow,
        checkout_request_id: &str,
        merchant_request_id: &str,
    ) -> Result<(EscrowTransaction, WalletTransaction), ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow =
            Self::insert_escrow_in_tx(&mut tx, &new, EscrowStatus::Pending, Some(checkout_request_id))
                .await?;

        let wallet = Self::lock_wallet_in_tx(&mut tx, new.funding_owner_id).await?;
        let pending = sqlx::query_as::<_, WalletTransaction>(&format!(
            r#"
            INSERT INTO wallet_transactions
            (wallet_id, owner_id, transaction_type, amount, balance_before, balance_after,
             status, reference, escrow_id, job_id, metadata)
            VALUES ($1, $2, 'escrow'::transaction_type, $3, $4, $4, 'pending'::transaction_status,
                    $5, $6, $7, jsonb_build_object(
                        'checkout_request_id', $8::text,
                        'merchant_request_id', $9::text))
            RETURNING {}
            "#,
            TRANSACTION_COLUMNS
        ))
        .bind(wallet.id)
        .bind(new.funding_owner_id)
        .bind(new.amount)
        .bind(wallet.balance)
        .bind(generate_transaction_reference())
        .bind(escrow.id)
        .bind(new.job_id)
        .bind(checkout_request_id)
        .bind(merchant_request_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((escrow, pending))
    }

    async fn mark_escrow_held(
        &self,
        escrow_id: Uuid,
        receipt_number: Option<String>,
        result_code: i32,
        result_desc: &str,
    ) -> Result<Option<EscrowTransaction>, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow = Self::lock_escrow_in_tx(&mut tx, escrow_id).await?;
        if escrow.status != EscrowStatus::Pending {
            tx.commit().await?;
            return Ok(None);
        }

        let held = sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            UPDATE escrow_transactions
            SET status = 'held'::escrow_status,
                held_at = NOW(),
                mpesa_receipt_number = $2,
                mpesa_result_code = $3,
                mpesa_result_desc = $4
            WHERE id = $1
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .bind(&receipt_number)
        .bind(result_code)
        .bind(result_desc)
        .fetch_one(&mut *tx)
        .await?;

        // The funds were collected externally: complete the ledger row
        // without touching the funding wallet balance.
        sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = 'completed'::transaction_status,
                mpesa_receipt_number = COALESCE($2, mpesa_receipt_number),
                completed_at = NOW()
            WHERE escrow_id = $1 AND status = 'pending'::transaction_status
            "#,
        )
        .bind(escrow_id)
        .bind(&receipt_number)
        .execute(&mut *tx)
        .await?;

        Self::adjust_pending_in_tx(&mut tx, held.freelancer_id, held.amount).await?;
        Self::update_job_status_in_tx(&mut tx, held.job_id, JobStatus::InProgress).await?;

        tx.commit().await?;
        Ok(Some(held))
    }

    async fn mark_escrow_funding_failed(
        &self,
        escrow_id: Uuid,
        result_code: i32,
        result_desc: &str,
    ) -> Result<Option<EscrowTransaction>, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow = Self::lock_escrow_in_tx(&mut tx, escrow_id).await?;
        if escrow.status != EscrowStatus::Pending {
            tx.commit().await?;
            return Ok(None);
        }

        // Nothing was collected, so the escrow voids with zero movement and
        // the proposal becomes fundable again.
        let voided = sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            UPDATE escrow_transactions
            SET status = 'refunded'::escrow_status,
                refunded_at = NOW(),
                mpesa_result_code = $2,
                mpesa_result_desc = $3
            WHERE id = $1
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .bind(result_code)
        .bind(result_desc)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE wallet_transactions
            SET status = 'failed'::transaction_status,
                metadata = COALESCE(metadata, '{}'::jsonb) || jsonb_build_object('failure_reason', $2::text),
                completed_at = NOW()
            WHERE escrow_id = $1 AND status = 'pending'::transaction_status
            "#,
        )
        .bind(escrow_id)
        .bind(result_desc)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(voided))
    }

    async fn release_escrow(&self, escrow_id: Uuid) -> Result<EscrowTransaction, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow = Self::lock_escrow_in_tx(&mut tx, escrow_id).await?;
        if escrow.status != EscrowStatus::Held {
            return Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status));
        }

        let net_amount = escrow.net_amount();
        let fee_total = escrow.service_fee + escrow.tax_amount;

        let released = sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            UPDATE escrow_transactions
            SET status = 'released'::escrow_status,
                release_amount = amount,
                released_at = NOW()
            WHERE id = $1 AND status = 'held'::escrow_status
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::credit_in_tx(
            &mut tx,
            escrow.freelancer_id,
            net_amount,
            TransactionType::Release,
            generate_transaction_reference(),
            Some(escrow_id),
            Some(escrow.job_id),
            None,
            None,
            None,
        )
        .await?;

        if fee_total > 0 {
            Self::credit_in_tx(
                &mut tx,
                PLATFORM_LEDGER_OWNER,
                fee_total,
                TransactionType::Fee,
                generate_transaction_reference(),
                Some(escrow_id),
                Some(escrow.job_id),
                None,
                None,
                Some(serde_json::json!({
                    "service_fee": escrow.service_fee,
                    "tax_amount": escrow.tax_amount,
                })),
            )
            .await?;
        }

        Self::adjust_pending_in_tx(&mut tx, escrow.freelancer_id, -escrow.amount).await?;
        Self::update_job_status_in_tx(&mut tx, escrow.job_id, JobStatus::Completed).await?;

        tx.commit().await?;
        Ok(released)
    }

    async fn refund_escrow(
        &self,
        escrow_id: Uuid,
        refund_owner_id: Uuid,
    ) -> Result<EscrowTransaction, ServiceError> {
        let mut tx = self.pool.begin().await?;

        let escrow = Self::lock_escrow_in_tx(&mut tx, escrow_id).await?;
        if !matches!(escrow.status, EscrowStatus::Held | EscrowStatus::Disputed) {
            return Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status));
        }

        let refunded = sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            UPDATE escrow_transactions
            SET status = 'refunded'::escrow_status,
                refund_amount = amount,
                refunded_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .fetch_one(&mut *tx)
        .await?;

        Self::credit_in_tx(
            &mut tx,
            refund_owner_id,
            escrow.amount,
            TransactionType::Refund,
            generate_transaction_reference(),
            Some(escrow_id),
            Some(escrow.job_id),
            None,
            None,
            None,
        )
        .await?;

        Self::adjust_pending_in_tx(&mut tx, escrow.freelancer_id, -escrow.amount).await?;
        Self::update_job_status_in_tx(&mut tx, escrow.job_id, JobStatus::Cancelled).await?;

        tx.commit().await?;
        Ok(refunded)
    }

    async fn settle_disputed_escrow(
        &self,
        escrow_id: Uuid,
        release_amount: i64,
        refund_amount: i64,
        refund_owner_id: Uuid,
    ) -> Result<EscrowTransaction, ServiceError> {
        if release_amount < 0 || refund_amount < 0 {
            return Err(ServiceError::Validation(
                "Settlement amounts cannot be negative".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;

        let escrow = Self::lock_escrow_in_tx(&mut tx, escrow_id).await?;
        if escrow.status != EscrowStatus::Disputed {
            return Err(ServiceError::InvalidEscrowState(escrow_id, escrow.status));
        }
        if release_amount + refund_amount != escrow.amount {
            return Err(ServiceError::Validation(format!(
                "Settlement must conserve the escrow amount: {} + {} != {}",
                release_amount, refund_amount, escrow.amount
            )));
        }

        let status = if release_amount > 0 && refund_amount > 0 {
            EscrowStatus::PartiallyResolved
        } else if release_amount > 0 {
            EscrowStatus::Released
        } else {
            EscrowStatus::Refunded
        };

        let settled = sqlx::query_as::<_, EscrowTransaction>(&format!(
            r#"
            UPDATE escrow_transactions
            SET status = $2,
                release_amount = $3,
                refund_amount = $4,
                released_at = CASE WHEN $3 > 0 THEN NOW() ELSE released_at END,
                refunded_at = CASE WHEN $4 > 0 THEN NOW() ELSE refunded_at END
            WHERE id = $1
            RETURNING {}
            "#,
            ESCROW_COLUMNS
        ))
        .bind(escrow_id)
        .bind(status)
        .bind(release_amount)
        .bind(refund_amount)
        .fetch_one(&mut *tx)
        .await?;

        // Fees apply to the released share only, prorated so that
        // freelancer + platform + refund always adds back up to the gross.
        let (fee_part, tax_part) = prorated_fees(&escrow, release_amount);
        let freelancer_credit = release_amount - fee_part - tax_part;

        if freelancer_credit > 0 {
            Self::credit_in_tx(
                &mut tx,
                escrow.freelancer_id,
                freelancer_credit,
                TransactionType::Release,
                generate_transaction_reference(),
                Some(escrow_id),
                Some(escrow.job_id),
                None,
                None,
                None,
            )
            .await?;
        }

        if fee_part + tax_part > 0 {
            Self::credit_in_tx(
                &mut tx,
                PLATFORM_LEDGER_OWNER,
                fee_part + tax_part,
                TransactionType::Fee,
                generate_transaction_reference(),
                Some(escrow_id),
                Some(escrow.job_id),
                None,
                None,
                Some(serde_json::json!({
                    "service_fee": fee_part,
                    "tax_amount": tax_part,
                })),
            )
            .await?;
        }

        if refund_amount > 0 {
            Self::credit_in_tx(
                &mut tx,
                refund_owner_id,
                refund_amount,
                TransactionType::Refund,
                generate_transaction_reference(),
                Some(escrow_id),
                Some(escrow.job_id),
                None,
                None,
                None,
            )
            .await?;
        }

        Self::adjust_pending_in_tx(&mut tx, escrow.freelancer_id, -escrow.amount).await?;

        let job_status = if release_amount > 0 {
            JobStatus::Completed
        } else {
            JobStatus::Cancelled
        };
        Self::update_job_status_in_tx(&mut tx, escrow.job_id, job_status).await?;

        tx.commit().await?;
        Ok(settled)
    }
}
