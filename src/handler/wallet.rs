// handler/wallet.rs
use std::sync::Arc;

use axum::{
    extract::Query,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use validator::Validate;

use crate::{
    db::walletdb::WalletExt,
    dtos::walletdtos::*,
    error::HttpError,
    middleware::JWTAuthMiddeware,
    models::walletmodels::*,
    service::{
        idempotency::{extract_key, with_idempotency},
        mpesa::{callback_ack, StkCallbackEnvelope},
    },
    utils::{currency::kes_to_cents, phone::normalize_msisdn},
    AppState,
};

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
}

pub async fn get_wallet(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let wallet = app_state
        .db_client
        .get_wallet(auth.user.id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Wallet not found"))?;

    let response: WalletResponseDto = wallet.into();
    Ok(Json(ApiResponse::success("Wallet retrieved successfully", response)))
}

pub async fn get_transaction_history(
    Query(params): Query<TransactionHistoryQueryDto>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    params
        .validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let limit = params.limit.unwrap_or(20);
    let offset = params.offset.unwrap_or(0);

    let transactions = app_state
        .db_client
        .get_wallet_transactions(auth.user.id, params.transaction_type, params.status, limit, offset)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    Ok(Json(PaginatedTransactionResponse {
        status: "success".to_string(),
        data: transactions.into_iter().map(|tx| tx.into()).collect(),
        limit,
        offset,
    }))
}

/// Initiate a deposit via M-Pesa push. In mock mode the gateway confirms
/// synchronously and the wallet is credited in the same call; otherwise a
/// Pending ledger row waits for the asynchronous callback.
pub async fn initiate_deposit(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
    Json(body): Json<DepositRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let phone = normalize_msisdn(&body.phone)
        .ok_or_else(|| HttpError::bad_request("Invalid M-Pesa phone number"))?;

    let amount_cents = kes_to_cents(body.amount);
    if amount_cents < app_state.env.min_deposit_amount
        || amount_cents > app_state.env.max_deposit_amount
    {
        return Err(HttpError::bad_request("Deposit amount is out of range"));
    }

    let ip = client_ip(&headers);
    let key = extract_key(&headers);
    let user_id = auth.user.id;

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user_id,
        || async move {
            state
                .risk_service
                .check_transaction(user_id, "deposit", amount_cents)
                .await
                .map_err(HttpError::from)?;

            let reference = generate_transaction_reference();
            let encrypted_phone = state
                .pii
                .encrypt(&phone)
                .map_err(HttpError::server_error)?;

            // Make sure the wallet exists before the gateway round trip.
            state
                .db_client
                .get_or_create_wallet(user_id)
                .await
                .map_err(|e| HttpError::server_error(e.to_string()))?;

            let push = state
                .mpesa
                .initiate_push(&phone, amount_cents, &reference, "Wallet deposit")
                .await
                .map_err(HttpError::from)?;

            let metadata = serde_json::json!({
                "checkout_request_id": push.checkout_request_id,
                "merchant_request_id": push.merchant_request_id,
                "client_metadata": body.metadata,
            });

            let transaction = if push.confirmed {
                // Mock/sandbox synchronous confirmation: credit immediately,
                // leaving no Pending row behind.
                state
                    .db_client
                    .credit_wallet(
                        user_id,
                        amount_cents,
                        TransactionType::Deposit,
                        reference,
                        None,
                        None,
                        None,
                        Some(encrypted_phone),
                        Some(metadata),
                    )
                    .await
                    .map_err(HttpError::from)?
            } else {
                state
                    .db_client
                    .create_pending_deposit(
                        user_id,
                        amount_cents,
                        reference,
                        Some(encrypted_phone),
                        Some(metadata),
                    )
                    .await
                    .map_err(HttpError::from)?
            };

            state
                .audit_service
                .log_wallet_event(
                    user_id,
                    "deposit_initiate",
                    Some(transaction.id),
                    amount_cents,
                    ip,
                    true,
                    Some(serde_json::json!({
                        "reference": transaction.reference,
                        "status": transaction.status,
                    })),
                )
                .await;

            let response: TransactionResponseDto = transaction.into();
            let body = serde_json::to_value(ApiResponse::success(
                "Deposit initiated successfully",
                response,
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::OK, body))
        },
    )
    .await?;

    Ok(response)
}

/// Withdraw to M-Pesa. The balance debit and ledger row commit atomically
/// before the payout call; a rejected payout is compensated with a reversal
/// credit.
pub async fn withdraw_funds(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
    Json(body): Json<WithdrawRequestDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let phone = body
        .phone
        .as_deref()
        .or(auth.user.mpesa_number.as_deref())
        .and_then(normalize_msisdn)
        .ok_or_else(|| {
            HttpError::bad_request("A valid payout phone number is required (none on profile)")
        })?;

    let amount_cents = kes_to_cents(body.amount);
    if amount_cents < app_state.env.min_withdrawal_amount {
        return Err(HttpError::bad_request("Withdrawal amount is below the minimum"));
    }

    let ip = client_ip(&headers);
    let key = extract_key(&headers);
    let user_id = auth.user.id;

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user_id,
        || async move {
            state
                .risk_service
                .check_transaction(user_id, "withdrawal", amount_cents)
                .await
                .map_err(HttpError::from)?;

            let reference = generate_transaction_reference();
            let encrypted_phone = state
                .pii
                .encrypt(&phone)
                .map_err(HttpError::server_error)?;

            let transaction = state
                .db_client
                .debit_wallet(
                    user_id,
                    amount_cents,
                    TransactionType::Withdrawal,
                    reference.clone(),
                    None,
                    None,
                    Some(encrypted_phone),
                    Some(serde_json::json!({ "client_metadata": body.metadata })),
                )
                .await
                .map_err(HttpError::from)?;

            state
                .audit_service
                .log_wallet_event(
                    user_id,
                    "withdrawal",
                    Some(transaction.id),
                    amount_cents,
                    ip,
                    true,
                    Some(serde_json::json!({ "reference": reference })),
                )
                .await;

            // The payout itself is a follow-up step: the HTTP response
            // reflects the committed ledger state, and a gateway failure is
            // compensated with a reversal credit.
            let payout_state = state.clone();
            let payout_reference = reference.clone();
            tokio::spawn(async move {
                match payout_state
                    .mpesa
                    .initiate_payout(&phone, amount_cents, &payout_reference)
                    .await
                {
                    Ok(payout) => {
                        tracing::info!(
                            "Payout {} accepted by gateway: {}",
                            payout_reference,
                            payout.conversation_id
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            "Payout {} rejected, reversing debit: {}",
                            payout_reference,
                            e
                        );
                        let reversal = payout_state
                            .db_client
                            .credit_wallet(
                                user_id,
                                amount_cents,
                                TransactionType::Refund,
                                generate_transaction_reference(),
                                None,
                                None,
                                None,
                                None,
                                Some(serde_json::json!({ "reversal_of": payout_reference })),
                            )
                            .await;
                        if let Err(e) = reversal {
                            tracing::error!(
                                "FAILED TO REVERSE payout debit {}: {} (manual reconciliation required)",
                                payout_reference,
                                e
                            );
                        }
                    }
                }
            });

            let response: TransactionResponseDto = transaction.into();
            let body = serde_json::to_value(ApiResponse::success(
                "Withdrawal accepted",
                response,
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::OK, body))
        },
    )
    .await?;

    Ok(response)
}

/// M-Pesa callback endpoint. Unauthenticated by nature; the gateway must
/// always receive a success acknowledgment regardless of what happens
/// internally, so processing errors are logged and swallowed here. When a
/// signature secret is configured, unsigned or mis-signed callbacks are
/// acknowledged but not processed.
pub async fn deposit_callback(
    Extension(app_state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    if let Some(secret) = &app_state.env.callback_signature_secret {
        let signature = headers
            .get("x-callback-signature")
            .and_then(|h| h.to_str().ok())
            .unwrap_or_default();
        if !verify_callback_signature(&body, signature, secret) {
            tracing::warn!("Callback with missing or invalid signature dropped");
            return Json(callback_ack());
        }
    }

    if let Err(e) = process_callback(&app_state, &body).await {
        tracing::error!("Gateway callback processing failed: {} (body: {})", e, body);
    }
    Json(callback_ack())
}

fn verify_callback_signature(payload: &serde_json::Value, signature: &str, secret: &str) -> bool {
    let mut mac = Hmac::<Sha512>::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload.to_string().as_bytes());

    let expected_signature_hex = hex::encode(mac.finalize().into_bytes());

    // Constant time to prevent timing attacks
    ConstantTimeEq::ct_eq(signature.as_bytes(), expected_signature_hex.as_bytes()).into()
}

async fn process_callback(
    app_state: &Arc<AppState>,
    body: &serde_json::Value,
) -> Result<(), HttpError> {
    let envelope: StkCallbackEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| HttpError::bad_request(format!("Unrecognized callback payload: {}", e)))?;
    let callback = envelope.body.stk_callback;

    tracing::info!(
        "Gateway callback for {} (result {})",
        callback.checkout_request_id,
        callback.result_code
    );

    // Escrow-funding confirmations first; they carry their own ledger rows.
    if app_state
        .escrow_service
        .handle_funding_callback(&callback)
        .await
        .map_err(HttpError::from)?
    {
        return Ok(());
    }

    let pending = match app_state
        .db_client
        .find_pending_by_checkout_id(&callback.checkout_request_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
    {
        Some(pending) => pending,
        None => {
            // Unknown correlation id: log and acknowledge anyway.
            tracing::warn!(
                "No pending transaction for checkout id {}",
                callback.checkout_request_id
            );
            return Ok(());
        }
    };

    if callback.is_success() {
        match app_state
            .db_client
            .complete_pending_deposit(pending.id, callback.receipt_number())
            .await
            .map_err(HttpError::from)?
        {
            Some(completed) => {
                let notification_service = app_state.notification_service.clone();
                let owner_id = completed.owner_id;
                let amount = completed.amount;
                let reference = completed.reference.clone();
                tokio::spawn(async move {
                    notification_service
                        .notify_deposit_completed(owner_id, amount, &reference)
                        .await;
                });
            }
            None => {
                tracing::info!(
                    "Duplicate callback for transaction {} ignored (already terminal)",
                    pending.id
                );
            }
        }
    } else {
        match app_state
            .db_client
            .fail_pending_transaction(pending.id, &callback.result_desc)
            .await
            .map_err(HttpError::from)?
        {
            Some(_) => {
                tracing::warn!(
                    "Deposit {} failed at gateway: {} ({})",
                    pending.id,
                    callback.result_desc,
                    callback.result_code
                );
            }
            None => {
                tracing::info!(
                    "Duplicate failure callback for transaction {} ignored",
                    pending.id
                );
            }
        }
    }

    Ok(())
}
