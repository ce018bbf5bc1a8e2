// handler/escrow.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::escrowdb::EscrowExt,
    dtos::{escrowdtos::*, walletdtos::ApiResponse},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    service::idempotency::{extract_key, with_idempotency},
    AppState,
};

fn client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
}

pub async fn create_escrow(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
    Json(body): Json<CreateEscrowDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let ip = client_ip(&headers);
    let key = extract_key(&headers);
    let user = auth.user.clone();

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user.id,
        || async move {
            let creation = state
                .escrow_service
                .create_escrow(&user, body.proposal_id, body.funding, body.phone, ip)
                .await
                .map_err(HttpError::from)?;

            let message = if creation.awaiting_confirmation {
                "Escrow created; waiting for M-Pesa confirmation"
            } else {
                "Escrow funded successfully"
            };
            let awaiting = creation.awaiting_confirmation;
            let response: EscrowResponseDto = creation.escrow.into();

            let mut body = serde_json::to_value(ApiResponse::success(message, response))
                .map_err(|e| HttpError::server_error(e.to_string()))?;
            body["awaiting_confirmation"] = serde_json::json!(awaiting);
            Ok((StatusCode::CREATED, body))
        },
    )
    .await?;

    Ok(response)
}

pub async fn list_escrows(
    Query(params): Query<EscrowListQueryDto>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    params
        .validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let limit = params.limit.unwrap_or(20);
    let offset = params.offset.unwrap_or(0);

    let escrows = app_state
        .db_client
        .get_escrows_for_party(auth.user.id, limit, offset)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?;

    let response: Vec<EscrowResponseDto> = escrows.into_iter().map(|e| e.into()).collect();
    Ok(Json(ApiResponse::success("Escrows retrieved successfully", response)))
}

pub async fn get_escrow(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let escrow = app_state
        .db_client
        .get_escrow_by_id(escrow_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Escrow not found"))?;

    let is_party = auth.user.id == escrow.client_id || auth.user.id == escrow.freelancer_id;
    if !is_party && !auth.user.role.is_platform_admin() {
        return Err(HttpError::forbidden("You are not a party to this escrow"));
    }

    let response: EscrowResponseDto = escrow.into();
    Ok(Json(ApiResponse::success("Escrow retrieved successfully", response)))
}

pub async fn release_escrow(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    let ip = client_ip(&headers);
    let key = extract_key(&headers);
    let user = auth.user.clone();

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user.id,
        || async move {
            let released = state
                .escrow_service
                .release_escrow(&user, escrow_id, ip)
                .await
                .map_err(HttpError::from)?;

            let response: EscrowResponseDto = released.into();
            let body = serde_json::to_value(ApiResponse::success(
                "Escrow released to freelancer",
                response,
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::OK, body))
        },
    )
    .await?;

    Ok(response)
}

pub async fn refund_escrow(
    Path(escrow_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpError> {
    let ip = client_ip(&headers);
    let key = extract_key(&headers);
    let user = auth.user.clone();

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user.id,
        || async move {
            let refunded = state
                .escrow_service
                .refund_escrow(&user, escrow_id, ip)
                .await
                .map_err(HttpError::from)?;

            let response: EscrowResponseDto = refunded.into();
            let body = serde_json::to_value(ApiResponse::success(
                "Escrow refunded",
                response,
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::OK, body))
        },
    )
    .await?;

    Ok(response)
}
