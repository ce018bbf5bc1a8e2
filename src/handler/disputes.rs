// handler/disputes.rs
use std::sync::Arc;

use axum::{
    extract::Path,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db::disputedb::DisputeExt,
    dtos::{disputedtos::*, walletdtos::ApiResponse},
    error::HttpError,
    middleware::JWTAuthMiddeware,
    service::idempotency::{extract_key, with_idempotency},
    AppState,
};

pub async fn create_dispute(
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
    Json(body): Json<CreateDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let key = extract_key(&headers);
    let user = auth.user.clone();

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user.id,
        || async move {
            let dispute = state
                .dispute_service
                .create_dispute(&user, body.escrow_id, body.reason)
                .await
                .map_err(HttpError::from)?;

            let response: DisputeResponseDto = dispute.into();
            let body = serde_json::to_value(ApiResponse::success(
                "Dispute opened; the escrow is frozen pending review",
                response,
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::CREATED, body))
        },
    )
    .await?;

    Ok(response)
}

pub async fn get_dispute(
    Path(dispute_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
) -> Result<impl IntoResponse, HttpError> {
    let dispute = app_state
        .db_client
        .get_dispute_by_id(dispute_id)
        .await
        .map_err(|e| HttpError::server_error(e.to_string()))?
        .ok_or_else(|| HttpError::not_found("Dispute not found"))?;

    let is_party = auth.user.id == dispute.initiator_id || auth.user.id == dispute.respondent_id;
    if !is_party && !auth.user.role.is_platform_admin() {
        return Err(HttpError::forbidden("You are not a party to this dispute"));
    }

    let response: DisputeResponseDto = dispute.into();
    Ok(Json(ApiResponse::success("Dispute retrieved successfully", response)))
}

/// Admin resolution endpoint: release, refund, split, or dismiss.
pub async fn resolve_dispute(
    Path(dispute_id): Path<Uuid>,
    Extension(app_state): Extension<Arc<AppState>>,
    Extension(auth): Extension<JWTAuthMiddeware>,
    headers: HeaderMap,
    Json(body): Json<ResolveDisputeDto>,
) -> Result<impl IntoResponse, HttpError> {
    body.validate()
        .map_err(|e| HttpError::bad_request(e.to_string()))?;

    let outcome = body.outcome().map_err(HttpError::from)?;
    let key = extract_key(&headers);
    let user = auth.user.clone();
    let resolution = body.resolution.clone();

    let state = app_state.clone();
    let response = with_idempotency(
        app_state.idempotency_store.as_ref(),
        key.as_deref(),
        user.id,
        || async move {
            let result = match outcome {
                Some(outcome) => {
                    state
                        .dispute_service
                        .resolve_dispute(&user, dispute_id, resolution, outcome)
                        .await
                }
                None => {
                    state
                        .dispute_service
                        .dismiss_dispute(&user, dispute_id, resolution)
                        .await
                }
            }
            .map_err(HttpError::from)?;

            let body = serde_json::to_value(ApiResponse::success(
                "Dispute settled",
                serde_json::json!({
                    "dispute": DisputeResponseDto::from(result.dispute),
                    "escrow": crate::dtos::escrowdtos::EscrowResponseDto::from(result.escrow),
                }),
            ))
            .map_err(|e| HttpError::server_error(e.to_string()))?;
            Ok((StatusCode::OK, body))
        },
    )
    .await?;

    Ok(response)
}
