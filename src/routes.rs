// routes.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post, put},
    Extension, Json, Router,
};
use serde_json::json;
use tower_http::trace::TraceLayer;

use crate::{
    handler::{disputes, escrow, wallet},
    middleware::{auth, rate_limit_middleware, wallet_rate_limiter, webhook_rate_limiter},
    AppState,
};

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "message": "Server is running"
    }))
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let wallet_limiter = Arc::new(wallet_rate_limiter());
    let webhook_limiter = Arc::new(webhook_rate_limiter());

    // Protected wallet routes (require auth)
    let protected_wallet_routes = Router::new()
        .route("/", get(wallet::get_wallet))
        .route("/transactions", get(wallet::get_transaction_history))
        .route("/deposit", post(wallet::initiate_deposit))
        .route("/withdraw", post(wallet::withdraw_funds))
        .layer(middleware::from_fn_with_state(
            wallet_limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(auth));

    // The gateway callback is public by nature; it is rate limited and must
    // always acknowledge.
    let public_wallet_routes = Router::new()
        .route("/deposit/callback", post(wallet::deposit_callback))
        .layer(middleware::from_fn_with_state(
            webhook_limiter,
            rate_limit_middleware,
        ));

    let wallet_routes = Router::new()
        .merge(protected_wallet_routes)
        .merge(public_wallet_routes);

    let escrow_routes = Router::new()
        .route("/", post(escrow::create_escrow).get(escrow::list_escrows))
        .route("/:escrow_id", get(escrow::get_escrow))
        .route("/:escrow_id/release", post(escrow::release_escrow))
        .route("/:escrow_id/refund", post(escrow::refund_escrow))
        .layer(middleware::from_fn(auth));

    let dispute_routes = Router::new()
        .route("/", post(disputes::create_dispute))
        .route("/:dispute_id", get(disputes::get_dispute).put(disputes::resolve_dispute))
        .layer(middleware::from_fn(auth));

    let api_route = Router::new()
        .nest("/wallet", wallet_routes)
        .nest("/escrow", escrow_routes)
        .nest("/disputes", dispute_routes)
        .layer(TraceLayer::new_for_http())
        .layer(Extension(app_state));

    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_route)
}
