mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use config::Config;
use dotenv::dotenv;
use routes::create_router;
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::filter::LevelFilter;

use crate::db::db::DBClient;
use crate::db::idempotencydb::PgIdempotencyStore;
use crate::utils::pii::PiiCipher;

use service::{
    audit_service::AuditService,
    dispute_service::DisputeService,
    escrow_service::EscrowService,
    idempotency::IdempotencyStore,
    mpesa::MpesaService,
    notification_service::NotificationService,
    reputation_service::ReputationService,
    risk_service::RiskService,
};

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Arc<DBClient>,
    // Services
    pub escrow_service: Arc<EscrowService>,
    pub dispute_service: Arc<DisputeService>,
    pub audit_service: Arc<AuditService>,
    pub notification_service: Arc<NotificationService>,
    pub reputation_service: Arc<ReputationService>,
    pub risk_service: Arc<RiskService>,
    pub mpesa: Arc<MpesaService>,
    pub idempotency_store: Arc<dyn IdempotencyStore>,
    pub pii: PiiCipher,
}

impl AppState {
    pub fn new(db_client: DBClient, config: Config) -> Self {
        let db_client_arc = Arc::new(db_client);

        let pii = PiiCipher::from_hex(&config.pii_master_key)
            .expect("PII_MASTER_KEY must be a hex-encoded 32-byte key");

        let audit_service = Arc::new(AuditService::new(db_client_arc.clone()));
        let notification_service = Arc::new(NotificationService::new(db_client_arc.clone()));
        let reputation_service = Arc::new(ReputationService::new(db_client_arc.clone()));
        let risk_service = Arc::new(RiskService::new(
            db_client_arc.clone(),
            config.risk_critical_threshold,
            config.risk_blocking_enabled,
        ));
        let mpesa = Arc::new(MpesaService::new(&config));
        let idempotency_store: Arc<dyn IdempotencyStore> =
            Arc::new(PgIdempotencyStore::new(db_client_arc.clone()));

        let escrow_service = Arc::new(EscrowService::new(
            db_client_arc.clone(),
            audit_service.clone(),
            notification_service.clone(),
            reputation_service.clone(),
            risk_service.clone(),
            mpesa.clone(),
            config.min_escrow_amount,
            config.tax_bps_of_fee,
        ));

        let dispute_service = Arc::new(DisputeService::new(
            db_client_arc.clone(),
            audit_service.clone(),
            notification_service.clone(),
            reputation_service.clone(),
        ));

        Self {
            env: config,
            db_client: db_client_arc,
            escrow_service,
            dispute_service,
            audit_service,
            notification_service,
            reputation_service,
            risk_service,
            mpesa,
            idempotency_store,
            pii,
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::INFO)
        .init();

    dotenv().ok();

    let config = Config::init();

    let pool = match PgPoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&config.database_url)
        .await
    {
        Ok(pool) => {
            tracing::info!("Connected to the database");
            pool
        }
        Err(err) => {
            tracing::error!("Failed to connect to the database: {:?}", err);
            std::process::exit(1);
        }
    };

    let db_client = if let Some(ref redis_url) = config.redis_url {
        DBClient::with_redis(pool, redis_url).await
    } else {
        DBClient::new(pool)
    };

    let allowed_origins = vec![
        "http://localhost:5173".parse::<HeaderValue>().unwrap(),
        "http://localhost:8000".parse::<HeaderValue>().unwrap(),
    ];

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE]);

    let app_state = Arc::new(AppState::new(db_client, config.clone()));

    let app = create_router(app_state.clone()).layer(cors);

    tracing::info!(
        "Server is running on http://localhost:{} (gateway mode: {})",
        config.port,
        config.mpesa_env
    );

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", &config.port))
        .await
        .unwrap();

    axum::serve(listener, app).await.unwrap();
}
