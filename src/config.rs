// config.rs
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: Option<String>,
    pub jwt_secret: String,
    pub jwt_maxage: i64,
    pub port: u16,

    // M-Pesa (Daraja) gateway configuration
    pub mpesa_consumer_key: String,
    pub mpesa_consumer_secret: String,
    pub mpesa_shortcode: String,
    pub mpesa_passkey: String,
    pub mpesa_callback_url: String,
    /// "mock" (synchronous confirm, no network), "sandbox" or "live"
    pub mpesa_env: String,
    /// Outbound gateway call timeout in seconds
    pub mpesa_timeout_secs: u64,
    /// When set, callbacks must carry an HMAC signature header
    pub callback_signature_secret: Option<String>,

    // Ledger policy
    /// Withholding tax as basis points of the service fee (not of gross)
    pub tax_bps_of_fee: i64,
    pub min_escrow_amount: i64,   // cents
    pub min_deposit_amount: i64,  // cents
    pub max_deposit_amount: i64,  // cents
    pub min_withdrawal_amount: i64, // cents

    // Risk policy
    pub risk_critical_threshold: i64,
    pub risk_blocking_enabled: bool,

    /// Hex-encoded 32-byte key for phone-number encryption at rest
    pub pii_master_key: String,
}

impl Config {
    pub fn init() -> Config {
        let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let redis_url = std::env::var("REDIS_URL").ok();
        let jwt_secret = std::env::var("JWT_SECRET_KEY").expect("JWT_SECRET_KEY must be set");
        let jwt_maxage = std::env::var("JWT_MAXAGE").expect("JWT_MAXAGE must be set");

        let mpesa_consumer_key = std::env::var("MPESA_CONSUMER_KEY")
            .unwrap_or_else(|_| "sandbox_consumer_key".to_string());
        let mpesa_consumer_secret = std::env::var("MPESA_CONSUMER_SECRET")
            .unwrap_or_else(|_| "sandbox_consumer_secret".to_string());
        let mpesa_shortcode =
            std::env::var("MPESA_SHORTCODE").unwrap_or_else(|_| "174379".to_string());
        let mpesa_passkey =
            std::env::var("MPESA_PASSKEY").unwrap_or_else(|_| "sandbox_passkey".to_string());
        let mpesa_callback_url = std::env::var("MPESA_CALLBACK_URL")
            .unwrap_or_else(|_| "http://localhost:8000/api/wallet/deposit/callback".to_string());
        let mpesa_env = std::env::var("MPESA_ENV").unwrap_or_else(|_| "mock".to_string());
        let mpesa_timeout_secs = std::env::var("MPESA_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(30);
        let callback_signature_secret = std::env::var("CALLBACK_SIGNATURE_SECRET").ok();

        let tax_bps_of_fee = std::env::var("TAX_BPS_OF_FEE")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(500); // 5% of the service fee

        let risk_critical_threshold = std::env::var("RISK_CRITICAL_THRESHOLD")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(100);
        let risk_blocking_enabled = std::env::var("RISK_BLOCKING_ENABLED")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let pii_master_key = std::env::var("PII_MASTER_KEY")
            .unwrap_or_else(|_| hex::encode([0u8; 32]));

        Config {
            database_url,
            redis_url,
            jwt_secret,
            jwt_maxage: jwt_maxage.parse::<i64>().unwrap(),
            port: 8000,
            mpesa_consumer_key,
            mpesa_consumer_secret,
            mpesa_shortcode,
            mpesa_passkey,
            mpesa_callback_url,
            mpesa_env,
            mpesa_timeout_secs,
            callback_signature_secret,
            tax_bps_of_fee,
            min_escrow_amount: 100,
            min_deposit_amount: 1_000,       // KSh 10
            max_deposit_amount: 15_000_000,  // KSh 150,000
            min_withdrawal_amount: 5_000,    // KSh 50
            risk_critical_threshold,
            risk_blocking_enabled,
            pii_master_key,
        }
    }
}
