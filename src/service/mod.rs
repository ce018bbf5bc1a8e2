pub mod audit_service;
pub mod dispute_service;
pub mod error;
pub mod escrow_service;
pub mod fees;
pub mod idempotency;
pub mod mpesa;
pub mod notification_service;
pub mod reputation_service;
pub mod risk_service;
