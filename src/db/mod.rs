pub mod auditdb;
pub mod db;
pub mod disputedb;
pub mod escrowdb;
pub mod idempotencydb;
pub mod jobdb;
pub mod userdb;
pub mod walletdb;
