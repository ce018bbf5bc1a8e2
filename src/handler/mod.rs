pub mod disputes;
pub mod escrow;
pub mod wallet;
